use serde::Serialize;
use utoipa::ToSchema;

use crate::errors::NextcloudError;

/// Normalized path of a resource, rooted at the account's storage.
///
/// Stored without leading or trailing slash. WebDAV URLs use it as-is
/// (segment-encoded); the OCS API wants it with a leading slash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, ToSchema)]
#[serde(transparent)]
pub struct RemotePath(String);

impl RemotePath {
    /// The account's top-level folder
    pub fn root() -> Self {
        Self(String::new())
    }

    /// Builds a path from segments that were already checked
    fn from_segments<'a>(segments: impl IntoIterator<Item = &'a str>) -> Self {
        Self(segments.into_iter().collect::<Vec<_>>().join("/"))
    }

    /// Builds a path from a decoded server href remainder. Server-provided,
    /// so only slashes are cleaned up.
    pub(crate) fn from_server(path: &str) -> Self {
        Self::from_segments(path.split('/').filter(|s| !s.is_empty()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// Last segment, empty for the root
    pub fn name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn parent(&self) -> Option<RemotePath> {
        if self.is_root() {
            return None;
        }
        Some(match self.0.rfind('/') {
            Some(idx) => Self(self.0[..idx].to_string()),
            None => Self::root(),
        })
    }

    /// Every non-root ancestor, outermost first, excluding the path itself
    pub fn ancestors(&self) -> Vec<RemotePath> {
        let segments: Vec<&str> = self.segments().collect();
        (1..segments.len())
            .map(|n| Self::from_segments(segments[..n].iter().copied()))
            .collect()
    }

    pub fn starts_with(&self, prefix: &RemotePath) -> bool {
        if prefix.is_root() {
            return true;
        }
        self.0 == prefix.0 || self.0.starts_with(&format!("{}/", prefix.0))
    }

    /// Form expected by the OCS share API
    pub fn to_ocs_path(&self) -> String {
        format!("/{}", self.0)
    }

    /// Percent-encoded form for use inside a WebDAV URL
    pub fn to_url_path(&self) -> String {
        self.segments()
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Resolves caller paths against the configured usage folder
#[derive(Debug, Clone, Default)]
pub struct PathResolver {
    usage_folder: RemotePath,
}

impl PathResolver {
    pub fn new(usage_folder: Option<&str>) -> Result<Self, NextcloudError> {
        let usage_folder = match usage_folder {
            Some(folder) => clean_segments("usage_folder", folder)?,
            None => RemotePath::root(),
        };
        Ok(Self { usage_folder })
    }

    pub fn usage_folder(&self) -> &RemotePath {
        &self.usage_folder
    }

    /// Resolves `input`; an empty input resolves to the usage folder itself
    pub fn resolve(&self, field: &'static str, input: &str) -> Result<RemotePath, NextcloudError> {
        let relative = clean_segments(field, input)?;
        let resolved = if self.usage_folder.is_root() {
            relative
        } else if relative.is_root() {
            self.usage_folder.clone()
        } else {
            RemotePath(format!("{}/{}", self.usage_folder.0, relative.0))
        };

        if !resolved.starts_with(&self.usage_folder) {
            return Err(NextcloudError::validation(field, "traversal"));
        }
        Ok(resolved)
    }

    /// Resolves `input` and requires it to name an item below the usage folder
    pub fn resolve_item(&self, field: &'static str, input: &str) -> Result<RemotePath, NextcloudError> {
        let resolved = self.resolve(field, input)?;
        if resolved == self.usage_folder {
            return Err(NextcloudError::validation(field, "empty"));
        }
        Ok(resolved)
    }
}

/// Normalizes a caller path against an optional usage folder.
///
/// Leading, trailing and repeated slashes are dropped. Any `.` or `..`
/// segment is rejected as traversal; nothing is resolved lexically.
pub fn normalize(input: &str, usage_folder: Option<&str>) -> Result<RemotePath, NextcloudError> {
    PathResolver::new(usage_folder)?.resolve("path", input)
}

fn clean_segments(field: &'static str, input: &str) -> Result<RemotePath, NextcloudError> {
    let mut segments = Vec::new();
    for segment in input.split('/') {
        match segment {
            "" => continue,
            "." | ".." => return Err(NextcloudError::validation(field, "traversal")),
            s if s.chars().any(|c| c.is_control() || c == '\\') => {
                return Err(NextcloudError::validation(field, "invalid_character"));
            }
            s => segments.push(s),
        }
    }
    Ok(RemotePath::from_segments(segments))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn reason(result: Result<RemotePath, NextcloudError>) -> String {
        match result {
            Err(NextcloudError::Validation { reason, .. }) => reason,
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_slashes_are_collapsed_and_trimmed() {
        let path = normalize("//notes///a.txt/", None).unwrap();
        assert_eq!(path.as_str(), "notes/a.txt");
        assert_eq!(path.to_ocs_path(), "/notes/a.txt");
    }

    #[test]
    fn test_usage_folder_is_prefixed() {
        let path = normalize("/notes/a.txt", Some("/Uploads/")).unwrap();
        assert_eq!(path.as_str(), "Uploads/notes/a.txt");

        let path = normalize("a.txt", Some("")).unwrap();
        assert_eq!(path.as_str(), "a.txt");
    }

    #[test]
    fn test_dot_segments_are_traversal() {
        for input in ["..", "../etc", "a/../../b", "a/./b", ".", "notes/.."] {
            let err = normalize(input, Some("Uploads")).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::ValidationError);
            assert_eq!(reason(Err(err)), "traversal", "input: {}", input);
        }
    }

    #[test]
    fn test_dots_inside_names_are_fine() {
        let path = normalize("archive..tar/.hidden/v1.2", None).unwrap();
        assert_eq!(path.as_str(), "archive..tar/.hidden/v1.2");
    }

    #[test]
    fn test_control_characters_rejected() {
        assert_eq!(reason(normalize("bad\u{0}name", None)), "invalid_character");
        assert_eq!(reason(normalize("..\\..\\windows", None)), "invalid_character");
    }

    #[test]
    fn test_empty_input_resolves_to_usage_folder() {
        let resolver = PathResolver::new(Some("Uploads")).unwrap();
        assert_eq!(resolver.resolve("path", "").unwrap().as_str(), "Uploads");
        assert_eq!(resolver.resolve("path", "/").unwrap().as_str(), "Uploads");
        assert_eq!(reason(resolver.resolve_item("path", "//")), "empty");
    }

    #[test]
    fn test_field_name_is_reported() {
        let resolver = PathResolver::default();
        match resolver.resolve("destination_path", "../x") {
            Err(NextcloudError::Validation { field, .. }) => assert_eq!(field, "destination_path"),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_ancestors_parent_and_name() {
        let path = normalize("a/b/c.txt", Some("Uploads")).unwrap();
        let ancestors: Vec<String> = path.ancestors().iter().map(|p| p.to_string()).collect();
        assert_eq!(ancestors, vec!["Uploads", "Uploads/a", "Uploads/a/b"]);
        assert_eq!(path.parent().unwrap().as_str(), "Uploads/a/b");
        assert_eq!(path.name(), "c.txt");
        assert!(RemotePath::root().parent().is_none());
    }

    #[test]
    fn test_url_path_encodes_each_segment() {
        let path = normalize("My Docs/report #1.pdf", None).unwrap();
        assert_eq!(path.to_url_path(), "My%20Docs/report%20%231.pdf");
    }
}
