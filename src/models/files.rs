use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::stream::BoxStream;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::errors::{ErrorBody, NextcloudError};
use crate::services::nextcloud::RemotePath;

/// Upload payload, decoded once before any remote call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub bytes: Bytes,
    /// Whether the caller sent the content base64-encoded
    pub was_base64: bool,
}

impl FileContent {
    pub fn raw(bytes: impl Into<Bytes>) -> Self {
        Self { bytes: bytes.into(), was_base64: false }
    }

    /// Decodes request content; invalid base64 is a validation error.
    /// Line breaks from wrapped (MIME style) encodings are ignored.
    pub fn decode(content: &str, is_base64: bool) -> Result<Self, NextcloudError> {
        if !is_base64 {
            return Ok(Self::raw(content.as_bytes().to_vec()));
        }
        let compact: Vec<u8> = content.bytes().filter(|b| !b.is_ascii_whitespace()).collect();
        let decoded = STANDARD
            .decode(&compact)
            .map_err(|e| NextcloudError::validation("content", format!("invalid base64: {}", e)))?;
        Ok(Self { bytes: Bytes::from(decoded), was_base64: true })
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// One row of a directory listing
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DirectoryEntry {
    pub name: String,
    /// Path from the account root
    #[schema(value_type = String)]
    pub path: RemotePath,
    pub is_directory: bool,
    pub size: Option<u64>,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    pub mime_type: Option<String>,
}

/// Permission set requested for a public link
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SharePermission {
    #[default]
    ReadOnly,
    /// File drop: upload only, no listing
    Upload,
    Edit,
}

impl SharePermission {
    /// OCS permission bits
    pub fn bits(&self) -> u32 {
        match self {
            SharePermission::ReadOnly => 1,
            SharePermission::Upload => 4,
            SharePermission::Edit => 15,
        }
    }

    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            1 => Some(SharePermission::ReadOnly),
            4 => Some(SharePermission::Upload),
            15 => Some(SharePermission::Edit),
            _ => None,
        }
    }
}

/// Public link returned by the OCS share API. Not stored locally.
#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct ShareLink {
    pub url: String,
    pub share_id: String,
    #[schema(value_type = String)]
    pub path: RemotePath,
    pub permissions: SharePermission,
}

/// File body read into memory
#[derive(Debug, Clone)]
pub struct FileDownload {
    pub content: Bytes,
    pub mime_type: String,
}

/// Lazily drained response body. It can be consumed exactly once.
pub struct RemoteStream {
    pub content_type: String,
    pub content_length: Option<u64>,
    pub stream: BoxStream<'static, Result<Bytes, NextcloudError>>,
}

impl std::fmt::Debug for RemoteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStream")
            .field("content_type", &self.content_type)
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct UploadReceipt {
    #[schema(value_type = String)]
    pub path: RemotePath,
    pub bytes_written: u64,
    /// False when an existing file was overwritten
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct FolderReceipt {
    #[schema(value_type = String)]
    pub path: RemotePath,
    /// False when the folder already existed
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct DeleteReceipt {
    #[schema(value_type = String)]
    pub path: RemotePath,
    /// False when nothing was there to delete
    pub existed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, ToSchema)]
pub struct TransferReceipt {
    #[schema(value_type = String)]
    pub source: RemotePath,
    #[schema(value_type = String)]
    pub destination: RemotePath,
    /// True when an existing destination was replaced
    pub overwritten: bool,
}

/// Share phase of a save-and-share run
#[derive(Debug, Clone)]
pub enum SharePhase {
    Shared(ShareLink),
    Failed(NextcloudError),
}

/// Two-phase result of save-and-share. Only produced once the upload has
/// succeeded; the share phase may still have failed.
#[derive(Debug, Clone)]
pub struct SaveAndShareReport {
    pub upload: UploadReceipt,
    pub share: SharePhase,
}

impl SaveAndShareReport {
    pub fn is_shared(&self) -> bool {
        matches!(self.share, SharePhase::Shared(_))
    }

    pub fn share_link(&self) -> Option<&ShareLink> {
        match &self.share {
            SharePhase::Shared(link) => Some(link),
            SharePhase::Failed(_) => None,
        }
    }

    pub fn share_error(&self) -> Option<&NextcloudError> {
        match &self.share {
            SharePhase::Shared(_) => None,
            SharePhase::Failed(e) => Some(e),
        }
    }
}

/// Serialized view of a save-and-share report
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SaveAndShareResponse {
    pub message: String,
    pub uploaded: bool,
    pub shared: bool,
    pub upload: UploadReceipt,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share: Option<ShareLink>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_error: Option<ErrorBody>,
}

impl From<&SaveAndShareReport> for SaveAndShareResponse {
    fn from(report: &SaveAndShareReport) -> Self {
        let message = if report.is_shared() {
            "File saved and shared successfully".to_string()
        } else {
            "File saved but the share link could not be created".to_string()
        };
        Self {
            message,
            uploaded: true,
            shared: report.is_shared(),
            upload: report.upload.clone(),
            public_url: report.share_link().map(|link| link.url.clone()),
            share: report.share_link().cloned(),
            share_error: report.share_error().map(ErrorBody::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    #[test]
    fn test_plain_content_is_taken_verbatim() {
        let content = FileContent::decode("hi", false).unwrap();
        assert_eq!(content.bytes.as_ref(), b"hi");
        assert!(!content.was_base64);
    }

    #[test]
    fn test_base64_content_is_decoded_once() {
        let content = FileContent::decode("aGk=", true).unwrap();
        assert_eq!(content.bytes.as_ref(), b"hi");
        assert!(content.was_base64);
        assert_eq!(content.len(), 2);
    }

    #[test]
    fn test_wrapped_base64_is_accepted() {
        let original: Vec<u8> = (0u8..120).collect();
        let encoded = STANDARD.encode(&original);
        let wrapped = encoded
            .as_bytes()
            .chunks(76)
            .map(|line| std::str::from_utf8(line).unwrap())
            .collect::<Vec<_>>()
            .join("\r\n")
            + "\n";
        assert!(wrapped.contains('\n'));

        let content = FileContent::decode(&wrapped, true).unwrap();
        assert_eq!(content.bytes.as_ref(), original.as_slice());
    }

    #[test]
    fn test_invalid_base64_is_validation_error() {
        let err = FileContent::decode("not base64!!", true).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[test]
    fn test_permission_bits() {
        assert_eq!(SharePermission::default().bits(), 1);
        assert_eq!(SharePermission::from_bits(15), Some(SharePermission::Edit));
        assert_eq!(SharePermission::from_bits(31), None);
    }
}
