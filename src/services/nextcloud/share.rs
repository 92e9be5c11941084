use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::NextcloudError;
use crate::models::{SharePermission, ShareLink};

use super::paths::RemotePath;
use super::status;

/// Public link share type in the OCS API
pub const SHARE_TYPE_PUBLIC_LINK: u8 = 3;

/// Body of a share-create call
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateShareRequest {
    pub path: String,
    pub share_type: u8,
    pub permissions: u32,
}

impl CreateShareRequest {
    pub fn public_link(path: &RemotePath, permission: SharePermission) -> Self {
        Self {
            path: path.to_ocs_path(),
            share_type: SHARE_TYPE_PUBLIC_LINK,
            permissions: permission.bits(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct OcsEnvelope {
    ocs: Ocs,
}

#[derive(Debug, Deserialize)]
struct Ocs {
    meta: OcsMeta,
    #[serde(default)]
    data: Value,
}

#[derive(Debug, Deserialize)]
struct OcsMeta {
    statuscode: u16,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShareData {
    /// Some server versions send a number, others a string
    id: Value,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    permissions: Option<u32>,
}

/// Reads a share-create body that already passed the HTTP status check.
///
/// The OCS meta status must be 100 or 200 and the data must carry a URL.
pub fn parse_share_response(
    body: &str,
    requested_path: &RemotePath,
    requested_permission: SharePermission,
) -> Result<ShareLink, NextcloudError> {
    let envelope: OcsEnvelope = serde_json::from_str(body)
        .map_err(|e| NextcloudError::protocol(format!("Failed to parse OCS API JSON response: {}", e)))?;
    let meta = envelope.ocs.meta;

    if !matches!(meta.statuscode, 100 | 200) {
        let message = meta.message.unwrap_or_else(|| "Unknown OCS API error.".to_string());
        return Err(status::failure(meta.statuscode, message));
    }

    let data: ShareData = serde_json::from_value(envelope.ocs.data)
        .map_err(|e| NextcloudError::protocol(format!("Unexpected OCS share data: {}", e)))?;

    let url = data
        .url
        .filter(|u| !u.is_empty())
        .ok_or_else(|| NextcloudError::protocol("Could not find public URL in OCS response"))?;

    let share_id = match data.id {
        Value::String(id) => id,
        Value::Number(id) => id.to_string(),
        other => return Err(NextcloudError::protocol(format!("Unexpected share id: {}", other))),
    };

    Ok(ShareLink {
        url,
        share_id,
        path: data
            .path
            .map(|p| RemotePath::from_server(&p))
            .unwrap_or_else(|| requested_path.clone()),
        permissions: data
            .permissions
            .and_then(SharePermission::from_bits)
            .unwrap_or(requested_permission),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorKind;

    fn requested() -> RemotePath {
        RemotePath::from_server("Uploads/notes/a.txt")
    }

    #[test]
    fn test_request_body_shape() {
        let body = serde_json::to_value(CreateShareRequest::public_link(&requested(), SharePermission::ReadOnly)).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"path": "/Uploads/notes/a.txt", "shareType": 3, "permissions": 1})
        );
    }

    #[test]
    fn test_successful_share() {
        let body = r#"{"ocs":{"meta":{"status":"ok","statuscode":200,"message":"OK"},
            "data":{"id":"42","share_type":3,"permissions":1,"path":"/Uploads/notes/a.txt",
            "token":"AbCdEf","url":"https://cloud.example.com/s/AbCdEf"}}}"#;
        let link = parse_share_response(body, &requested(), SharePermission::ReadOnly).unwrap();
        assert_eq!(link.url, "https://cloud.example.com/s/AbCdEf");
        assert_eq!(link.share_id, "42");
        assert_eq!(link.path.as_str(), "Uploads/notes/a.txt");
        assert_eq!(link.permissions, SharePermission::ReadOnly);
    }

    #[test]
    fn test_numeric_id_and_v1_status() {
        let body = r#"{"ocs":{"meta":{"statuscode":100},"data":{"id":7,"url":"https://c/s/x"}}}"#;
        let link = parse_share_response(body, &requested(), SharePermission::Edit).unwrap();
        assert_eq!(link.share_id, "7");
        assert_eq!(link.path, requested());
        assert_eq!(link.permissions, SharePermission::Edit);
    }

    #[test]
    fn test_ocs_error_is_classified() {
        let body = r#"{"ocs":{"meta":{"statuscode":404,"message":"Wrong path"},"data":[]}}"#;
        let err = parse_share_response(body, &requested(), SharePermission::ReadOnly).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(err.to_string().contains("Wrong path"));

        let body = r#"{"ocs":{"meta":{"statuscode":999,"message":"Invalid path"}}}"#;
        let err = parse_share_response(body, &requested(), SharePermission::ReadOnly).unwrap_err();
        assert_eq!(err.remote_status(), Some(999));
    }

    #[test]
    fn test_missing_url_is_protocol_error() {
        let body = r#"{"ocs":{"meta":{"statuscode":100},"data":{"id":"1"}}}"#;
        let err = parse_share_response(body, &requested(), SharePermission::ReadOnly).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }

    #[test]
    fn test_non_json_is_protocol_error() {
        let err = parse_share_response("<html/>", &requested(), SharePermission::ReadOnly).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolError);
    }
}
