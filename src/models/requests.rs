use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use super::files::{DirectoryEntry, SharePermission};

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SaveFileRequest {
    /// Path relative to the usage folder, e.g. "notes/a.txt"
    pub path: String,
    /// Plain text, or base64 when `is_base64` is set
    pub content: String,
    #[serde(default)]
    pub is_base64: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PathRequest {
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShareFolderRequest {
    pub path: String,
    #[serde(default)]
    pub permissions: SharePermission,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferRequest {
    pub source_path: String,
    pub destination_path: String,
    #[serde(default)]
    pub overwrite: bool,
}

#[derive(Debug, Clone, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct PathQuery {
    /// Path relative to the usage folder; empty means the usage folder
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReadFileResponse {
    /// Base64-encoded file content
    pub content: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct DirectoryListingResponse {
    pub items: Vec<DirectoryEntry>,
}
