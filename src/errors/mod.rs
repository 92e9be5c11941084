use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

/// Stable taxonomy tag attached to every failed operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ValidationError,
    AuthError,
    NotFound,
    Conflict,
    RemoteUnavailable,
    TransportError,
    ProtocolError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ValidationError => "validation_error",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::RemoteUnavailable => "remote_unavailable",
            ErrorKind::TransportError => "transport_error",
            ErrorKind::ProtocolError => "protocol_error",
        }
    }

    /// Whether repeating the same call could plausibly succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ErrorKind::RemoteUnavailable | ErrorKind::TransportError)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Common trait for errors that surface through the HTTP layer
pub trait AppError: std::error::Error + Send + Sync + 'static {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> StatusCode;

    /// Get a user-friendly error message
    fn user_message(&self) -> String;

    /// Get the error code for client handling
    fn error_code(&self) -> &'static str;
}

/// Failure arms of an operation result. `Ok` is the success arm.
#[derive(Error, Debug, Clone)]
pub enum NextcloudError {
    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Remote returned {status} ({kind}): {message}")]
    Remote {
        status: u16,
        kind: ErrorKind,
        message: String,
    },

    #[error("Transport failure ({kind}): {details}")]
    Transport { kind: ErrorKind, details: String },

    #[error("Malformed server response: {details}")]
    Protocol { details: String },
}

pub type OperationResult<T> = Result<T, NextcloudError>;

impl NextcloudError {
    pub fn validation<S: Into<String>>(field: &'static str, reason: S) -> Self {
        Self::Validation { field, reason: reason.into() }
    }

    pub fn protocol<S: Into<String>>(details: S) -> Self {
        Self::Protocol { details: details.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            NextcloudError::Validation { .. } => ErrorKind::ValidationError,
            NextcloudError::Remote { kind, .. } => *kind,
            NextcloudError::Transport { kind, .. } => *kind,
            NextcloudError::Protocol { .. } => ErrorKind::ProtocolError,
        }
    }

    /// HTTP status the remote answered with, when the failure came from one
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            NextcloudError::Remote { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind().is_transient()
    }
}

impl From<reqwest::Error> for NextcloudError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            ErrorKind::TransportError
        } else if is_connection_refused(&e) {
            ErrorKind::RemoteUnavailable
        } else {
            ErrorKind::TransportError
        };
        NextcloudError::Transport { kind, details: e.to_string() }
    }
}

fn is_connection_refused(e: &reqwest::Error) -> bool {
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        if let Some(io) = err.downcast_ref::<std::io::Error>() {
            if io.kind() == std::io::ErrorKind::ConnectionRefused {
                return true;
            }
        }
        source = err.source();
    }
    false
}

impl AppError for NextcloudError {
    fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::ValidationError => StatusCode::BAD_REQUEST,
            // The remote rejected our service credentials, not the caller's token
            ErrorKind::AuthError => StatusCode::BAD_GATEWAY,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::RemoteUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::TransportError => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::ProtocolError => StatusCode::BAD_GATEWAY,
        }
    }

    fn user_message(&self) -> String {
        match self {
            NextcloudError::Validation { field, reason } => format!("Invalid {}: {}", field, reason),
            NextcloudError::Remote { message, .. } if !message.is_empty() => message.clone(),
            NextcloudError::Remote { kind, .. } => match kind {
                ErrorKind::AuthError => "Nextcloud rejected the configured credentials".to_string(),
                ErrorKind::NotFound => "Resource not found".to_string(),
                ErrorKind::Conflict => "Destination already exists".to_string(),
                _ => "Nextcloud returned an error".to_string(),
            },
            NextcloudError::Transport { kind, .. } => match kind {
                ErrorKind::RemoteUnavailable => "Nextcloud is unreachable".to_string(),
                _ => "Connection to Nextcloud failed".to_string(),
            },
            NextcloudError::Protocol { details } => format!("Unexpected response from Nextcloud: {}", details),
        }
    }

    fn error_code(&self) -> &'static str {
        match self.kind() {
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::AuthError => "REMOTE_AUTH_FAILED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::Conflict => "CONFLICT",
            ErrorKind::RemoteUnavailable => "REMOTE_UNAVAILABLE",
            ErrorKind::TransportError => "TRANSPORT_ERROR",
            ErrorKind::ProtocolError => "PROTOCOL_ERROR",
        }
    }
}

/// JSON shape of an error, shared by error responses and partial-success reports
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_status: Option<u16>,
}

impl From<&NextcloudError> for ErrorBody {
    fn from(e: &NextcloudError) -> Self {
        Self {
            error: e.user_message(),
            code: e.error_code().to_string(),
            kind: e.kind(),
            remote_status: e.remote_status(),
        }
    }
}

impl IntoResponse for NextcloudError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorBody::from(&self);
        let mut value = json!(body);
        value["status"] = json!(status.as_u16());
        (status, Json(value)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_serialize_as_snake_case_tags() {
        assert_eq!(serde_json::to_value(ErrorKind::RemoteUnavailable).unwrap(), "remote_unavailable");
        assert_eq!(serde_json::to_value(ErrorKind::NotFound).unwrap(), "not_found");
        assert_eq!(ErrorKind::ProtocolError.to_string(), "protocol_error");
    }

    #[test]
    fn only_network_kinds_are_transient() {
        assert!(ErrorKind::RemoteUnavailable.is_transient());
        assert!(ErrorKind::TransportError.is_transient());
        assert!(!ErrorKind::Conflict.is_transient());
        assert!(!ErrorKind::ValidationError.is_transient());
    }

    #[test]
    fn http_status_follows_kind() {
        let conflict = NextcloudError::Remote {
            status: 412,
            kind: ErrorKind::Conflict,
            message: String::new(),
        };
        assert_eq!(conflict.status_code(), StatusCode::CONFLICT);
        assert_eq!(conflict.remote_status(), Some(412));

        let bad_path = NextcloudError::validation("path", "traversal");
        assert_eq!(bad_path.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(bad_path.kind(), ErrorKind::ValidationError);
        assert_eq!(bad_path.remote_status(), None);
    }
}
