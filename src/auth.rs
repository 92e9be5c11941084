use axum::{
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

use crate::AppState;

/// Proof that the request carried the configured API key
pub struct ApiKeyAuth;

impl FromRequestParts<Arc<AppState>> for ApiKeyAuth {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = extract_token_from_headers(&parts.headers)
            .ok_or_else(|| reject(StatusCode::UNAUTHORIZED, "Missing authorization header"))?;

        if !tokens_match(&token, &state.config.api_key) {
            warn!("Rejected request to {} with an invalid API key", parts.uri.path());
            return Err(reject(StatusCode::FORBIDDEN, "Could not validate credentials"));
        }

        Ok(ApiKeyAuth)
    }
}

fn reject(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({"error": message, "status": status.as_u16()}))).into_response()
}

fn extract_token_from_headers(headers: &HeaderMap) -> Option<String> {
    let auth_header = headers.get("authorization")?;
    let auth_str = auth_header.to_str().ok()?;

    // Auth schemes are case-insensitive
    let (scheme, token) = auth_str.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Comparison whose running time does not depend on where the inputs differ
fn tokens_match(given: &str, expected: &str) -> bool {
    let given = given.as_bytes();
    let expected = expected.as_bytes();
    if given.len() != expected.len() {
        return false;
    }
    given
        .iter()
        .zip(expected)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_extract_bearer_token() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token_from_headers(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(extract_token_from_headers(&headers).as_deref(), Some("abc123"));

        headers.insert("authorization", HeaderValue::from_static("bearer abc123"));
        assert_eq!(extract_token_from_headers(&headers).as_deref(), Some("abc123"));

        headers.insert("authorization", HeaderValue::from_static("BEARER abc123"));
        assert_eq!(extract_token_from_headers(&headers).as_deref(), Some("abc123"));

        headers.insert("authorization", HeaderValue::from_static("Bearerabc123"));
        assert_eq!(extract_token_from_headers(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Basic abc123"));
        assert_eq!(extract_token_from_headers(&headers), None);

        headers.insert("authorization", HeaderValue::from_static("Bearer "));
        assert_eq!(extract_token_from_headers(&headers), None);
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("secret", "secret"));
        assert!(!tokens_match("secreT", "secret"));
        assert!(!tokens_match("secret-longer", "secret"));
    }
}
