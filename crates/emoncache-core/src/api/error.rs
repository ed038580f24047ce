use reqwest::StatusCode;
use thiserror::Error;

/// Longest response excerpt kept in an error message
const BODY_EXCERPT_LIMIT: usize = 500;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Emoncms rejected the API key")]
    Unauthorized,

    #[error("Not found on the Emoncms instance: {0}")]
    NotFound(String),

    #[error("Emoncms is throttling requests")]
    RateLimited,

    #[error("Emoncms server error: {0}")]
    ServerError(String),

    #[error("Could not reach Emoncms: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("Unexpected response from Emoncms: {0}")]
    InvalidResponse(String),

    /// The instance answered but refused the request (`{"success": false}`).
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// The fetch itself panicked before producing a reply.
    #[error("Fetch aborted: {0}")]
    Aborted(String),
}

impl ApiError {
    /// Classify a non-success HTTP reply.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ApiError::Unauthorized,
            StatusCode::NOT_FOUND => ApiError::NotFound(excerpt(body)),
            StatusCode::TOO_MANY_REQUESTS => ApiError::RateLimited,
            s if s.is_server_error() => ApiError::ServerError(excerpt(body)),
            s => ApiError::InvalidResponse(format!("HTTP {}: {}", s, excerpt(body))),
        }
    }

    /// Failures that say nothing about the cached data being wrong, only
    /// that the instance could not be asked right now.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ApiError::NetworkError(_) | ApiError::RateLimited | ApiError::ServerError(_)
        )
    }
}

/// Error pages can be whole HTML documents; keep the start only.
fn excerpt(body: &str) -> String {
    if body.len() <= BODY_EXCERPT_LIMIT {
        return body.to_string();
    }
    let cut = (0..=BODY_EXCERPT_LIMIT)
        .rev()
        .find(|&i| body.is_char_boundary(i))
        .unwrap_or(0);
    format!("{}... ({} bytes)", &body[..cut], body.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_status_maps_codes() {
        assert!(matches!(ApiError::from_status(StatusCode::FORBIDDEN, ""), ApiError::Unauthorized));
        assert!(matches!(ApiError::from_status(StatusCode::NOT_FOUND, "x"), ApiError::NotFound(_)));
        assert!(matches!(ApiError::from_status(StatusCode::BAD_GATEWAY, "x"), ApiError::ServerError(_)));
        assert!(matches!(ApiError::from_status(StatusCode::IM_A_TEAPOT, "x"), ApiError::InvalidResponse(_)));
    }

    #[test]
    fn test_transient_errors() {
        assert!(ApiError::ServerError("down".to_string()).is_transient());
        assert!(!ApiError::Unauthorized.is_transient());
        assert!(!ApiError::Rejected("no".to_string()).is_transient());
    }

    #[test]
    fn test_long_bodies_are_cut_on_char_boundary() {
        let body = "é".repeat(400);
        match ApiError::from_status(StatusCode::INTERNAL_SERVER_ERROR, &body) {
            ApiError::ServerError(msg) => {
                assert!(msg.ends_with("... (800 bytes)"));
                assert!(msg.len() < body.len());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
