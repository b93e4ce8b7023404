use std::time::Duration;

/// Failures of the external generative text service.
///
/// None of these ever reach the trainee: the classifier degrades to its rule
/// cascade and response generation walks its fallback tiers. The variants
/// exist so logs can tell a throttled upstream from a broken one.
#[derive(Clone, Debug, thiserror::Error)]
pub enum GatewayError {
    // Upstream rejected the request outright
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // Transient upstream trouble
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("network error: {0}")]
    NetworkError(String),
    #[error("empty response")]
    EmptyResponse,

    // Local conditions
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("cancelled")]
    Cancelled,
    #[error("conversation context already closed")]
    ContextClosed,
    #[error("generative backend unavailable: {0}")]
    Unavailable(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ServerError { .. }
                | Self::NetworkError(_)
                | Self::EmptyResponse
                | Self::Timeout(_)
        )
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::AuthenticationFailed(_) | Self::InvalidRequest(_) | Self::Unavailable(_)
        )
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited { .. } => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::EmptyResponse => "empty_response",
            Self::Timeout(_) => "timeout",
            Self::Cancelled => "cancelled",
            Self::ContextClosed => "context_closed",
            Self::Unavailable(_) => "unavailable",
        }
    }

    /// Classify an HTTP status code into the appropriate error variant.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 | 422 => Self::InvalidRequest(body),
            429 => Self::RateLimited { retry_after: None },
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(GatewayError::RateLimited { retry_after: None }.is_retryable());
        assert!(GatewayError::ServerError { status: 503, body: "down".into() }.is_retryable());
        assert!(GatewayError::NetworkError("reset".into()).is_retryable());
        assert!(GatewayError::Timeout(Duration::from_secs(20)).is_retryable());
        assert!(GatewayError::EmptyResponse.is_retryable());
    }

    #[test]
    fn fatal_classification() {
        assert!(GatewayError::AuthenticationFailed("bad key".into()).is_fatal());
        assert!(GatewayError::InvalidRequest("bad".into()).is_fatal());
        assert!(GatewayError::Unavailable("offline".into()).is_fatal());
        assert!(!GatewayError::Cancelled.is_fatal());
        assert!(!GatewayError::ContextClosed.is_retryable());
    }

    #[test]
    fn from_status_mapping() {
        assert!(GatewayError::from_status(401, "unauthorized".into()).is_fatal());
        assert!(GatewayError::from_status(400, "bad request".into()).is_fatal());
        assert!(GatewayError::from_status(429, "slow down".into()).is_retryable());
        assert!(matches!(
            GatewayError::from_status(502, "bad gateway".into()),
            GatewayError::ServerError { status: 502, .. }
        ));
        assert!(matches!(
            GatewayError::from_status(302, "moved".into()),
            GatewayError::InvalidRequest(msg) if msg.contains("302")
        ));
    }

    #[test]
    fn error_kind_strings() {
        assert_eq!(GatewayError::Cancelled.error_kind(), "cancelled");
        assert_eq!(GatewayError::EmptyResponse.error_kind(), "empty_response");
        assert_eq!(
            GatewayError::Timeout(Duration::from_millis(10)).error_kind(),
            "timeout"
        );
    }

    #[test]
    fn display_messages() {
        let err = GatewayError::ServerError { status: 500, body: "boom".into() };
        assert_eq!(err.to_string(), "server error 500: boom");
        let err = GatewayError::Unavailable("no endpoint configured".into());
        assert_eq!(err.to_string(), "generative backend unavailable: no endpoint configured");
    }
}
