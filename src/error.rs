/// Error type shared by every layer of the bridge.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Config error: {0}")]
    Config(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Upstream error: status={status}, message={message}")]
    Upstream { status: u16, message: String },
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("Protocol translation error: {0}")]
    Translation(String),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Broad error category recorded on failure reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    InvalidRequest,
    Authentication,
    Permission,
    RateLimit,
    ServerError,
    Network,
    Unknown,
}

/// Map an upstream HTTP status code to an error category.
#[must_use]
pub fn category_from_upstream_status(status: u16) -> ErrorCategory {
    match status {
        400 | 404 | 422 => ErrorCategory::InvalidRequest,
        401 => ErrorCategory::Authentication,
        403 => ErrorCategory::Permission,
        429 => ErrorCategory::RateLimit,
        500..=599 => ErrorCategory::ServerError,
        _ => ErrorCategory::Unknown,
    }
}

impl BridgeError {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            BridgeError::InvalidRequest(_) => ErrorCategory::InvalidRequest,
            BridgeError::Transport(_) | BridgeError::Timeout(_) => ErrorCategory::Network,
            BridgeError::Config(_) | BridgeError::Translation(_) | BridgeError::Internal(_) => {
                ErrorCategory::Unknown
            }
            BridgeError::Upstream { status, .. } => category_from_upstream_status(*status),
        }
    }

    /// HTTP status carried by an upstream rejection, if any.
    #[must_use]
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            BridgeError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for BridgeError {
    fn from(err: reqwest::Error) -> Self {
        // reqwest's Display hides the io cause ("connection refused") in the source chain.
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        if err.is_timeout() {
            BridgeError::Timeout(message)
        } else {
            BridgeError::Transport(message)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_from_status() {
        assert_eq!(
            category_from_upstream_status(400),
            ErrorCategory::InvalidRequest
        );
        assert_eq!(category_from_upstream_status(429), ErrorCategory::RateLimit);
        assert_eq!(category_from_upstream_status(503), ErrorCategory::ServerError);
        assert_eq!(category_from_upstream_status(418), ErrorCategory::Unknown);
    }

    #[test]
    fn test_timeout_is_network_category() {
        let err = BridgeError::Timeout("deadline elapsed".into());
        assert_eq!(err.category(), ErrorCategory::Network);
        assert_eq!(err.upstream_status(), None);
    }

    #[test]
    fn test_upstream_display() {
        let err = BridgeError::Upstream {
            status: 400,
            message: "bad tool schema".into(),
        };
        assert_eq!(
            err.to_string(),
            "Upstream error: status=400, message=bad tool schema"
        );
        assert_eq!(err.upstream_status(), Some(400));
    }
}
