use shared::error::ApiError;
use thiserror::Error;

/// Failure of a single transport call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("realtime connection is not established")]
    Disconnected,
    #[error("connection closed before a reply arrived")]
    Closed,
    #[error("server rejected the request: {0}")]
    Rejected(ApiError),
    #[error("server unreachable: {0}")]
    Unreachable(String),
    #[error("unexpected response: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn api_error(&self) -> Option<&ApiError> {
        match self {
            Self::Rejected(error) => Some(error),
            _ => None,
        }
    }
}

/// Why a locally sent message ended up failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// Do not retry immediately.
    #[error("slow down: {0}")]
    RateLimited(String),
    #[error("rejected: {0}")]
    Rejected(ApiError),
    #[error("server unreachable: {0}")]
    Unreachable(String),
    #[error("no local message with client id {0}")]
    UnknownMessage(String),
    #[error("message {0} has not failed")]
    NotRetryable(String),
}

impl DeliveryError {
    pub fn from_api(error: ApiError) -> Self {
        if error.code.is_transient() {
            Self::RateLimited(error.message)
        } else {
            Self::Rejected(error)
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, Self::RateLimited(_))
    }
}

impl From<TransportError> for DeliveryError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Rejected(error) => Self::from_api(error),
            other => Self::Unreachable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::error::ErrorCode;

    #[test]
    fn only_transient_rejections_classify_as_rate_limited() {
        let slow = DeliveryError::from(TransportError::Rejected(ApiError::new(
            ErrorCode::RateLimited,
            "slow down, retry in 800ms",
        )));
        assert_eq!(slow, DeliveryError::RateLimited("slow down, retry in 800ms".into()));
        assert!(slow.is_rate_limited());

        let locked = ApiError::forbidden("thread is locked");
        let rejected = DeliveryError::from(TransportError::Rejected(locked.clone()));
        assert_eq!(rejected, DeliveryError::Rejected(locked));
        assert!(!rejected.is_rate_limited());

        let gone = DeliveryError::from(TransportError::Closed);
        assert!(matches!(gone, DeliveryError::Unreachable(_)));
    }
}
