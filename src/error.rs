use thiserror::Error;

use brigade_gateway::GatewayError;
use brigade_identity::IdentityError;
use brigade_realtime::RealtimeError;
use brigade_storage::StorageError;

use crate::config::ConfigError;

/// Result type
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error for the back-office client. Variants keep the source
/// error intact so callers can still match on service-specific details.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Realtime error: {0}")]
    Realtime(#[from] RealtimeError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// The request was rejected for identity or authorization reasons.
    /// Re-authenticating (or a role change) is the way out, not a retry.
    pub fn is_auth(&self) -> bool {
        match self {
            Error::Identity(IdentityError::ApiError(_))
            | Error::Identity(IdentityError::MissingSession) => true,
            Error::Gateway(e) => e.is_policy_rejection(),
            _ => false,
        }
    }

    /// The failure is transient and a manual retry may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::Identity(IdentityError::NetworkError(_)) => true,
            Error::Gateway(e) => e.is_transient(),
            Error::Realtime(RealtimeError::WebSocketError(_))
            | Error::Realtime(RealtimeError::ConnectionError(_)) => true,
            Error::Storage(StorageError::NetworkError(_)) => true,
            _ => false,
        }
    }

    /// The deployment itself is wrong (missing env var, missing bucket).
    /// Surfaced at startup; never retried.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Storage(StorageError::BucketMissing(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_session_counts_as_auth() {
        let err = Error::from(IdentityError::MissingSession);
        assert!(err.is_auth());
        assert!(!err.is_transient());
    }

    #[test]
    fn missing_bucket_counts_as_config() {
        let err = Error::from(StorageError::BucketMissing("menu-images".to_string()));
        assert!(err.is_config());
        assert!(!err.is_auth());
    }

    #[test]
    fn validation_is_terminal() {
        let err = Error::validation("price must have at most two decimal places");
        assert!(!err.is_auth());
        assert!(!err.is_transient());
        assert!(!err.is_config());
    }
}
