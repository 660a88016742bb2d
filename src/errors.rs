//! Error handling for the sundown library.
//!
//! One structured enum covers the failure categories a version query can
//! hit; constructor helpers and `From` impls keep call sites on the `?`
//! operator.

use thiserror::Error;

/// Main error type for the sundown library.
///
/// Transport and decode failures degrade a query cycle without touching
/// stored state; store failures are the only category that reaches hosts
/// as an `Err`.
#[derive(Error, Debug)]
pub enum SundownError {
    #[error("Transport operation failed: {operation}")]
    Transport {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Descriptor decode failed: {context}")]
    Decode {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Store operation failed: {operation} - {source}")]
    Store {
        operation: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

/// Type alias for Result with SundownError.
pub type SundownResult<T> = Result<T, SundownError>;

impl SundownError {
    /// Create a transport error
    pub fn transport(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Transport {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create a decode error
    pub fn decode(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Decode {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Create a store error
    pub fn store(
        operation: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Store {
            operation: operation.into(),
            source: Box::new(source),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

/// Convert from sled errors
impl From<sled::Error> for SundownError {
    fn from(err: sled::Error) -> Self {
        SundownError::store("sled_operation", err)
    }
}

/// Convert from serde_json errors
impl From<serde_json::Error> for SundownError {
    fn from(err: serde_json::Error) -> Self {
        SundownError::decode("json_document", err)
    }
}

/// Convert from reqwest errors
impl From<reqwest::Error> for SundownError {
    fn from(err: reqwest::Error) -> Self {
        SundownError::transport("http_request", err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let store_err = SundownError::store(
            "open_tree",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert!(store_err.to_string().contains("Store operation failed"));

        let internal_err = SundownError::internal("completion task gone");
        assert!(internal_err.to_string().contains("Internal error"));
    }

    #[test]
    fn test_error_chaining() {
        use std::error::Error;

        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = SundownError::decode("version descriptor", json_err);

        assert!(err.source().is_some());
        assert!(err.to_string().contains("Descriptor decode failed"));
    }

    #[test]
    fn test_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let err: SundownError = json_err.into();
        assert!(matches!(err, SundownError::Decode { .. }));
    }
}
