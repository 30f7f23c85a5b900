//! Core error types
//!
//! Re-exports agentbench-error and provides conversions for provider failures.

pub use agentbench_error::{Error, ErrorKind, ErrorStatus, Result};

use crate::provider::ProviderError;

/// Convert a provider failure into the unified error at the loop boundary.
pub fn from_provider(err: ProviderError) -> Error {
    let kind = match &err {
        ProviderError::RateLimited { .. } => ErrorKind::RateLimited,
        ProviderError::AuthenticationFailed => ErrorKind::AuthenticationFailed,
        ProviderError::ModelNotFound(_) | ProviderError::InvalidRequest(_) => {
            ErrorKind::ConfigInvalid
        }
        _ => ErrorKind::Transport,
    };
    let message = err.to_string();
    Error::new(kind, message)
        .with_operation("provider")
        .set_source(err)
}

/// Create a SerializationFailed error from a serde_json failure
pub fn serialization(err: serde_json::Error) -> Error {
    Error::serialization_failed(err.to_string()).set_source(err)
}
