//! Error taxonomy for the container lifecycle engine

use std::time::Duration;
use thiserror::Error;

/// Errors produced by the lifecycle engine and the backends it drives.
///
/// `New` converts any of these into a fatal test failure; accessor methods
/// on [`crate::handle::Handle`] (`inspect`, `exec`) return them to the
/// caller instead.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid container configuration: {0}")]
    ConfigInvalid(String),

    #[error("unknown backend: {0}")]
    BackendUnknown(String),

    #[error("failed to create container (image={image}, backend={backend}): {source}")]
    CreateFailed {
        image: String,
        backend: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("failed to inspect container {id}: {source}")]
    InspectFailed {
        id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("container not found: {0}")]
    NotFound(String),

    #[error("timed out after {elapsed:?} waiting for readiness: {message}")]
    WaitTimeout { elapsed: Duration, message: String },

    #[error("exec transport failure: {0}")]
    ExecTransportFailed(String),

    #[error("logs unavailable: {0}")]
    LogsUnavailable(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("cleanup failed: {0}")]
    CleanupFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wait_timeout_message_includes_elapsed_and_detail() {
        let err = Error::WaitTimeout {
            elapsed: Duration::from_secs(5),
            message: "needle not seen, tail: ...".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("5s"));
        assert!(msg.contains("needle not seen"));
    }

    #[test]
    fn backend_unknown_names_the_backend() {
        let err = Error::BackendUnknown("bogus".to_string());
        assert!(err.to_string().contains("bogus"));
    }
}
