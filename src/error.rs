//! Error taxonomy shared by the store, the correlator and the facade.
//!
//! Store failures are recovered locally wherever the contract allows it, so the
//! `Store*` variants mostly surface from `write`/`upsert` and in repair reports.
//! Correlator failures travel back to the caller of `submit`, which applies the
//! fallback-value policy.

use std::path::{Path, PathBuf};
use std::time::Duration;

pub type Result<T> = std::result::Result<T, SyncError>;

#[derive(Debug, Clone, thiserror::Error)]
pub enum SyncError {
    /// Missing endpoint, empty request id, or an unusable setting.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The job endpoint rejected the request or could not be reached.
    #[error("job submission failed: {0}")]
    Submission(String),

    /// Connection-level failure on the shared result stream.
    #[error("result stream error: {0}")]
    Stream(String),

    /// The server closed the result stream while this request was still waiting.
    #[error("result stream closed without a result for {request_id}")]
    StreamClosed { request_id: String },

    #[error("no result for {request_id} after {}s", .after.as_secs())]
    Timeout { request_id: String, after: Duration },

    /// A stream payload that could not be used for the request it named.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The generation service broadcast an explicit failure for this request.
    #[error("generation failed for {request_id}: {message}")]
    Service { request_id: String, message: String },

    #[error("request {0} is already in flight")]
    DuplicateRequest(String),

    #[error("store I/O error at {}: {reason}", .path.display())]
    StoreIo { path: PathBuf, reason: String },

    /// Always logged together with the repair that was applied.
    #[error("store corruption at {}: {reason}", .path.display())]
    StoreCorruption { path: PathBuf, reason: String },
}

impl SyncError {
    pub(crate) fn store_io(path: &Path, err: impl std::fmt::Display) -> Self {
        SyncError::StoreIo {
            path: path.to_path_buf(),
            reason: err.to_string(),
        }
    }

    pub(crate) fn corruption(path: &Path, reason: impl Into<String>) -> Self {
        SyncError::StoreCorruption {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_request_and_seconds() {
        let err = SyncError::Timeout {
            request_id: "hero_custom_title".into(),
            after: Duration::from_secs(45),
        };
        assert_eq!(err.to_string(), "no result for hero_custom_title after 45s");
    }

    #[test]
    fn store_errors_name_the_path() {
        let io = SyncError::store_io(Path::new("data/x.json"), "disk full");
        assert!(io.to_string().contains("data/x.json"));
        assert!(io.to_string().contains("disk full"));
    }
}
