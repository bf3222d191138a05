//! Error types for detection.
//!
//! Every failure the classifier can hit maps onto one [`ErrorKind`] tag, so a
//! cancelled detection is never reported as if the file were unreadable.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Tag carried alongside an error message in a [`crate::DetectionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ReadFailure,
    ProbeFailure,
    Cancelled,
    EmptyInput,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ReadFailure => write!(f, "read_failure"),
            ErrorKind::ProbeFailure => write!(f, "probe_failure"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::EmptyInput => write!(f, "empty_input"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DetectError {
    /// The header could not be read (missing file, permissions, I/O).
    #[error("Detection failed with error: {path}: {source}")]
    ReadFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The open-probe errored, timed out, or its task died.
    #[error("Probe failed: {0}")]
    ProbeFailure(String),

    #[error("detection cancelled")]
    Cancelled,

    #[error("no file path given")]
    EmptyInput,
}

impl DetectError {
    pub fn read(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        DetectError::ReadFailure {
            path: path.into(),
            source,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DetectError::ReadFailure { .. } => ErrorKind::ReadFailure,
            DetectError::ProbeFailure(_) => ErrorKind::ProbeFailure,
            DetectError::Cancelled => ErrorKind::Cancelled,
            DetectError::EmptyInput => ErrorKind::EmptyInput,
        }
    }
}

pub type Result<T> = std::result::Result<T, DetectError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_tags() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(DetectError::read("/x.db", io).kind(), ErrorKind::ReadFailure);
        assert_eq!(
            DetectError::ProbeFailure("boom".into()).kind(),
            ErrorKind::ProbeFailure
        );
        assert_eq!(DetectError::Cancelled.kind(), ErrorKind::Cancelled);
        assert_eq!(DetectError::EmptyInput.kind(), ErrorKind::EmptyInput);
    }

    #[test]
    fn test_read_failure_keeps_underlying_message() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let msg = DetectError::read("/secret.db", io).to_string();
        assert!(msg.contains("/secret.db"), "{msg}");
        assert!(msg.contains("access denied"), "{msg}");
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ReadFailure).unwrap();
        assert_eq!(json, "\"read_failure\"");
        assert_eq!(ErrorKind::Cancelled.to_string(), "cancelled");
    }
}
