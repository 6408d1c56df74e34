use common::file_utils::SegmentValidationError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Object store error: {0}")]
    ObjectStore(#[from] object_store::Error),
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),
    #[error("Error log write failed: {0}")]
    ErrorLog(#[from] sqlx::Error),
    #[error("Invalid path segment {segment:?}: {reason}")]
    InvalidSegment {
        segment: String,
        reason: SegmentValidationError,
    },
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),
    #[error("Invalid backend descriptor: {0}")]
    InvalidDescriptor(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Reject ids and asset names that would escape their directory or key prefix
pub(crate) fn check_segment(segment: &str) -> Result<()> {
    common::file_utils::validate_segment(segment).map_err(|reason| StorageError::InvalidSegment {
        segment: segment.to_string(),
        reason,
    })
}
