//! Error types for the segmentation pipeline.
//!
//! Errors are strongly typed using `thiserror` so callers can match on the
//! failure category: input-validation, format, integration (producer
//! contract violation), and I/O. Data-inconsistency conditions (a way or
//! node referenced by the segment store but missing from a cache) are *not*
//! modeled as errors here: they are logged and counted, see
//! [`crate::skip::SkipCounters`].

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Input validation failures: bad CLI arguments, missing files, wrong file
/// kind.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required input path does not exist.
    #[error("path does not exist: {path}")]
    MissingPath {
        /// The path that was expected to exist.
        path: PathBuf,
    },

    /// A path was expected to be a file but is a directory (or vice versa).
    #[error("expected a file, found a directory: {path}")]
    NotAFile {
        /// The offending path.
        path: PathBuf,
    },

    /// An output already exists and `--force` was not given.
    #[error("output already exists (pass --force to overwrite): {path}")]
    OutputExists {
        /// The existing output path.
        path: PathBuf,
    },

    /// A configuration value is out of its valid range.
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Human-readable reason.
        reason: String,
    },
}

/// On-disk format failures: bad magic, unsupported version, truncated
/// records, malformed cache/relation files.
#[derive(Debug, Error)]
pub enum FormatError {
    /// The file does not start with the expected magic bytes.
    #[error("bad magic bytes in {path}: expected {expected:?}, found {found:?}")]
    BadMagic {
        /// File being read.
        path: PathBuf,
        /// Expected magic bytes.
        expected: &'static [u8],
        /// Magic bytes actually found.
        found: Vec<u8>,
    },

    /// The file declares a version this build does not support.
    #[error("unsupported version {found} in {path} (expected {expected})")]
    UnsupportedVersion {
        /// File being read.
        path: PathBuf,
        /// Version this build supports.
        expected: u8,
        /// Version found on disk.
        found: u8,
    },

    /// A record ended before all of its declared fields could be read.
    #[error("truncated record in {path}: {detail}")]
    TruncatedRecord {
        /// File being read.
        path: PathBuf,
        /// What was being decoded when the stream ran out.
        detail: String,
    },

    /// A relation-cache text line did not match the expected grammar.
    #[error("malformed relation cache line in {path}: {line:?}")]
    MalformedLine {
        /// File being read.
        path: PathBuf,
        /// The offending line.
        line: String,
    },

    /// An operation was attempted that the file's access mode does not
    /// support (e.g. point lookup on a streaming-only segment-store
    /// reader).
    #[error("unsupported operation on {path}: {operation}")]
    UnsupportedOperation {
        /// File the operation was attempted against.
        path: PathBuf,
        /// Name of the unsupported operation.
        operation: &'static str,
    },
}

/// Contract violations by the external segment producer (see
/// [`crate::capture::SegmentProducer`]): paired `pre`/`commit` callbacks
/// that do not arrive in strict FIFO order.
#[derive(Debug, Error)]
pub enum IntegrationError {
    /// `commit` was called with no matching `pre` pending.
    #[error("commit() called with no pending segment for base way {base_way_id}")]
    CommitWithoutPre {
        /// Base way the orphan commit referred to.
        base_way_id: i64,
    },

    /// The producer's stream ended with pending `pre` records that were
    /// never committed.
    #[error("segment producer stream ended with {pending} uncommitted segment(s) pending")]
    PendingAtEndOfStream {
        /// Number of pre-records still queued.
        pending: usize,
    },
}

/// Top-level error type for the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Input validation failed.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// An on-disk artifact is malformed or uses an unsupported format.
    #[error(transparent)]
    Format(#[from] FormatError),

    /// The external segment producer violated its callback contract.
    #[error(transparent)]
    Integration(#[from] IntegrationError),

    /// Underlying I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias used throughout the pipeline.
pub type PipelineResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_output_exists() {
        let err = ValidationError::OutputExists {
            path: PathBuf::from("/tmp/out.rseg"),
        };
        let msg = format!("{err}");
        assert!(msg.contains("--force"));
    }

    #[test]
    fn test_format_error_bad_magic() {
        let err = FormatError::BadMagic {
            path: PathBuf::from("nodes.bin"),
            expected: b"RNOD",
            found: b"XXXX".to_vec(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("RNOD"));
    }

    #[test]
    fn test_integration_error_pending_at_eof() {
        let err = IntegrationError::PendingAtEndOfStream { pending: 3 };
        let msg = format!("{err}");
        assert!(msg.contains('3'));
    }

    #[test]
    fn test_pipeline_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "missing");
        let pipeline_err: PipelineError = io_err.into();
        assert!(matches!(pipeline_err, PipelineError::Io(_)));
    }

    #[test]
    fn test_pipeline_error_from_validation() {
        let err: PipelineError = ValidationError::NotAFile {
            path: PathBuf::from("/tmp"),
        }
        .into();
        assert!(matches!(err, PipelineError::Validation(_)));
    }
}
