//! Error types for the trace analyzer.
//!
//! Decode and I/O failures are fatal for the file they occur in and for
//! that file only; the driver logs one diagnostic and moves on to the
//! next trace.

use std::path::PathBuf;
use thiserror::Error;

/// Primary error type for the trace analyzer.
#[derive(Debug, Error)]
pub enum AnalyzerError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A record started but the file ended before its body was complete.
    #[error("Truncated record: tag {tag} at offset {offset} ends mid-record")]
    TruncatedRecord { tag: u8, offset: u64 },

    /// A record started with a tag byte outside the known set.
    #[error("Unknown record tag {value} at offset {offset}")]
    UnknownTag { value: u8, offset: u64 },

    /// A translation record declares more instructions than the file can hold.
    #[error("Oversized translation record: {icount} instruction classes, {remaining} bytes remaining")]
    OversizedRecord { icount: u32, remaining: u64 },

    /// The input path is not a scannable directory.
    #[error("Not a directory: {path}")]
    NotADirectory { path: PathBuf },
}

/// Result type alias for analyzer operations.
pub type Result<T> = std::result::Result<T, AnalyzerError>;

impl AnalyzerError {
    /// True for malformed-input errors, as opposed to plain I/O failures.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            AnalyzerError::TruncatedRecord { .. }
                | AnalyzerError::UnknownTag { .. }
                | AnalyzerError::OversizedRecord { .. }
        )
    }
}
