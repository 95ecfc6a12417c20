//! Error types for the merge stage
//!
//! A partition merge either completes or fails fatally: there are no
//! internal retries and no partial results. Every variant here aborts the
//! partition; re-running a failed partition is the job of the outer
//! orchestration layer.

use thiserror::Error;

/// Error type for partition merging
#[derive(Error, Debug)]
pub enum MergeError {
    /// Malformed or inconsistent configuration, reported before any stream
    /// is opened
    #[error("Configuration error: {0}")]
    Config(String),

    /// A per-dataset input stream is corrupt or truncated
    #[error("Corrupt count stream for bank {bank}: {detail}")]
    StreamCorrupt {
        /// Index of the offending dataset
        bank: usize,
        /// What went wrong
        detail: String,
    },

    /// An accumulator rejected a record (e.g. abundance counter overflow)
    #[error("Accumulator error: {0}")]
    Accumulator(String),

    /// Underlying I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl MergeError {
    /// Shorthand for a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        MergeError::Config(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = MergeError::StreamCorrupt {
            bank: 3,
            detail: "file length not a multiple of record width".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("bank 3"));
        assert!(msg.contains("record width"));
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "eof");
        let err: MergeError = io.into();
        assert!(matches!(err, MergeError::Io(_)));
    }
}
