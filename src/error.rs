//! The primary error type for the BANG scanning engine.

use std::path::PathBuf;

/// Errors produced by the core scanning engine.
///
/// Mirrors the error kinds from the original Python implementation's error
/// handling design: a parser rejecting its input (`ParseFailure`, the
/// `UnpackParserException` analogue), a filesystem failure while carving a
/// child artifact (`ExtractionIo`), a malformed configuration at startup
/// (`Configuration`), and an unexpected panic inside a worker
/// (`WorkerPanic`). `QueueTimeout` from the spec's error catalogue is a
/// drain signal, not a propagated error, so it has no variant here; see
/// [`crate::workers`].
#[derive(Debug, thiserror::Error)]
pub enum BangError {
    /// A parser rejected its input. Recovered locally by the stage that
    /// tried it; the stage moves on to the next candidate.
    #[error("parser '{parser}' failed: {reason}")]
    ParseFailure { parser: String, reason: String },

    /// An I/O error occurred while carving or unpacking a child artifact.
    #[error("I/O error on '{path}': {source}")]
    ExtractionIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A malformed configuration (missing meta root, zero workers, ...).
    /// Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// An unexpected panic or unrecoverable error inside a worker thread.
    #[error("worker failed: {0}")]
    WorkerPanic(String),

    /// Serialization of a meta directory's `info` blob failed.
    #[error("failed to (de)serialize info.json at '{path}': {source}")]
    InfoSerde {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Plain I/O error with no specific path context.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl BangError {
    pub fn parse_failure(parser: impl Into<String>, reason: impl Into<String>) -> Self {
        BangError::ParseFailure {
            parser: parser.into(),
            reason: reason.into(),
        }
    }

    pub fn extraction_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BangError::ExtractionIo {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, BangError>;
