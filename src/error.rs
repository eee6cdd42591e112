// In: src/error.rs

//! This module defines the single, unified error type for the entire batchline engine.
//! It uses the `thiserror` crate to provide ergonomic, context-aware error handling.
//!
//! Every failure a caller can observe is classified by [`ErrorKind`]; a pipeline run
//! resolves to exactly one terminal, classified error.

use thiserror::Error;

/// The coarse classification a caller uses to decide what to do with a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed, truncated or empty input, schema mismatch, out-of-range values.
    DataCorruption,
    /// An invariant inside the engine was violated. Always a bug.
    Internal,
    /// The engine was driven in an illegal order (e.g. feeding before draining).
    Precondition,
    /// The bound schema contains a type the selected format cannot express.
    Unsupported,
    /// The run was cancelled through its handle.
    Cancelled,
    /// A collaborator's byte source or sink failed.
    Io,
    /// Invalid configuration or an unknown format identifier.
    Config,
}

#[derive(Error, Debug)]
pub enum BatchlineError {
    // =========================================================================
    // === Engine Errors (the classified taxonomy)
    // =========================================================================
    #[error("Data corruption: {0}")]
    DataCorruption(String),

    #[error("Internal logic error (this is a bug): {0}")]
    InternalError(String),

    #[error("Precondition violated: {0}")]
    PreconditionViolation(String),

    #[error("Unsupported data type for this operation: {0}")]
    UnsupportedType(String),

    #[error("Unknown format identifier: {0}")]
    UnknownFormat(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Pipeline run was cancelled")]
    Cancelled,

    #[error("Pipeline execution failed at stage '{stage}': {source}")]
    PipelineError {
        stage: String,
        #[source]
        source: Box<BatchlineError>,
    },

    // =========================================================================
    // === External Error Wrappers (Using #[from] for automatic conversion)
    // =========================================================================
    /// An error originating from the Arrow library outside of a decode path.
    #[error("Arrow operation failed: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// An error originating from a byte source or sink.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An error from the Serde JSON library, typically while loading configuration.
    #[error("Serde JSON error: {0}")]
    SerdeJson(#[from] serde_json::Error),

    /// An error from the CSV writer.
    #[error("CSV writer error: {0}")]
    Csv(#[from] csv::Error),
}

pub type Result<T, E = BatchlineError> = std::result::Result<T, E>;

impl BatchlineError {
    /// Classifies this error. `PipelineError` reports the kind of its cause.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DataCorruption(_) => ErrorKind::DataCorruption,
            Self::InternalError(_) | Self::Arrow(_) | Self::Csv(_) => ErrorKind::Internal,
            Self::PreconditionViolation(_) => ErrorKind::Precondition,
            Self::UnsupportedType(_) => ErrorKind::Unsupported,
            Self::UnknownFormat(_) | Self::Config(_) | Self::SerdeJson(_) => ErrorKind::Config,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Io(_) => ErrorKind::Io,
            Self::PipelineError { source, .. } => source.kind(),
        }
    }

    /// Wraps this error with the name of the stage that raised it.
    /// Already-wrapped errors and cancellations are left untouched.
    pub fn at_stage(self, stage: &str) -> Self {
        match self {
            Self::PipelineError { .. } | Self::Cancelled => self,
            other => Self::PipelineError {
                stage: stage.to_string(),
                source: Box::new(other),
            },
        }
    }

    /// Builds an internal error and logs it as a bug signal at the point it is raised.
    pub(crate) fn internal(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        log::error!("internal invariant violated: {}", msg);
        Self::InternalError(msg)
    }

    /// Reclassifies an Arrow error raised while *decoding* as data corruption.
    pub(crate) fn corrupt_arrow(context: &str, err: arrow::error::ArrowError) -> Self {
        Self::DataCorruption(format!("{}: {}", context, err))
    }

    /// Reclassifies an Arrow error raised while *encoding* as an internal error.
    pub(crate) fn internal_arrow(context: &str, err: arrow::error::ArrowError) -> Self {
        Self::internal(format!("{}: {}", context, err))
    }

    /// Returns a copy suitable for forwarding to several participants.
    ///
    /// Wrapped library errors are not `Clone`; they are flattened into the message of
    /// the variant matching their kind.
    pub fn duplicate(&self) -> Self {
        match self {
            Self::DataCorruption(m) => Self::DataCorruption(m.clone()),
            Self::InternalError(m) => Self::InternalError(m.clone()),
            Self::PreconditionViolation(m) => Self::PreconditionViolation(m.clone()),
            Self::UnsupportedType(m) => Self::UnsupportedType(m.clone()),
            Self::UnknownFormat(m) => Self::UnknownFormat(m.clone()),
            Self::Config(m) => Self::Config(m.clone()),
            Self::Cancelled => Self::Cancelled,
            Self::PipelineError { stage, source } => Self::PipelineError {
                stage: stage.clone(),
                source: Box::new(source.duplicate()),
            },
            Self::Arrow(e) => Self::InternalError(e.to_string()),
            Self::Csv(e) => Self::InternalError(e.to_string()),
            Self::SerdeJson(e) => Self::Config(e.to_string()),
            Self::Io(e) => Self::Io(std::io::Error::new(e.kind(), e.to_string())),
        }
    }
}
