//! Error taxonomy shared by every layer of the harness.
//!
//! Violations are raised where they are detected and never retried. Delegated
//! worker failures are wrapped once in [`Error::Delegation`] so the caller sees
//! a single failure value that still carries the root cause.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Failure categories surfaced by sandboxes, registries, models and tools.
#[derive(Debug, Error)]
pub enum Error {
    /// Missing sandbox, worker, file, or schema.
    #[error("not found: {0}")]
    NotFound(String),

    /// Path escapes a root, disallowed suffix, read-only violation, or a
    /// delegation the caller is not allowed to make.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Attachment count/size or content size over its ceiling.
    #[error("size exceeded: {0}")]
    SizeExceeded(String),

    /// Malformed JSON, schema validation failure, bad configuration.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Provider API error or a model that never produced a final answer.
    #[error("model failure: {0}")]
    ModelFailure(String),

    /// User quit at an approval prompt or interrupted the run.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// A delegated worker failed; `source` is the failure inside it.
    #[error("worker '{worker}' failed: {source}")]
    Delegation {
        worker: String,
        #[source]
        source: Box<Error>,
    },

    /// I/O and other failures carrying an `anyhow` context chain.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Flat classification used for exit diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    PermissionDenied,
    SizeExceeded,
    InvalidInput,
    ModelFailure,
    Cancelled,
    Other,
}

impl Error {
    /// Kind of the root cause; delegation wrappers are looked through.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::SizeExceeded(_) => ErrorKind::SizeExceeded,
            Error::InvalidInput(_) => ErrorKind::InvalidInput,
            Error::ModelFailure(_) => ErrorKind::ModelFailure,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Delegation { source, .. } => source.kind(),
            Error::Other(_) => ErrorKind::Other,
        }
    }

    pub fn delegation(worker: impl Into<String>, source: Error) -> Self {
        Error::Delegation {
            worker: worker.into(),
            source: Box::new(source),
        }
    }

    /// Copy of a classified error, used when an error has to cross a library
    /// boundary that only hands back references (template rendering).
    pub(crate) fn shallow_clone(&self) -> Error {
        match self {
            Error::NotFound(msg) => Error::NotFound(msg.clone()),
            Error::PermissionDenied(msg) => Error::PermissionDenied(msg.clone()),
            Error::SizeExceeded(msg) => Error::SizeExceeded(msg.clone()),
            Error::InvalidInput(msg) => Error::InvalidInput(msg.clone()),
            Error::ModelFailure(msg) => Error::ModelFailure(msg.clone()),
            Error::Cancelled(msg) => Error::Cancelled(msg.clone()),
            Error::Delegation { worker, source } => Error::delegation(worker, source.shallow_clone()),
            Error::Other(err) => Error::Other(anyhow::anyhow!("{err:#}")),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InvalidInput(format!("malformed JSON: {err}"))
    }
}
