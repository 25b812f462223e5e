use crate::operation::{Operation, Target};
use crate::types::ArchiveJobId;
use thiserror::Error;

/// Store-layer error type.
pub type StoreError = Box<dyn std::error::Error + Send + Sync>;

/// Crate result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// Store error wrapper.
    #[error("store error: {0}")]
    Store(#[source] StoreError),
    /// Invalid identifier input.
    #[error("invalid id: {0}")]
    InvalidId(String),
    /// Invalid operation input.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
    /// Rejected input value.
    #[error("validation failed: {0}")]
    Validation(String),
    /// The resolver denied the operation.
    #[error("operation {operation} denied on {target}")]
    Denied { operation: Operation, target: Target },
    /// Resource, grant or token is absent.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    /// Archive job is still being built.
    #[error("archive job {0} is not ready")]
    NotReady(ArchiveJobId),
    /// Archive job build did not complete.
    #[error("archive job {id} failed: {reason}")]
    ArchiveFailed { id: ArchiveJobId, reason: String },
    /// A cascade step failed after earlier steps were applied.
    #[error("cascade stopped at step {step}: {source}")]
    PartialFailure {
        step: &'static str,
        #[source]
        source: Box<Error>,
    },
    /// External compression failed.
    #[error("compression failed: {0}")]
    Compression(String),
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Zip writer error.
    #[error("archive error: {0}")]
    Archive(#[from] zip::result::ZipError),
}

impl Error {
    pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    /// Returns true for [`Error::NotFound`].
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<StoreError> for Error {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}
