//! Pipeline error taxonomy
//!
//! Exactly one [`ProcessingError`] decides the outcome of a failed message.
//! Staleness is not an error (see [`crate::storage::WriteOutcome`]) and
//! failures of the dead-letter router, telemetry or payload tracker never
//! surface here.

use crate::codec::ParseError;
use crate::storage::StorageError;
use crate::types::OrgId;

/// Coarse classification of a fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Message is unprocessable as-is
    Parse,
    /// Message was rejected by configuration
    Policy,
    /// Store refused or failed a write
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::Policy => write!(f, "policy"),
            ErrorKind::Storage => write!(f, "storage"),
        }
    }
}

/// Fatal per-message failure.
#[derive(Debug, thiserror::Error)]
pub enum ProcessingError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("organization ID {0} is not in allow list")]
    OrganizationNotAllowed(OrgId),

    #[error("error marshalling report: {0}")]
    Serialization(#[source] serde_json::Error),

    #[error("error parsing date '{value}' from message: {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("error writing {step} to database: {source}")]
    StoreWriteFailed {
        step: &'static str,
        #[source]
        source: StorageError,
    },
}

impl ProcessingError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProcessingError::Parse(_)
            | ProcessingError::Serialization(_)
            | ProcessingError::InvalidTimestamp { .. } => ErrorKind::Parse,
            ProcessingError::OrganizationNotAllowed(_) => ErrorKind::Policy,
            ProcessingError::StoreWriteFailed { .. } => ErrorKind::Storage,
        }
    }

    /// Whether re-delivering the same message could succeed.
    ///
    /// Poison messages (parse and policy failures) never will.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Storage
    }

    pub(crate) fn store(step: &'static str, source: StorageError) -> Self {
        ProcessingError::StoreWriteFailed { step, source }
    }
}
