use forge_overlay_core::OverlayError;

use crate::hash::ContentHash;

/// Why an adjudication was refused as stale. Nothing is written in any case.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    /// The source now holds different content than the reviewer was shown.
    HashMismatch {
        expected: ContentHash,
        actual: ContentHash,
    },
    /// The entity left the source store after the drift report was produced.
    EntityMissing { expected: ContentHash },
    /// Another adjudication committed for this entity after the reviewer's view.
    RevisionMismatch { expected: i64, actual: i64 },
}

impl std::fmt::Display for StaleReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StaleReason::HashMismatch { expected, actual } => write!(
                f,
                "content changed (expected={}, actual={})",
                expected.short(),
                actual.short()
            ),
            StaleReason::EntityMissing { expected } => {
                write!(f, "entity no longer in source (expected={})", expected.short())
            }
            StaleReason::RevisionMismatch { expected, actual } => {
                write!(f, "ledger revision moved (expected={expected}, actual={actual})")
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ReconError {
    #[error("source store unavailable at {location}: {reason}")]
    SourceUnavailable { location: String, reason: String },
    #[error("stale adjudication for '{entity_id}': {reason}; re-run drift before retrying")]
    StaleAdjudication {
        entity_id: String,
        reason: StaleReason,
    },
    #[error("malformed attributes for '{entity_id}': {reason}")]
    MalformedAttributes { entity_id: String, reason: String },
    #[error("ledger write failed for '{entity_id}': {source}")]
    LedgerWriteFailure {
        entity_id: String,
        #[source]
        source: OverlayError,
    },
    #[error("ledger unavailable: {0}")]
    LedgerUnavailable(#[source] OverlayError),
    #[error("unknown entity '{0}'")]
    UnknownEntity(String),
    #[error("unknown project '{0}'")]
    UnknownProject(String),
    #[error("invalid overlay record: {0}")]
    InvalidInput(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ReconError {
    pub(crate) fn source_unavailable(location: impl Into<String>, reason: impl ToString) -> Self {
        ReconError::SourceUnavailable {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_stale(&self) -> bool {
        matches!(self, ReconError::StaleAdjudication { .. })
    }
}

impl From<OverlayError> for ReconError {
    fn from(value: OverlayError) -> Self {
        match value {
            OverlayError::InvalidInput(reason) => ReconError::InvalidInput(reason),
            other => ReconError::LedgerUnavailable(other),
        }
    }
}

pub type Result<T, E = ReconError> = std::result::Result<T, E>;
