use cmp_types::ValidationError;

/// Errors produced by ledger operations.
///
/// A broken hash chain is not an error; see [`cmp_crypto::ChainStatus`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("invalid input: {0}")]
    Validation(#[from] ValidationError),

    #[error("append conflicted with a concurrent writer after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("storage error: {0}")]
    Storage(String),

    #[error("entry {id} not found")]
    NotFound { id: u64 },

    #[error("stored entry {id} cannot be decoded: {reason}")]
    Corrupt { id: u64, reason: String },

    #[error("ledger service has stopped")]
    ServiceStopped,

    #[error("config error: {0}")]
    Config(String),
}

impl LedgerError {
    /// Whether the immediate caller may simply retry the same operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_conflicts_are_retryable() {
        assert!(LedgerError::Conflict { attempts: 5 }.is_retryable());
        assert!(!LedgerError::Storage("disk full".into()).is_retryable());
        assert!(!LedgerError::Validation(ValidationError::Empty { field: "actor" }).is_retryable());
    }

    #[test]
    fn validation_converts() {
        let e: LedgerError = ValidationError::Empty { field: "action" }.into();
        assert_eq!(e.to_string(), "invalid input: action must not be empty");
    }
}
