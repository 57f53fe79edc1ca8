use thiserror::Error;

/// Input rejected before it reaches a store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    Empty { field: &'static str },

    #[error("{field} exceeds {max} characters (got {actual})")]
    TooLong {
        field: &'static str,
        max: usize,
        actual: usize,
    },

    #[error("{field} contains control characters")]
    ControlCharacter { field: &'static str },

    #[error("payload must be a JSON object, got {found}")]
    NotAnObject { found: &'static str },

    #[error("payload is not serializable: {0}")]
    Serialization(String),

    #[error("invalid timestamp {value:?}: {reason}")]
    InvalidTimestamp { value: String, reason: String },
}
