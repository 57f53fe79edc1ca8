use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::payload::Payload;
use crate::temporal::Timestamp;

/// `prev_hash` of the first entry in a chain.
pub const GENESIS: &str = "GENESIS";

/// Longest accepted `actor`, in characters.
pub const MAX_ACTOR_LEN: usize = 100;

/// Longest accepted `action`, in characters.
pub const MAX_ACTION_LEN: usize = 200;

/// One committed, hash-linked ledger record.
///
/// Entries are created only by a store's `append`; `id`, `timestamp`,
/// `prev_hash`, and `hash` are never caller-supplied. Once committed an entry
/// is never updated or deleted. Corrections are new entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    /// Store-assigned, strictly increasing with insertion order.
    pub id: u64,
    pub timestamp: Timestamp,
    pub actor: String,
    pub action: String,
    pub data: Option<Payload>,
    /// Hash of the preceding entry, or [`GENESIS`].
    pub prev_hash: String,
    /// Hex digest binding `prev_hash`, `timestamp`, `actor`, `action`, and `data`.
    pub hash: String,
}

impl LedgerEntry {
    /// Returns `true` if this entry claims to start the chain.
    pub fn is_genesis(&self) -> bool {
        self.prev_hash == GENESIS
    }

    /// First 12 hex digits of the hash, for display.
    pub fn short_hash(&self) -> &str {
        self.hash.get(..12).unwrap_or(&self.hash)
    }
}

/// Caller-owned fields of an entry, validated.
#[derive(Clone, Debug, PartialEq)]
pub struct NewEntry {
    actor: String,
    action: String,
    data: Option<Payload>,
}

impl NewEntry {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        data: Option<Payload>,
    ) -> Result<Self, ValidationError> {
        let actor = actor.into();
        let action = action.into();
        validate_label("actor", &actor, MAX_ACTOR_LEN)?;
        validate_label("action", &action, MAX_ACTION_LEN)?;
        Ok(Self {
            actor,
            action,
            data,
        })
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn data(&self) -> Option<&Payload> {
        self.data.as_ref()
    }

    /// Attach the store-owned fields, producing the committed record.
    pub fn into_entry(self, id: u64, timestamp: Timestamp, prev_hash: String, hash: String) -> LedgerEntry {
        LedgerEntry {
            id,
            timestamp,
            actor: self.actor,
            action: self.action,
            data: self.data,
            prev_hash,
            hash,
        }
    }
}

fn validate_label(field: &'static str, value: &str, max: usize) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::Empty { field });
    }
    let actual = value.chars().count();
    if actual > max {
        return Err(ValidationError::TooLong { field, max, actual });
    }
    if value.chars().any(char::is_control) {
        return Err(ValidationError::ControlCharacter { field });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_conventional_input() {
        let e = NewEntry::new("AI:Accountant", "t1", Some(Payload::new().with("v", 1))).unwrap();
        assert_eq!(e.actor(), "AI:Accountant");
        assert_eq!(e.action(), "t1");
        assert_eq!(e.data().unwrap().len(), 1);
    }

    #[test]
    fn rejects_empty_fields() {
        assert_eq!(
            NewEntry::new("", "t1", None).unwrap_err(),
            ValidationError::Empty { field: "actor" }
        );
        assert_eq!(
            NewEntry::new("AI:Accountant", "   ", None).unwrap_err(),
            ValidationError::Empty { field: "action" }
        );
    }

    #[test]
    fn rejects_overlong_fields() {
        let long_actor = "a".repeat(MAX_ACTOR_LEN + 1);
        assert_eq!(
            NewEntry::new(long_actor, "t1", None).unwrap_err(),
            ValidationError::TooLong {
                field: "actor",
                max: MAX_ACTOR_LEN,
                actual: MAX_ACTOR_LEN + 1
            }
        );
        let max_action = "x".repeat(MAX_ACTION_LEN);
        assert!(NewEntry::new("AI:Controller", max_action, None).is_ok());
    }

    #[test]
    fn rejects_control_characters() {
        assert_eq!(
            NewEntry::new("AI:CFO", "close\nbooks", None).unwrap_err(),
            ValidationError::ControlCharacter { field: "action" }
        );
    }

    #[test]
    fn into_entry_keeps_caller_fields() {
        let ts = Timestamp::now();
        let entry = NewEntry::new("Human:jo@acme.com", "real_world_event", None)
            .unwrap()
            .into_entry(1, ts, GENESIS.into(), "ab".repeat(32));
        assert!(entry.is_genesis());
        assert_eq!(entry.id, 1);
        assert_eq!(entry.short_hash(), "abababababab");
        assert!(entry.data.is_none());
    }
}
