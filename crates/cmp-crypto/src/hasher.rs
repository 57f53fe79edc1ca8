use cmp_types::{LedgerEntry, Payload, Timestamp};

use crate::canonical::canonicalize;

/// Domain-separated BLAKE3 hasher for ledger entries.
///
/// The hashed byte sequence is the domain tag, a `:`, then the five fields
/// in fixed order: `prev_hash`, canonical timestamp, `actor`, `action`,
/// canonical payload. Each field is framed as an 8-byte little-endian length
/// followed by its UTF-8 bytes, so no field content can shift a boundary.
/// The digest is returned as 64 lowercase hex characters.
pub struct EntryHasher {
    domain: &'static str,
}

impl EntryHasher {
    /// Hasher for version 1 ledger entries.
    pub const LEDGER_V1: Self = Self {
        domain: "cmp-ledger-entry-v1",
    };

    /// Hash the five entry fields.
    pub fn compute_hash(
        &self,
        prev_hash: &str,
        timestamp: &Timestamp,
        actor: &str,
        action: &str,
        payload: Option<&Payload>,
    ) -> String {
        let timestamp = timestamp.to_canonical_string();
        let payload = canonicalize(payload);

        let mut hasher = blake3::Hasher::new();
        hasher.update(self.domain.as_bytes());
        hasher.update(b":");
        for field in [prev_hash, &timestamp, actor, action, &payload] {
            hasher.update(&(field.len() as u64).to_le_bytes());
            hasher.update(field.as_bytes());
        }
        hex::encode(hasher.finalize().as_bytes())
    }

    /// Recompute an entry's hash from its own stored fields.
    pub fn hash_entry(&self, entry: &LedgerEntry) -> String {
        self.compute_hash(
            &entry.prev_hash,
            &entry.timestamp,
            &entry.actor,
            &entry.action,
            entry.data.as_ref(),
        )
    }

    /// The domain tag used by this hasher.
    pub fn domain(&self) -> &str {
        self.domain
    }
}

/// [`EntryHasher::compute_hash`] with the version 1 domain.
pub fn compute_hash(
    prev_hash: &str,
    timestamp: &Timestamp,
    actor: &str,
    action: &str,
    payload: Option<&Payload>,
) -> String {
    EntryHasher::LEDGER_V1.compute_hash(prev_hash, timestamp, actor, action, payload)
}
