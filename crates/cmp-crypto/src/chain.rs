use std::fmt;

use cmp_types::{LedgerEntry, GENESIS};
use serde::Serialize;

use crate::hasher::EntryHasher;

/// Outcome of verifying a run of entries.
///
/// A broken chain is a result, not an error: it is reported to whoever asked
/// for the audit and is never repaired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChainStatus {
    /// Every entry links to its predecessor and hashes correctly.
    Intact { verified: usize },
    /// The first entry at which a check failed.
    Broken(ChainBreak),
}

impl ChainStatus {
    pub fn is_intact(&self) -> bool {
        matches!(self, Self::Intact { .. })
    }

    /// Index (within the verified slice) of the first broken entry.
    pub fn first_broken_index(&self) -> Option<usize> {
        match self {
            Self::Intact { .. } => None,
            Self::Broken(b) => Some(b.index),
        }
    }
}

/// Where and how a chain broke.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ChainBreak {
    /// Position in the verified slice.
    pub index: usize,
    /// Stored id of the offending entry.
    pub id: u64,
    pub kind: BreakKind,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BreakKind {
    /// `id` does not increase over the previous entry.
    OutOfOrder { previous_id: u64 },
    /// `prev_hash` is not the previous entry's stored hash (or the genesis sentinel).
    PrevHashMismatch { expected: String, found: String },
    /// The stored hash differs from the one recomputed from the entry's fields.
    HashMismatch { computed: String, stored: String },
    /// The stored row no longer decodes into an entry, so nothing can be
    /// recomputed. Reported by store audits.
    Undecodable { reason: String },
}

impl fmt::Display for ChainBreak {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BreakKind::OutOfOrder { previous_id } => write!(
                f,
                "entry {} at index {} does not follow entry {previous_id}",
                self.id, self.index
            ),
            BreakKind::PrevHashMismatch { expected, found } => write!(
                f,
                "entry {} at index {}: prev_hash {found} does not match {expected}",
                self.id, self.index
            ),
            BreakKind::HashMismatch { computed, stored } => write!(
                f,
                "entry {} at index {}: stored hash {stored} differs from computed {computed}",
                self.id, self.index
            ),
            BreakKind::Undecodable { reason } => write!(
                f,
                "entry {} at index {} cannot be decoded: {reason}",
                self.id, self.index
            ),
        }
    }
}

/// Hash chain integrity verifier.
///
/// For each entry, in order:
/// 1. `id` is greater than the previous entry's `id`
/// 2. `prev_hash` equals the previous entry's stored `hash` (or the anchor)
/// 3. `hash` equals the hash recomputed from the entry's fields
pub struct ChainVerifier;

impl ChainVerifier {
    /// Verify a complete chain starting from genesis.
    pub fn verify_chain(entries: &[LedgerEntry]) -> ChainStatus {
        Self::verify_from(GENESIS, None, entries)
    }

    /// Verify a run of entries whose predecessor is already trusted.
    ///
    /// `anchor_hash` is the predecessor's stored hash ([`GENESIS`] for a run
    /// that starts the chain) and `anchor_id` its id, if any.
    pub fn verify_from(
        anchor_hash: &str,
        anchor_id: Option<u64>,
        entries: &[LedgerEntry],
    ) -> ChainStatus {
        let hasher = EntryHasher::LEDGER_V1;
        let mut expected_prev = anchor_hash;
        let mut previous_id = anchor_id;

        for (index, entry) in entries.iter().enumerate() {
            let broken = |kind| {
                ChainStatus::Broken(ChainBreak {
                    index,
                    id: entry.id,
                    kind,
                })
            };

            if let Some(previous_id) = previous_id {
                if entry.id <= previous_id {
                    return broken(BreakKind::OutOfOrder { previous_id });
                }
            }

            if entry.prev_hash != expected_prev {
                return broken(BreakKind::PrevHashMismatch {
                    expected: expected_prev.to_string(),
                    found: entry.prev_hash.clone(),
                });
            }

            let computed = hasher.hash_entry(entry);
            if computed != entry.hash {
                return broken(BreakKind::HashMismatch {
                    computed,
                    stored: entry.hash.clone(),
                });
            }

            expected_prev = &entry.hash;
            previous_id = Some(entry.id);
        }

        ChainStatus::Intact {
            verified: entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use cmp_types::{NewEntry, Payload, Timestamp};

    use super::*;

    fn build_chain(count: usize) -> Vec<LedgerEntry> {
        let mut chain: Vec<LedgerEntry> = Vec::new();
        for i in 0..count {
            let prev = chain.last().map_or(GENESIS.to_string(), |e| e.hash.clone());
            let ts = Timestamp::now();
            let data = Some(Payload::new().with("v", i as u64));
            let hash = crate::compute_hash(&prev, &ts, "AI:Accountant", "tick", data.as_ref());
            let entry = NewEntry::new("AI:Accountant", "tick", data)
                .unwrap()
                .into_entry(i as u64 + 1, ts, prev, hash);
            chain.push(entry);
        }
        chain
    }

    #[test]
    fn empty_chain_is_intact() {
        assert_eq!(
            ChainVerifier::verify_chain(&[]),
            ChainStatus::Intact { verified: 0 }
        );
    }

    #[test]
    fn valid_chain_is_intact() {
        let chain = build_chain(10);
        let status = ChainVerifier::verify_chain(&chain);
        assert!(status.is_intact());
        assert_eq!(status, ChainStatus::Intact { verified: 10 });
        assert_eq!(status.first_broken_index(), None);
    }

    #[test]
    fn genesis_must_use_sentinel() {
        let mut chain = build_chain(1);
        chain[0].prev_hash = "0".repeat(64);
        let status = ChainVerifier::verify_chain(&chain);
        assert_eq!(status.first_broken_index(), Some(0));
        assert!(matches!(
            status,
            ChainStatus::Broken(ChainBreak { kind: BreakKind::PrevHashMismatch { .. }, .. })
        ));
    }

    #[test]
    fn tampered_data_breaks_at_that_entry() {
        for k in 0..4 {
            let mut chain = build_chain(4);
            chain[k].data = Some(Payload::new().with("v", 99));
            let status = ChainVerifier::verify_chain(&chain);
            assert_eq!(status.first_broken_index(), Some(k));
            assert!(matches!(
                status,
                ChainStatus::Broken(ChainBreak { kind: BreakKind::HashMismatch { .. }, .. })
            ));
        }
    }

    #[test]
    fn rehashed_tamper_breaks_the_next_link() {
        let mut chain = build_chain(3);
        chain[1].actor = "Human:mallory@acme.com".into();
        chain[1].hash = EntryHasher::LEDGER_V1.hash_entry(&chain[1]);

        let status = ChainVerifier::verify_chain(&chain);
        match status {
            ChainStatus::Broken(b) => {
                assert_eq!(b.index, 2);
                assert_eq!(b.id, 3);
                assert!(matches!(b.kind, BreakKind::PrevHashMismatch { .. }));
            }
            other => panic!("expected break, got {other:?}"),
        }
    }

    #[test]
    fn reordered_entries_are_detected() {
        let mut chain = build_chain(3);
        chain.swap(1, 2);
        let status = ChainVerifier::verify_chain(&chain);
        assert_eq!(status.first_broken_index(), Some(1));
    }

    #[test]
    fn duplicate_ids_are_out_of_order() {
        let mut chain = build_chain(2);
        chain[1].id = chain[0].id;
        let status = ChainVerifier::verify_chain(&chain);
        assert!(matches!(
            status,
            ChainStatus::Broken(ChainBreak {
                index: 1,
                kind: BreakKind::OutOfOrder { previous_id: 1 },
                ..
            })
        ));
    }

    #[test]
    fn verify_from_anchor_checks_a_suffix() {
        let chain = build_chain(6);
        let status = ChainVerifier::verify_from(&chain[2].hash, Some(chain[2].id), &chain[3..]);
        assert_eq!(status, ChainStatus::Intact { verified: 3 });

        let status = ChainVerifier::verify_from(GENESIS, None, &chain[3..]);
        assert_eq!(status.first_broken_index(), Some(0));
    }

    #[test]
    fn break_display_names_the_entry() {
        let mut chain = build_chain(2);
        chain[0].action = "edited".into();
        let ChainStatus::Broken(b) = ChainVerifier::verify_chain(&chain) else {
            panic!("expected a break");
        };
        assert!(b.to_string().starts_with("entry 1 at index 0"));
    }

    #[test]
    fn undecodable_break_serializes_its_reason() {
        let status = ChainStatus::Broken(ChainBreak {
            index: 1,
            id: 2,
            kind: BreakKind::Undecodable {
                reason: "bad timestamp".into(),
            },
        });
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["status"], "broken");
        assert_eq!(json["kind"]["kind"], "undecodable");
        assert_eq!(json["kind"]["reason"], "bad timestamp");
    }

    #[test]
    fn status_serializes_with_tags() {
        let json = serde_json::to_value(ChainStatus::Intact { verified: 2 }).unwrap();
        assert_eq!(json, serde_json::json!({"status": "intact", "verified": 2}));
    }
}
