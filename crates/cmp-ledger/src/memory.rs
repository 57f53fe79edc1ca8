use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use cmp_crypto::compute_hash;
use cmp_types::{LedgerEntry, NewEntry, Timestamp, GENESIS};
use tracing::debug;

use crate::error::LedgerError;
use crate::traits::{LedgerReader, LedgerWriter};

/// In-memory ledger for tests, local demos, and embedding.
///
/// The write lock covers both the tail read and the push, so appends are
/// serialized; readers share the read lock and run in parallel.
#[derive(Default)]
pub struct InMemoryLedger {
    entries: RwLock<Vec<LedgerEntry>>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, Vec<LedgerEntry>>, LedgerError> {
        self.entries
            .read()
            .map_err(|_| LedgerError::Storage("ledger read lock poisoned".into()))
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, Vec<LedgerEntry>>, LedgerError> {
        self.entries
            .write()
            .map_err(|_| LedgerError::Storage("ledger write lock poisoned".into()))
    }

    /// Mutate stored entries directly, bypassing `append`.
    #[cfg(test)]
    pub(crate) fn entries_mut_for_test(&self, f: impl FnOnce(&mut Vec<LedgerEntry>)) {
        f(&mut self.entries.write().unwrap());
    }
}

impl LedgerWriter for InMemoryLedger {
    fn append_entry(&self, entry: NewEntry) -> Result<LedgerEntry, LedgerError> {
        let mut entries = self.write_guard()?;

        let prev_hash = entries
            .last()
            .map_or_else(|| GENESIS.to_string(), |last| last.hash.clone());
        let timestamp = Timestamp::now();
        let hash = compute_hash(
            &prev_hash,
            &timestamp,
            entry.actor(),
            entry.action(),
            entry.data(),
        );
        let id = entries.len() as u64 + 1;

        let committed = entry.into_entry(id, timestamp, prev_hash, hash);
        entries.push(committed.clone());

        debug!(id, actor = %committed.actor, action = %committed.action, "entry appended");
        Ok(committed)
    }
}

impl LedgerReader for InMemoryLedger {
    fn read_all_in_order(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.read_guard()?.clone())
    }

    fn read_after(&self, after_id: u64, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.read_guard()?;
        // ids are 1-based and dense, so entry `id` lives at index `id - 1`.
        let start = usize::try_from(after_id).unwrap_or(usize::MAX).min(entries.len());
        Ok(entries[start..].iter().take(limit).cloned().collect())
    }

    fn read_recent(&self, n: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        let entries = self.read_guard()?;
        let start = entries.len().saturating_sub(n);
        Ok(entries[start..].to_vec())
    }

    fn get(&self, id: u64) -> Result<Option<LedgerEntry>, LedgerError> {
        let entries = self.read_guard()?;
        let Some(index) = id.checked_sub(1) else {
            return Ok(None);
        };
        Ok(usize::try_from(index)
            .ok()
            .and_then(|i| entries.get(i))
            .cloned())
    }

    fn head(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        Ok(self.read_guard()?.last().cloned())
    }

    fn count(&self) -> Result<u64, LedgerError> {
        Ok(self.read_guard()?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use cmp_crypto::{BreakKind, ChainStatus, ChainVerifier};
    use cmp_types::{Payload, ValidationError};

    use super::*;

    fn v(n: i64) -> Option<Payload> {
        Some(Payload::new().with("v", n))
    }

    #[test]
    fn append_links_entries() {
        let ledger = InMemoryLedger::new();
        let e1 = ledger.append("AI:Accountant", "t1", v(1)).unwrap();
        let e2 = ledger.append("AI:Accountant", "t2", v(2)).unwrap();

        assert_eq!(e1.id, 1);
        assert_eq!(e2.id, 2);
        assert_eq!(e1.prev_hash, GENESIS);
        assert_eq!(e2.prev_hash, e1.hash);
        assert_eq!(
            e2.hash,
            compute_hash(&e1.hash, &e2.timestamp, "AI:Accountant", "t2", v(2).as_ref())
        );
    }

    #[test]
    fn invalid_input_is_rejected_without_writing() {
        let ledger = InMemoryLedger::new();
        let err = ledger.append("", "t1", None).unwrap_err();
        assert_eq!(
            err,
            LedgerError::Validation(ValidationError::Empty { field: "actor" })
        );
        assert_eq!(ledger.count().unwrap(), 0);
    }

    #[test]
    fn null_payload_is_reproducible() {
        let ledger = InMemoryLedger::new();
        let e = ledger.append("AI:Director", "noop", None).unwrap();
        assert!(e.data.is_none());
        assert_eq!(
            e.hash,
            compute_hash(GENESIS, &e.timestamp, "AI:Director", "noop", None)
        );
    }

    #[test]
    fn reads_are_ordered_and_bounded() {
        let ledger = InMemoryLedger::new();
        for i in 0..5 {
            ledger.append("AI:Controller", "check", v(i)).unwrap();
        }

        let ids = |entries: Vec<LedgerEntry>| entries.iter().map(|e| e.id).collect::<Vec<_>>();
        assert_eq!(ids(ledger.read_all_in_order().unwrap()), vec![1, 2, 3, 4, 5]);
        assert_eq!(ids(ledger.read_recent(2).unwrap()), vec![4, 5]);
        assert_eq!(ids(ledger.read_recent(50).unwrap()), vec![1, 2, 3, 4, 5]);
        assert_eq!(ids(ledger.read_after(1, 2).unwrap()), vec![2, 3]);
        assert_eq!(ids(ledger.read_after(5, 10).unwrap()), Vec::<u64>::new());
        assert_eq!(ids(ledger.read_after(u64::MAX, 10).unwrap()), Vec::<u64>::new());
        assert_eq!(ledger.get(3).unwrap().unwrap().id, 3);
        assert!(ledger.get(0).unwrap().is_none());
        assert!(ledger.get(6).unwrap().is_none());
        assert_eq!(ledger.head().unwrap().unwrap().id, 5);
        assert_eq!(ledger.count().unwrap(), 5);
    }

    #[test]
    fn repeated_reads_only_grow() {
        let ledger = InMemoryLedger::new();
        ledger.append("AI:Accountant", "a", None).unwrap();
        let first = ledger.read_all_in_order().unwrap();
        ledger.append("AI:Accountant", "b", None).unwrap();
        let second = ledger.read_all_in_order().unwrap();
        assert_eq!(&second[..first.len()], &first[..]);
        assert_eq!(second.len(), 2);
    }

    #[test]
    fn tampering_is_detected_at_the_entry() {
        let ledger = InMemoryLedger::new();
        ledger.append("AI:Accountant", "t1", v(1)).unwrap();
        ledger.append("AI:Accountant", "t2", v(2)).unwrap();

        ledger.entries_mut_for_test(|entries| entries[0].data = v(99));

        let status = ChainVerifier::verify_chain(&ledger.read_all_in_order().unwrap());
        match status {
            ChainStatus::Broken(b) => {
                assert_eq!(b.index, 0);
                assert!(matches!(b.kind, BreakKind::HashMismatch { .. }));
            }
            other => panic!("expected a break, got {other:?}"),
        }
    }

    #[test]
    fn concurrent_appends_form_one_chain() {
        let ledger = Arc::new(InMemoryLedger::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let ledger = Arc::clone(&ledger);
                thread::spawn(move || {
                    for i in 0..25 {
                        ledger
                            .append(&format!("AI:Agent{t}"), "tick", v(i))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let entries = ledger.read_all_in_order().unwrap();
        assert_eq!(entries.len(), 200);
        assert!(entries.windows(2).all(|w| w[0].id < w[1].id));
        assert_eq!(
            ChainVerifier::verify_chain(&entries),
            ChainStatus::Intact { verified: 200 }
        );
    }
}
