use std::sync::Arc;

use cmp_types::{LedgerEntry, NewEntry, Payload};
use serde::Serialize;

use crate::error::LedgerError;

/// Write boundary: the only way entries come into existence.
pub trait LedgerWriter: Send + Sync {
    /// Commit a validated entry, linking it to the current tail.
    ///
    /// The tail read and the insert are atomic with respect to every other
    /// appender. On failure nothing is committed.
    fn append_entry(&self, entry: NewEntry) -> Result<LedgerEntry, LedgerError>;

    /// Validate `(actor, action, data)` and append it.
    fn append(
        &self,
        actor: &str,
        action: &str,
        data: Option<Payload>,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append_entry(NewEntry::new(actor, action, data)?)
    }
}

/// One stored row, decoded on its own.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LedgerRecord {
    Entry(LedgerEntry),
    /// A row whose stored fields no longer decode into an entry.
    Undecodable { id: u64, reason: String },
}

impl LedgerRecord {
    pub fn id(&self) -> u64 {
        match self {
            Self::Entry(entry) => entry.id,
            Self::Undecodable { id, .. } => *id,
        }
    }

    pub fn entry(&self) -> Option<&LedgerEntry> {
        match self {
            Self::Entry(entry) => Some(entry),
            Self::Undecodable { .. } => None,
        }
    }
}

/// Read boundary. All results are in ascending `id` order.
///
/// The entry-returning reads fail with [`LedgerError::Corrupt`] if any row in
/// range cannot be decoded. The `*_records` reads return such rows as
/// [`LedgerRecord::Undecodable`] instead, so audits and listings keep going.
pub trait LedgerReader: Send + Sync {
    /// Every entry, oldest first.
    fn read_all_in_order(&self) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Up to `limit` entries with `id > after_id`, oldest first.
    fn read_after(&self, after_id: u64, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// The newest `n` entries, oldest first.
    fn read_recent(&self, n: usize) -> Result<Vec<LedgerEntry>, LedgerError>;

    fn get(&self, id: u64) -> Result<Option<LedgerEntry>, LedgerError>;

    /// The most recently committed entry.
    fn head(&self) -> Result<Option<LedgerEntry>, LedgerError>;

    fn count(&self) -> Result<u64, LedgerError>;

    /// Up to `limit` rows with `id > after_id`, each decoded independently.
    fn read_records_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        Ok(self
            .read_after(after_id, limit)?
            .into_iter()
            .map(LedgerRecord::Entry)
            .collect())
    }

    /// The newest `n` rows, oldest first, each decoded independently.
    fn read_recent_records(&self, n: usize) -> Result<Vec<LedgerRecord>, LedgerError> {
        Ok(self
            .read_recent(n)?
            .into_iter()
            .map(LedgerRecord::Entry)
            .collect())
    }
}

impl<T: LedgerWriter + ?Sized> LedgerWriter for Arc<T> {
    fn append_entry(&self, entry: NewEntry) -> Result<LedgerEntry, LedgerError> {
        (**self).append_entry(entry)
    }
}

impl<T: LedgerReader + ?Sized> LedgerReader for Arc<T> {
    fn read_all_in_order(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).read_all_in_order()
    }

    fn read_after(&self, after_id: u64, limit: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).read_after(after_id, limit)
    }

    fn read_recent(&self, n: usize) -> Result<Vec<LedgerEntry>, LedgerError> {
        (**self).read_recent(n)
    }

    fn get(&self, id: u64) -> Result<Option<LedgerEntry>, LedgerError> {
        (**self).get(id)
    }

    fn head(&self) -> Result<Option<LedgerEntry>, LedgerError> {
        (**self).head()
    }

    fn count(&self) -> Result<u64, LedgerError> {
        (**self).count()
    }

    fn read_records_after(
        &self,
        after_id: u64,
        limit: usize,
    ) -> Result<Vec<LedgerRecord>, LedgerError> {
        (**self).read_records_after(after_id, limit)
    }

    fn read_recent_records(&self, n: usize) -> Result<Vec<LedgerRecord>, LedgerError> {
        (**self).read_recent_records(n)
    }
}
