//! Append-only hash-chained ledger for CMP.
//!
//! This crate provides:
//! - `LedgerWriter` / `LedgerReader` trait boundaries
//! - `InMemoryLedger` for tests and embedding
//! - `SqliteLedger`, the durable store, with serialized appends and retry
//! - `LedgerService`, a single-writer task fed by a queue, with an async handle
//! - `Auditor`, batched chain verification over any reader
//! - Correction entries that reference, but never modify, an original entry
//! - `LedgerConfig`, TOML and environment driven settings

pub mod audit;
pub mod config;
pub mod correction;
pub mod error;
pub mod memory;
pub mod service;
pub mod sqlite;
pub mod traits;

pub use audit::{AuditReport, Auditor, DEFAULT_AUDIT_BATCH};
pub use config::LedgerConfig;
pub use correction::{corrections_for, record_correction, CORRECTION_ACTION};
pub use error::LedgerError;
pub use memory::InMemoryLedger;
pub use service::{LedgerHandle, LedgerService};
pub use sqlite::{SqliteLedger, SqliteOptions, SqliteReader};
pub use traits::{LedgerReader, LedgerRecord, LedgerWriter};

pub use cmp_crypto::{
    canonicalize, compute_hash, BreakKind, ChainBreak, ChainStatus, ChainVerifier,
};
pub use cmp_types::{LedgerEntry, NewEntry, Payload, Timestamp, GENESIS};
