//! Cryptographic core of the CMP ledger.
//!
//! Provides the canonical payload encoding, the domain-separated BLAKE3 entry
//! hash, and hash chain verification. Everything here is pure: no I/O, no
//! clocks, no shared state.

pub mod canonical;
pub mod chain;
pub mod hasher;

pub use canonical::{canonicalize, NULL_PAYLOAD};
pub use chain::{BreakKind, ChainBreak, ChainStatus, ChainVerifier};
pub use hasher::{compute_hash, EntryHasher};
