//! Foundation types for the CMP ledger.
//!
//! This crate provides the record and input types shared by every other CMP
//! crate. It performs no I/O and no hashing.
//!
//! # Key Types
//!
//! - [`LedgerEntry`]: One immutable, hash-linked record of an event
//! - [`Payload`]: Optional structured data attached to an entry (a JSON object)
//! - [`Timestamp`]: UTC instant with fixed microsecond precision
//! - [`Actor`]: Role-prefixed identity of whoever performed an action
//! - [`NewEntry`]: Validated `(actor, action, data)` triple accepted by `append`

pub mod entry;
pub mod error;
pub mod identity;
pub mod payload;
pub mod temporal;

pub use entry::{LedgerEntry, NewEntry, GENESIS, MAX_ACTION_LEN, MAX_ACTOR_LEN};
pub use error::ValidationError;
pub use identity::{Actor, ActorKind};
pub use payload::Payload;
pub use temporal::Timestamp;
