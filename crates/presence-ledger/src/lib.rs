//! presence-ledger: Durable presence records.
//!
//! Persists one session per tracked person (entry, exit, resolved name) and
//! an append-only movement log of zone changes, in SQLite.

pub mod ledger;
pub mod store;

pub use ledger::{FrameReport, LedgerAnomaly, LedgerError, Mutation, PresenceLedger};
pub use store::{Batch, MovementRecord, SessionId, SessionRecord, SessionStore, StoreError};
