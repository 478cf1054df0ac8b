//! Credential pool - shared, consumable login records
//!
//! This crate manages a file-resident pool of credential records shared by
//! possibly-concurrent, possibly-cross-process consumers:
//!
//! - **Records**: `|`-joined login strings, assigned or unassigned
//! - **Lock**: advisory sentinel file guarding the pool document
//! - **Store**: whole-document YAML persistence with atomic rewrites
//! - **Repository**: claim operations over a file- or memory-backed pool
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ CredentialRepo   │  pop_first / find_first_unassigned / mark_assigned
//! └───────┬──────────┘
//!   ┌─────▼─────┐  ┌───────────┐
//!   │ FilePool  │  │ MemoryPool│
//!   └─────┬─────┘  └───────────┘
//!   ┌─────▼─────┐
//!   │ PoolLock  │  exclusive-create sentinel, verified staleness
//!   └─────┬─────┘
//!   ┌─────▼─────┐
//!   │ Document  │  opaque ordered mapping, temp-file + rename writes
//!   └───────────┘
//! ```
//!
//! Every mutating operation holds the lock for its full duration and
//! rewrites the whole document atomically, so readers that respect the lock
//! protocol never observe a partial write.

pub mod error;
pub mod lock;
pub mod pool;
pub mod record;
pub mod store;

pub use error::{Error, Result};
pub use lock::{LockSentinel, PoolLock};
pub use pool::{
    ClaimPolicy, CredentialRepository, DEFAULT_LOCK_TIMEOUT, FilePool, MemoryPool, claim,
};
pub use record::CredentialRecord;
pub use store::{PoolDocument, write_document};
