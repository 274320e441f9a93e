//! Durable key-value storage.
//!
//! # Responsibilities
//! - Hold the persisted credential slot and per-identity cache records
//! - Abstract the backing medium (memory, JSON file, platform storage)
//!
//! # Design Decisions
//! - Values are opaque strings; callers own the encoding and re-validate on read
//! - Synchronous API: stores are local and fast, nothing awaits while holding one
//! - Only the refresh coordinator and the session cache write to the store

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::SessionResult;

/// A durable client-side key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> SessionResult<Option<String>>;

    fn put(&self, key: &str, value: String) -> SessionResult<()>;

    fn remove(&self, key: &str) -> SessionResult<()>;
}
