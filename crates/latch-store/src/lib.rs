//! Latch Store - key-value store facade for distributed locks
//!
//! This crate provides:
//! - The `LockStore` contract (atomic set-if-absent with expiry, compare-and-delete)
//! - The `StoreConnector` contract used to establish clients from configuration
//! - A Redis implementation (`SET NX PX` plus a Lua compare-and-delete script)
//! - An in-memory implementation for single-process use and tests

pub mod error;
pub mod memory;
pub mod redis;
pub mod traits;

pub use self::error::{Result, StoreError};
pub use self::memory::{MemoryConnector, MemoryStore};
pub use self::redis::{RedisConnector, RedisStore};
pub use self::traits::{LockStore, StoreConfig, StoreConnector};
