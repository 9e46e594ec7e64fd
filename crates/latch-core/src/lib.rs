//! Latch Core - quorum-based distributed lock protocol
//!
//! This crate provides:
//! - Quorum acquisition rounds across independent store instances
//! - Bounded wait-and-retry with cancellation
//! - Token-checked, idempotent release through `LockHandle`
//! - The `LockError` taxonomy (conflicted, expired, no-quorum, unlocked, cancelled)
//! - Layered configuration loading

pub mod config;
mod engine;
pub mod error;
pub mod factory;
pub mod handle;
pub mod metrics;
pub mod model;
mod retry;

pub use self::config::Configuration;
pub use error::{LockError, Result};
pub use factory::LockFactory;
pub use handle::LockHandle;
pub use model::{
    AcquireOptions, InstanceSummary, LockFailure, LockSettings, LockStatus, NotAFailure,
};

// Re-export store types callers need to build a factory
pub use latch_store::{LockStore, MemoryConnector, MemoryStore, StoreConfig, StoreConnector};
pub use tokio_util::sync::CancellationToken;
