//! Background Tasks Module
//!
//! Tokio tasks that keep the store free of expired entries.
//!
//! # Tasks
//! - Cleanup: sweeps expired entries at a configured interval
//! - Expiration: evicts a single `ImmediateEviction` entry when its delay elapses

mod cleanup;
mod expiration;

pub use cleanup::spawn_cleanup_task;
pub(crate) use expiration::schedule_eviction;
