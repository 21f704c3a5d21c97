//! Viewer-side state synchronization.
//!
//! This crate provides:
//! - QueryCache: control-plane reads keyed by [`Query`], with staleness
//!   flags and write versions
//! - SyncBridge: push-channel handlers that only mark cache scopes stale
//! - OptimisticMutator / TaskBoard: speculative local writes with per-call
//!   rollback
//! - ControlPlaneClient: the REST reads and the task status mutation
//!
//! The push channel says which things changed; the next read pulls the new
//! values.

mod bridge;
mod cache;
mod client;
mod error;
mod mutator;
mod query;

pub use bridge::{SyncBridge, SYNC_CHANNELS};
pub use cache::{CacheEntry, QueryCache, QueryFetcher};
pub use client::ControlPlaneClient;
pub use error::{SyncError, SyncResult};
pub use mutator::{MutationOutcome, OptimisticMutator, TaskBoard, TaskStatus, TaskStatusUpdater};
pub use query::{Query, Scope};
