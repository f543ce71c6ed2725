//! Card synchronization module
//!
//! This module provides the sync engine and the services it coordinates:
//!
//! - `orchestrator`: The `SyncEngine`, running `scan → reconcile → writeBack` cycles over a card's tag.
//! - `events`: Event types, handler trait and dispatcher shared with the transaction processor.
//! - `progress_tracker`: Records what a cycle did and produces its `SyncReport`.
//! - `session`: Per-card locks, the observable sync phase and caller cancellation.
//! - `settlement_service`: Signs, submits and polls pending spends against the settlement layer.

/// Event system for decoupled communication during sync
pub mod events;
/// Main coordinator for the card sync process
pub mod orchestrator;
/// Tracks what one sync cycle did
pub mod progress_tracker;
/// Settlement path for pending spends
pub mod settlement_service;
/// Locks, phase signal and cancellation
pub mod session;

pub use events::{ChannelEventHandler, EventDispatcher, LoggingEventHandler, SyncEvent, SyncEventHandler};
pub use orchestrator::*;
pub use progress_tracker::SyncReport;
pub use session::{SyncCancellation, SyncPhase};
pub use settlement_service::{PendingResolution, SettlementService};
