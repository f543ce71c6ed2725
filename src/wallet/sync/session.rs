//! Sync session bookkeeping: per-card locks, the observable phase and caller
//! cancellation.

use crate::wallet::types::SyncError;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedMutexGuard, watch};
use tracing::debug;

/// Phase of the current sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
	#[default]
	Ready,
	Scanning,
	Detected,
	Reconciling,
	Writing,
	Error,
}

impl fmt::Display for SyncPhase {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SyncPhase::Ready => "ready",
			SyncPhase::Scanning => "scanning",
			SyncPhase::Detected => "detected",
			SyncPhase::Reconciling => "reconciling",
			SyncPhase::Writing => "writing",
			SyncPhase::Error => "error",
		};
		f.write_str(name)
	}
}

/// Locks keyed by card id. Held for a whole sync cycle and around every spend.
#[derive(Debug, Default)]
pub struct CardLocks {
	locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

/// Proof that the holder owns a card's lock. Released on drop.
#[derive(Debug)]
pub struct CardGuard {
	card_id: String,
	_guard: OwnedMutexGuard<()>,
}

impl CardGuard {
	pub fn card_id(&self) -> &str {
		&self.card_id
	}
}

impl Drop for CardGuard {
	fn drop(&mut self) {
		debug!("Released lock for card {}", self.card_id);
	}
}

impl CardLocks {
	pub fn new() -> Self {
		Self::default()
	}

	fn slot(&self, card_id: &str) -> Arc<tokio::sync::Mutex<()>> {
		let mut locks = self.locks.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
		// Entries nobody holds or waits on are dropped; a guard keeps its slot alive.
		locks.retain(|id, slot| id == card_id || Arc::strong_count(slot) > 1);
		locks.entry(card_id.to_string()).or_default().clone()
	}

	/// Number of lock entries currently kept.
	pub fn tracked(&self) -> usize {
		self.locks
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.len()
	}

	/// Take the lock or fail immediately with `SyncInProgress`.
	pub fn try_acquire(&self, card_id: &str) -> Result<CardGuard, SyncError> {
		let guard = self
			.slot(card_id)
			.try_lock_owned()
			.map_err(|_| SyncError::SyncInProgress(card_id.to_string()))?;
		debug!("Acquired lock for card {}", card_id);
		Ok(CardGuard {
			card_id: card_id.to_string(),
			_guard: guard,
		})
	}

	/// Wait for the lock.
	pub async fn acquire(&self, card_id: &str) -> CardGuard {
		let guard = self.slot(card_id).lock_owned().await;
		debug!("Acquired lock for card {}", card_id);
		CardGuard {
			card_id: card_id.to_string(),
			_guard: guard,
		}
	}

	pub fn is_locked(&self, card_id: &str) -> bool {
		self.slot(card_id).try_lock().is_err()
	}
}

/// Publishes the current phase to any number of observers.
#[derive(Debug)]
pub struct PhaseSignal {
	sender: watch::Sender<SyncPhase>,
}

impl Default for PhaseSignal {
	fn default() -> Self {
		Self::new()
	}
}

impl PhaseSignal {
	pub fn new() -> Self {
		let (sender, _) = watch::channel(SyncPhase::Ready);
		Self { sender }
	}

	pub fn set(&self, phase: SyncPhase) {
		self.sender.send_replace(phase);
	}

	pub fn current(&self) -> SyncPhase {
		*self.sender.borrow()
	}

	pub fn subscribe(&self) -> watch::Receiver<SyncPhase> {
		self.sender.subscribe()
	}
}

/// Caller-held handle that aborts a sync cycle while it is still scanning.
/// Ignored once reconciliation has started.
#[derive(Debug, Clone)]
pub struct SyncCancellation {
	sender: Arc<watch::Sender<bool>>,
}

impl Default for SyncCancellation {
	fn default() -> Self {
		Self::new()
	}
}

impl SyncCancellation {
	pub fn new() -> Self {
		let (sender, _) = watch::channel(false);
		Self {
			sender: Arc::new(sender),
		}
	}

	pub fn cancel(&self) {
		self.sender.send_replace(true);
	}

	pub fn is_cancelled(&self) -> bool {
		*self.sender.borrow()
	}

	/// Resolves once `cancel` has been called.
	pub async fn cancelled(&self) {
		let mut receiver = self.sender.subscribe();
		// The sender lives in `self`, so the channel cannot close while waiting.
		let _ = receiver.wait_for(|cancelled| *cancelled).await;
	}
}
