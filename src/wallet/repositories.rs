use crate::wallet::types::{Card, PendingTransaction, StoreError, Transaction, UnspentObject};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use tracing::{debug, info};

/// The four logical collections of the local wallet store, persisted together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerState {
	/// Cards keyed by card id.
	pub cards: BTreeMap<String, Card>,
	/// Unspent objects keyed by owning card id.
	pub unspent_objects: BTreeMap<String, Vec<UnspentObject>>,
	/// Pending spends keyed by owning card id.
	pub pending_transactions: BTreeMap<String, Vec<PendingTransaction>>,
	/// History in insertion order.
	pub transactions: Vec<Transaction>,
}

/// Repository for the wallet ledger snapshot
#[async_trait::async_trait]
pub trait LedgerStateRepository: Send + Sync {
	/// Persist the full snapshot. Must either fully replace the previous
	/// snapshot or leave it untouched.
	async fn save(&self, state: &LedgerState) -> Result<(), StoreError>;
	async fn load(&self) -> Result<Option<LedgerState>, StoreError>;
}

/// File-based implementation of LedgerStateRepository
pub struct FileLedgerStateRepository {
	data_dir: PathBuf,
}

impl FileLedgerStateRepository {
	pub fn new(data_dir: PathBuf) -> Self {
		Self { data_dir }
	}

	fn state_filename(&self) -> PathBuf {
		self.data_dir.join("ledger_state.json")
	}

	fn temp_filename(&self) -> PathBuf {
		self.data_dir.join("ledger_state.json.tmp")
	}

	fn metadata_filename(&self) -> PathBuf {
		self.data_dir.join("ledger_state.meta.json")
	}
}

#[async_trait::async_trait]
impl LedgerStateRepository for FileLedgerStateRepository {
	async fn save(&self, state: &LedgerState) -> Result<(), StoreError> {
		tokio::fs::create_dir_all(&self.data_dir)
			.await
			.map_err(|e| StoreError::Io(format!("Failed to create data directory: {}", e)))?;

		let content = serde_json::to_vec_pretty(state)
			.map_err(|e| StoreError::Serialization(format!("Failed to serialize ledger state: {}", e)))?;

		// Write aside, then rename over the committed snapshot.
		let temp = self.temp_filename();
		tokio::fs::write(&temp, &content)
			.await
			.map_err(|e| StoreError::Io(format!("Failed to write ledger state file: {}", e)))?;
		tokio::fs::rename(&temp, self.state_filename())
			.await
			.map_err(|e| StoreError::Io(format!("Failed to commit ledger state file: {}", e)))?;

		let metadata = serde_json::json!({
			"cards": state.cards.len(),
			"transactions": state.transactions.len(),
			"timestamp": chrono::Utc::now().to_rfc3339(),
		});
		let metadata = serde_json::to_string_pretty(&metadata)
			.map_err(|e| StoreError::Serialization(format!("Failed to serialize metadata: {}", e)))?;
		tokio::fs::write(self.metadata_filename(), metadata)
			.await
			.map_err(|e| StoreError::Io(format!("Failed to write ledger state metadata: {}", e)))?;

		debug!(
			"Saved ledger state to {:?} ({} cards, {} transactions)",
			self.state_filename(),
			state.cards.len(),
			state.transactions.len()
		);
		Ok(())
	}

	async fn load(&self) -> Result<Option<LedgerState>, StoreError> {
		let filename = self.state_filename();
		if !filename.exists() {
			return Ok(None);
		}

		let content = tokio::fs::read(&filename)
			.await
			.map_err(|e| StoreError::Io(format!("Failed to read ledger state file: {}", e)))?;
		let state: LedgerState = serde_json::from_slice(&content).map_err(|e| {
			StoreError::Serialization(format!("Failed to deserialize ledger state: {}", e))
		})?;

		info!(
			"Loaded ledger state from {:?}: {} cards, {} transactions",
			filename,
			state.cards.len(),
			state.transactions.len()
		);
		Ok(Some(state))
	}
}

/// Volatile repository for simulations and tests. Saves can be made to fail.
#[derive(Default)]
pub struct InMemoryLedgerStateRepository {
	state: Mutex<Option<LedgerState>>,
	failing_saves: AtomicU32,
	saves: AtomicUsize,
}

impl InMemoryLedgerStateRepository {
	pub fn new() -> Self {
		Self::default()
	}

	/// Make the next `count` saves fail with an I/O error.
	pub fn fail_next_saves(&self, count: u32) {
		self.failing_saves.store(count, Ordering::SeqCst);
	}

	pub fn save_count(&self) -> usize {
		self.saves.load(Ordering::SeqCst)
	}

	pub fn snapshot(&self) -> Option<LedgerState> {
		self.state
			.lock()
			.unwrap_or_else(|poisoned| poisoned.into_inner())
			.clone()
	}
}

#[async_trait::async_trait]
impl LedgerStateRepository for InMemoryLedgerStateRepository {
	async fn save(&self, state: &LedgerState) -> Result<(), StoreError> {
		let failing = self
			.failing_saves
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
		if failing.is_ok() {
			return Err(StoreError::Io("simulated disk failure".to_string()));
		}

		*self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(state.clone());
		self.saves.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn load(&self) -> Result<Option<LedgerState>, StoreError> {
		Ok(self.snapshot())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn state_with_card() -> LedgerState {
		let mut state = LedgerState::default();
		let card = Card::new("c1", "Blue card", "0xcard");
		state.cards.insert(card.id.clone(), card);
		state
			.unspent_objects
			.insert("c1".to_string(), vec![UnspentObject::new("o1", 10)]);
		state
	}

	#[tokio::test]
	async fn file_repository_round_trips() {
		let dir = tempfile::tempdir().unwrap();
		let repo = FileLedgerStateRepository::new(dir.path().join("wallet"));
		assert_eq!(repo.load().await.unwrap(), None);

		let state = state_with_card();
		repo.save(&state).await.unwrap();
		assert_eq!(repo.load().await.unwrap(), Some(state));
		assert!(dir.path().join("wallet/ledger_state.meta.json").exists());
		assert!(!dir.path().join("wallet/ledger_state.json.tmp").exists());
	}

	#[tokio::test]
	async fn corrupt_file_is_a_serialization_error() {
		let dir = tempfile::tempdir().unwrap();
		std::fs::write(dir.path().join("ledger_state.json"), b"{oops").unwrap();
		let repo = FileLedgerStateRepository::new(dir.path().to_path_buf());
		assert!(matches!(
			repo.load().await,
			Err(StoreError::Serialization(_))
		));
	}

	#[tokio::test]
	async fn in_memory_failures_keep_previous_snapshot() {
		let repo = InMemoryLedgerStateRepository::new();
		let state = state_with_card();
		repo.save(&state).await.unwrap();

		repo.fail_next_saves(1);
		assert!(repo.save(&LedgerState::default()).await.is_err());
		assert_eq!(repo.snapshot(), Some(state));
		assert_eq!(repo.save_count(), 1);
	}
}
