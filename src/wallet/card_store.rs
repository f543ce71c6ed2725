//! Card store.
//!
//! Durable repository of cards, their unspent objects, pending spends and the
//! transaction history. Every logical operation is one commit: the mutation is
//! applied to a copy of the state, invariants are checked, the copy is persisted
//! through the `LedgerStateRepository`, and only then does it replace the
//! in-memory state. A failed commit leaves previously committed state untouched.
//!
//! Invariants enforced on every commit, per card:
//! - pending spends never exceed unspent objects;
//! - `Card::balance` equals objects minus pending.

use crate::settlement::ObjectRef;
use crate::tag::TagLedgerPayload;
use crate::wallet::ledger_model::MergePlan;
use crate::wallet::repositories::{LedgerState, LedgerStateRepository};
use crate::wallet::types::{
	Card, CardLedger, PendingTransaction, StoreError, Transaction, TransactionStatus,
	UnspentObject, sum_amounts,
};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// A new spend to record atomically with its object reservation.
#[derive(Debug, Clone)]
pub struct SpendRecord {
	pub card_id: String,
	pub pending_id: String,
	pub to: String,
	pub amount: u64,
	pub timestamp: i64,
	pub transaction: Transaction,
}

pub struct CardStore {
	repository: Arc<dyn LedgerStateRepository>,
	state: RwLock<LedgerState>,
}

impl CardStore {
	/// Open the store, restoring the last committed snapshot if there is one.
	pub async fn open(repository: Arc<dyn LedgerStateRepository>) -> Result<Self, StoreError> {
		let state = match repository.load().await? {
			Some(state) => {
				info!("Restored card store with {} cards", state.cards.len());
				state
			}
			None => {
				info!("No stored ledger found, starting empty");
				LedgerState::default()
			}
		};

		Ok(Self {
			repository,
			state: RwLock::new(state),
		})
	}

	async fn commit<T>(
		&self,
		operation: &'static str,
		mutate: impl FnOnce(&mut LedgerState) -> Result<T, StoreError>,
	) -> Result<T, StoreError> {
		let mut guard = self.state.write().await;
		let mut next = guard.clone();

		let output = mutate(&mut next)?;
		refresh_balances(&mut next)?;

		if let Err(e) = self.repository.save(&next).await {
			warn!("[{}] Commit failed, state unchanged: {}", operation, e);
			return Err(e);
		}

		*guard = next;
		debug!("[{}] Committed", operation);
		Ok(output)
	}

	// Cards

	pub async fn upsert_card(&self, card: Card) -> Result<Card, StoreError> {
		let card_id = card.id.clone();
		self.commit("upsert_card", move |state| {
			if state
				.cards
				.values()
				.any(|other| other.address == card.address && other.id != card.id)
			{
				return Err(StoreError::DuplicateAddress(card.address.clone()));
			}
			state.unspent_objects.entry(card.id.clone()).or_default();
			state.pending_transactions.entry(card.id.clone()).or_default();
			state.cards.insert(card.id.clone(), card);
			Ok(())
		})
		.await?;

		self.get_card(&card_id)
			.await
			.ok_or(StoreError::CardNotFound(card_id))
	}

	pub async fn get_card(&self, id: &str) -> Option<Card> {
		self.state.read().await.cards.get(id).cloned()
	}

	pub async fn get_card_by_address(&self, address: &str) -> Option<Card> {
		self.state
			.read()
			.await
			.cards
			.values()
			.find(|card| card.address == address)
			.cloned()
	}

	pub async fn list_cards(&self) -> Vec<Card> {
		self.state
			.read()
			.await
			.cards
			.values()
			.cloned()
			.sorted_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
			.collect()
	}

	/// Delete a card with its objects and pending spends. History rows are kept
	/// and detached from the card.
	pub async fn delete_card(&self, id: &str) -> Result<(), StoreError> {
		let id = id.to_string();
		self.commit("delete_card", move |state| {
			if state.cards.remove(&id).is_none() {
				return Err(StoreError::CardNotFound(id));
			}
			state.unspent_objects.remove(&id);
			state.pending_transactions.remove(&id);
			for tx in state
				.transactions
				.iter_mut()
				.filter(|tx| tx.card_id.as_deref() == Some(id.as_str()))
			{
				tx.card_id = None;
			}
			Ok(())
		})
		.await
	}

	// Objects and pending spends

	pub async fn get_unspent_objects(&self, card_id: &str) -> Vec<UnspentObject> {
		self.state
			.read()
			.await
			.unspent_objects
			.get(card_id)
			.cloned()
			.unwrap_or_default()
	}

	pub async fn get_pending_transactions(&self, card_id: &str) -> Vec<PendingTransaction> {
		self.state
			.read()
			.await
			.pending_transactions
			.get(card_id)
			.cloned()
			.unwrap_or_default()
	}

	/// Replace the card's unspent objects wholesale.
	pub async fn replace_unspent_objects(
		&self,
		card_id: &str,
		objects: Vec<UnspentObject>,
	) -> Result<(), StoreError> {
		let card_id = card_id.to_string();
		self.commit("replace_unspent_objects", move |state| {
			ensure_card(state, &card_id)?;
			state.unspent_objects.insert(card_id, objects);
			Ok(())
		})
		.await
	}

	/// Replace the card's pending spends wholesale.
	pub async fn replace_pending_transactions(
		&self,
		card_id: &str,
		spends: Vec<PendingTransaction>,
	) -> Result<(), StoreError> {
		let card_id = card_id.to_string();
		self.commit("replace_pending_transactions", move |state| {
			ensure_card(state, &card_id)?;
			state.pending_transactions.insert(card_id, spends);
			Ok(())
		})
		.await
	}

	/// Everything known about a card, read under one lock.
	pub async fn ledger(&self, card_id: &str) -> Result<CardLedger, StoreError> {
		let state = self.state.read().await;
		let card = state
			.cards
			.get(card_id)
			.cloned()
			.ok_or_else(|| StoreError::CardNotFound(card_id.to_string()))?;

		Ok(CardLedger {
			card,
			objects: state.unspent_objects.get(card_id).cloned().unwrap_or_default(),
			pending: state
				.pending_transactions
				.get(card_id)
				.cloned()
				.unwrap_or_default(),
			transactions: state
				.transactions
				.iter()
				.filter(|tx| tx.card_id.as_deref() == Some(card_id))
				.cloned()
				.collect(),
		})
	}

	// Transactions

	pub async fn append_transaction(&self, tx: Transaction) -> Result<(), StoreError> {
		self.commit("append_transaction", move |state| {
			state.transactions.push(tx);
			Ok(())
		})
		.await
	}

	/// Move a transaction forward. Returns `false` (and commits nothing) for
	/// transitions that would not move it forward.
	pub async fn update_transaction_status(
		&self,
		id: &str,
		status: TransactionStatus,
		settlement_hash: Option<String>,
	) -> Result<bool, StoreError> {
		{
			let state = self.state.read().await;
			let tx = state
				.transactions
				.iter()
				.find(|tx| tx.id == id)
				.ok_or_else(|| StoreError::TransactionNotFound(id.to_string()))?;
			if !tx.status.can_transition_to(status) {
				debug!(
					"Ignoring status change {:?} -> {:?} for {}",
					tx.status, status, id
				);
				return Ok(false);
			}
		}

		let id = id.to_string();
		self.commit("update_transaction_status", move |state| {
			let tx = find_transaction(state, &id)?;
			Ok(advance_transaction(tx, status, settlement_hash))
		})
		.await
	}

	pub async fn get_transaction(&self, id: &str) -> Option<Transaction> {
		self.state
			.read()
			.await
			.transactions
			.iter()
			.find(|tx| tx.id == id)
			.cloned()
	}

	/// History, newest first, optionally restricted to one card.
	pub async fn list_transactions(&self, card_id: Option<&str>) -> Vec<Transaction> {
		self.state
			.read()
			.await
			.transactions
			.iter()
			.filter(|tx| card_id.is_none() || tx.card_id.as_deref() == card_id)
			.cloned()
			.sorted_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)))
			.collect()
	}

	// Spend lifecycle

	/// Insert the history row, lock objects covering the amount and create the
	/// pending spend, all in one commit.
	pub async fn record_spend(&self, record: SpendRecord) -> Result<PendingTransaction, StoreError> {
		self.commit("record_spend", move |state| {
			ensure_card(state, &record.card_id)?;
			let objects = state
				.unspent_objects
				.entry(record.card_id.clone())
				.or_default();
			let locked_object_ids = lock_inputs(objects, record.amount)?;

			let pending = PendingTransaction {
				id: record.pending_id,
				card_id: record.card_id.clone(),
				to: record.to,
				amount: record.amount,
				timestamp: record.timestamp,
				transaction_id: record.transaction.id.clone(),
				locked_object_ids,
				settlement_hash: None,
			};

			state.transactions.push(record.transaction);
			state
				.pending_transactions
				.entry(record.card_id.clone())
				.or_default()
				.push(pending.clone());
			mark_stale(state, &record.card_id);
			Ok(pending)
		})
		.await
	}

	/// Lock inputs for a pending spend that has none yet (spends first seen on a tag).
	pub async fn reserve_inputs(
		&self,
		card_id: &str,
		pending_id: &str,
	) -> Result<PendingTransaction, StoreError> {
		let card_id = card_id.to_string();
		let pending_id = pending_id.to_string();
		self.commit("reserve_inputs", move |state| {
			let amount = find_pending(state, &card_id, &pending_id)?.amount;
			let objects = state.unspent_objects.entry(card_id.clone()).or_default();
			let locked = lock_inputs(objects, amount)?;

			let pending = find_pending(state, &card_id, &pending_id)?;
			pending.locked_object_ids = locked;
			Ok(pending.clone())
		})
		.await
	}

	/// Remember the settlement hash of a submitted spend.
	pub async fn record_submission(
		&self,
		card_id: &str,
		pending_id: &str,
		hash: &str,
	) -> Result<(), StoreError> {
		let card_id = card_id.to_string();
		let pending_id = pending_id.to_string();
		let hash = hash.to_string();
		self.commit("record_submission", move |state| {
			find_pending(state, &card_id, &pending_id)?.settlement_hash = Some(hash);
			Ok(())
		})
		.await
	}

	/// A spend was confirmed: drop it, consume its inputs, add the change and
	/// confirm its history row.
	pub async fn settle_pending(
		&self,
		card_id: &str,
		pending_id: &str,
		hash: &str,
		created_objects: Vec<ObjectRef>,
	) -> Result<Transaction, StoreError> {
		let card_id = card_id.to_string();
		let pending_id = pending_id.to_string();
		let hash = hash.to_string();
		self.commit("settle_pending", move |state| {
			let pending = take_pending(state, &card_id, &pending_id)?;

			let objects = state.unspent_objects.entry(card_id.clone()).or_default();
			objects.retain(|o| !pending.locked_object_ids.contains(&o.id));
			for created in created_objects {
				if !objects.iter().any(|o| o.id == created.id) {
					objects.push(created.into());
				}
			}

			if let Some(card) = state.cards.get_mut(&card_id) {
				card.retired_object_ids
					.extend(pending.locked_object_ids.iter().cloned());
			}
			mark_stale(state, &card_id);

			let tx = find_transaction(state, &pending.transaction_id)?;
			advance_transaction(tx, TransactionStatus::Confirmed, Some(hash));
			Ok(tx.clone())
		})
		.await
	}

	/// A spend failed permanently: drop it, release its inputs, fail its history row.
	pub async fn fail_pending(
		&self,
		card_id: &str,
		pending_id: &str,
	) -> Result<Transaction, StoreError> {
		let card_id = card_id.to_string();
		let pending_id = pending_id.to_string();
		self.commit("fail_pending", move |state| {
			let pending = take_pending(state, &card_id, &pending_id)?;

			if let Some(objects) = state.unspent_objects.get_mut(&card_id) {
				for object in objects
					.iter_mut()
					.filter(|o| pending.locked_object_ids.contains(&o.id))
				{
					object.locked = false;
				}
			}
			mark_stale(state, &card_id);

			let hash = pending.settlement_hash.clone();
			let tx = find_transaction(state, &pending.transaction_id)?;
			advance_transaction(tx, TransactionStatus::Failed, hash);
			Ok(tx.clone())
		})
		.await
	}

	// Sync support

	/// Apply a merge plan in one commit: card row, objects, pending spends and
	/// history rows for spends first seen on the tag.
	pub async fn apply_merge(&self, plan: &MergePlan, synced_at: DateTime<Utc>) -> Result<Card, StoreError> {
		let plan = plan.clone();
		let card_id = plan.card.id.clone();
		self.commit("apply_merge", move |state| {
			let mut card = state
				.cards
				.get(&plan.card.id)
				.cloned()
				.unwrap_or_else(|| plan.card.clone());
			card.last_synced_at = Some(synced_at);
			card.tag_stale = true;
			state.cards.insert(card.id.clone(), card);

			state
				.unspent_objects
				.insert(plan.card.id.clone(), plan.resulting_objects.clone());

			let mut pending = plan.spends_to_keep_pending.clone();
			pending.extend(plan.spends_to_settle.iter().cloned());
			pending.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
			state.pending_transactions.insert(plan.card.id.clone(), pending);

			state.transactions.extend(plan.new_transactions.iter().cloned());
			Ok(())
		})
		.await?;

		self.get_card(&card_id)
			.await
			.ok_or(StoreError::CardNotFound(card_id))
	}

	pub async fn touch_synced(&self, card_id: &str, synced_at: DateTime<Utc>) -> Result<(), StoreError> {
		let card_id = card_id.to_string();
		self.commit("touch_synced", move |state| {
			state
				.cards
				.get_mut(&card_id)
				.ok_or_else(|| StoreError::CardNotFound(card_id.clone()))?
				.last_synced_at = Some(synced_at);
			Ok(())
		})
		.await
	}

	/// Record that `written` reached the tag. The stale flag only clears when the
	/// store still matches what was written.
	pub async fn mark_tag_written(
		&self,
		card_id: &str,
		written: &TagLedgerPayload,
	) -> Result<bool, StoreError> {
		let current = self.ledger(card_id).await?.to_payload();
		if &current != written {
			debug!("Card {} changed during write-back, tag stays stale", card_id);
			return Ok(false);
		}

		let card_id = card_id.to_string();
		self.commit("mark_tag_written", move |state| {
			let card = state
				.cards
				.get_mut(&card_id)
				.ok_or_else(|| StoreError::CardNotFound(card_id.clone()))?;
			card.tag_stale = false;
			card.retired_object_ids.clear();
			Ok(true)
		})
		.await
	}
}

fn ensure_card(state: &LedgerState, card_id: &str) -> Result<(), StoreError> {
	if state.cards.contains_key(card_id) {
		Ok(())
	} else {
		Err(StoreError::CardNotFound(card_id.to_string()))
	}
}

fn mark_stale(state: &mut LedgerState, card_id: &str) {
	if let Some(card) = state.cards.get_mut(card_id) {
		card.tag_stale = true;
	}
}

fn find_transaction<'a>(state: &'a mut LedgerState, id: &str) -> Result<&'a mut Transaction, StoreError> {
	state
		.transactions
		.iter_mut()
		.find(|tx| tx.id == id)
		.ok_or_else(|| StoreError::TransactionNotFound(id.to_string()))
}

fn find_pending<'a>(
	state: &'a mut LedgerState,
	card_id: &str,
	pending_id: &str,
) -> Result<&'a mut PendingTransaction, StoreError> {
	state
		.pending_transactions
		.get_mut(card_id)
		.and_then(|pending| pending.iter_mut().find(|p| p.id == pending_id))
		.ok_or_else(|| StoreError::PendingNotFound(pending_id.to_string()))
}

fn take_pending(
	state: &mut LedgerState,
	card_id: &str,
	pending_id: &str,
) -> Result<PendingTransaction, StoreError> {
	let pending = state
		.pending_transactions
		.get_mut(card_id)
		.ok_or_else(|| StoreError::PendingNotFound(pending_id.to_string()))?;
	let index = pending
		.iter()
		.position(|p| p.id == pending_id)
		.ok_or_else(|| StoreError::PendingNotFound(pending_id.to_string()))?;
	Ok(pending.remove(index))
}

fn advance_transaction(
	tx: &mut Transaction,
	status: TransactionStatus,
	settlement_hash: Option<String>,
) -> bool {
	if !tx.status.can_transition_to(status) {
		return false;
	}
	tx.status = status;
	if status == TransactionStatus::Confirmed {
		tx.tx_type = tx.direction.settled_type();
	}
	if settlement_hash.is_some() {
		tx.settlement_hash = settlement_hash;
	}
	true
}

/// Lock unlocked objects, largest first, until `amount` is covered.
fn lock_inputs(objects: &mut [UnspentObject], amount: u64) -> Result<Vec<String>, StoreError> {
	let candidates: Vec<usize> = objects
		.iter()
		.enumerate()
		.filter(|(_, o)| !o.locked)
		.sorted_by(|(_, a), (_, b)| b.amount.cmp(&a.amount).then_with(|| a.id.cmp(&b.id)))
		.map(|(i, _)| i)
		.collect();

	let mut covered = 0u64;
	let mut selected = Vec::new();
	for index in candidates {
		if covered >= amount {
			break;
		}
		covered = covered.saturating_add(objects[index].amount);
		selected.push(index);
	}

	if covered < amount {
		return Err(StoreError::InsufficientUnlockedFunds {
			available: covered,
			requested: amount,
		});
	}

	Ok(selected
		.into_iter()
		.map(|index| {
			objects[index].locked = true;
			objects[index].id.clone()
		})
		.collect())
}

fn refresh_balances(state: &mut LedgerState) -> Result<(), StoreError> {
	for (card_id, card) in state.cards.iter_mut() {
		let objects = sum_amounts(
			state
				.unspent_objects
				.get(card_id)
				.into_iter()
				.flatten()
				.map(|o| o.amount),
		);
		let pending = sum_amounts(
			state
				.pending_transactions
				.get(card_id)
				.into_iter()
				.flatten()
				.map(|p| p.amount),
		);
		if pending > objects {
			return Err(StoreError::BalanceInvariant {
				card_id: card_id.clone(),
				objects,
				pending,
			});
		}
		card.balance = objects - pending;
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::wallet::repositories::InMemoryLedgerStateRepository;
	use crate::wallet::types::{SpendDirection, TransactionType};

	async fn store_with_card() -> (CardStore, Arc<InMemoryLedgerStateRepository>) {
		let repo = Arc::new(InMemoryLedgerStateRepository::new());
		let store = CardStore::open(repo.clone()).await.unwrap();
		store
			.upsert_card(Card::new("c1", "Card", "0xcard"))
			.await
			.unwrap();
		store
			.replace_unspent_objects("c1", vec![UnspentObject::new("o1", 10)])
			.await
			.unwrap();
		(store, repo)
	}

	fn spend(amount: u64) -> SpendRecord {
		SpendRecord {
			card_id: "c1".to_string(),
			pending_id: "p1".to_string(),
			to: "0xabc".to_string(),
			amount,
			timestamp: 1_000,
			transaction: Transaction {
				id: "t1".to_string(),
				tx_type: TransactionType::Pending,
				amount,
				from: Some("0xcard".to_string()),
				to: Some("0xabc".to_string()),
				timestamp: 1_000,
				status: TransactionStatus::Pending,
				note: None,
				card_id: Some("c1".to_string()),
				settlement_hash: None,
				direction: SpendDirection::Send,
			},
		}
	}

	#[tokio::test]
	async fn balance_tracks_objects_minus_pending() {
		let (store, _) = store_with_card().await;
		assert_eq!(store.get_card("c1").await.unwrap().balance, 10);

		let pending = store.record_spend(spend(4)).await.unwrap();
		assert_eq!(pending.locked_object_ids, vec!["o1".to_string()]);
		assert_eq!(store.get_card("c1").await.unwrap().balance, 6);
		assert!(store.get_unspent_objects("c1").await[0].locked);
	}

	#[tokio::test]
	async fn rejects_pending_beyond_objects() {
		let (store, _) = store_with_card().await;
		let err = store.record_spend(spend(11)).await.unwrap_err();
		assert!(matches!(err, StoreError::InsufficientUnlockedFunds { .. }));
		assert!(store.get_pending_transactions("c1").await.is_empty());
		assert!(store.list_transactions(None).await.is_empty());
	}

	#[tokio::test]
	async fn failed_save_leaves_state_unchanged() {
		let (store, repo) = store_with_card().await;
		repo.fail_next_saves(1);
		assert!(matches!(
			store.record_spend(spend(4)).await,
			Err(StoreError::Io(_))
		));
		assert!(store.get_pending_transactions("c1").await.is_empty());
		assert!(!store.get_unspent_objects("c1").await[0].locked);
		assert_eq!(store.get_card("c1").await.unwrap().balance, 10);
	}

	#[tokio::test]
	async fn settle_consumes_inputs_and_adds_change() {
		let (store, _) = store_with_card().await;
		store.record_spend(spend(4)).await.unwrap();
		let change = ObjectRef {
			id: "c:change".to_string(),
			amount: 6,
			version: Some(1),
		};
		let tx = store
			.settle_pending("c1", "p1", "0xhash", vec![change])
			.await
			.unwrap();

		assert_eq!(tx.status, TransactionStatus::Confirmed);
		assert_eq!(tx.tx_type, TransactionType::Sent);
		assert_eq!(tx.settlement_hash.as_deref(), Some("0xhash"));
		let objects = store.get_unspent_objects("c1").await;
		assert_eq!(objects.len(), 1);
		assert_eq!(objects[0].id, "c:change");
		let card = store.get_card("c1").await.unwrap();
		assert_eq!(card.balance, 6);
		assert!(card.retired_object_ids.contains("o1"));
	}

	#[tokio::test]
	async fn fail_releases_locks() {
		let (store, _) = store_with_card().await;
		store.record_spend(spend(4)).await.unwrap();
		let tx = store.fail_pending("c1", "p1").await.unwrap();
		assert_eq!(tx.status, TransactionStatus::Failed);
		assert!(!store.get_unspent_objects("c1").await[0].locked);
		assert_eq!(store.get_card("c1").await.unwrap().balance, 10);
	}

	#[tokio::test]
	async fn status_updates_are_monotonic() {
		let (store, repo) = store_with_card().await;
		store.record_spend(spend(4)).await.unwrap();
		let saves = repo.save_count();

		assert!(!store
			.update_transaction_status("t1", TransactionStatus::Pending, None)
			.await
			.unwrap());
		assert_eq!(repo.save_count(), saves);

		assert!(store
			.update_transaction_status("t1", TransactionStatus::Confirmed, Some("0xh".to_string()))
			.await
			.unwrap());
		assert!(!store
			.update_transaction_status("t1", TransactionStatus::Pending, None)
			.await
			.unwrap());
		assert_eq!(
			store.get_transaction("t1").await.unwrap().status,
			TransactionStatus::Confirmed
		);
	}

	#[tokio::test]
	async fn delete_cascades_and_detaches_history() {
		let (store, _) = store_with_card().await;
		store.record_spend(spend(4)).await.unwrap();
		store.delete_card("c1").await.unwrap();

		assert!(store.get_card("c1").await.is_none());
		assert!(store.get_unspent_objects("c1").await.is_empty());
		assert!(store.get_pending_transactions("c1").await.is_empty());
		let history = store.list_transactions(None).await;
		assert_eq!(history.len(), 1);
		assert_eq!(history[0].card_id, None);
	}

	#[tokio::test]
	async fn addresses_are_unique() {
		let (store, _) = store_with_card().await;
		let err = store
			.upsert_card(Card::new("c2", "Other", "0xcard"))
			.await
			.unwrap_err();
		assert_eq!(err, StoreError::DuplicateAddress("0xcard".to_string()));
		assert_eq!(store.get_card_by_address("0xcard").await.unwrap().id, "c1");
	}

	#[tokio::test]
	async fn reopen_restores_committed_state() {
		let (store, repo) = store_with_card().await;
		store.record_spend(spend(4)).await.unwrap();
		drop(store);

		let reopened = CardStore::open(repo).await.unwrap();
		assert_eq!(reopened.get_card("c1").await.unwrap().balance, 6);
		assert_eq!(reopened.get_pending_transactions("c1").await.len(), 1);
	}

	#[tokio::test]
	async fn tag_written_clears_stale_only_when_current() {
		let (store, _) = store_with_card().await;
		store.record_spend(spend(4)).await.unwrap();
		let ledger = store.ledger("c1").await.unwrap();
		assert!(ledger.card.tag_stale);

		let mut outdated = ledger.to_payload();
		outdated.last_balance = 10;
		assert!(!store.mark_tag_written("c1", &outdated).await.unwrap());
		assert!(store.get_card("c1").await.unwrap().tag_stale);

		assert!(store.mark_tag_written("c1", &ledger.to_payload()).await.unwrap());
		assert!(!store.get_card("c1").await.unwrap().tag_stale);
	}
}
