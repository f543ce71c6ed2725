//! Tag ledger model.
//!
//! Turns a decoded tag snapshot plus the store's view of the same card into a
//! `MergePlan`. Nothing here touches the store; the plan is applied in a single
//! commit by the sync engine.
//!
//! Merge rules:
//! - incoming object ids replace the stored set. While the tag is stale the two
//!   sets are unioned instead, and ids retired since the last write are dropped;
//! - incoming pending spends are unioned with local ones keyed by
//!   `(to, amount, timestamp)`. Two spends with the same recipient and amount
//!   whose timestamps fall inside the duplicate window are one logical spend;
//! - an incoming spend matching an already confirmed or failed transaction is
//!   dropped.

use crate::tag::{PendingSpend, TagLedgerPayload};
use crate::utils::generate_id;
use crate::wallet::types::{
	Card, CardLedger, PendingTransaction, SpendDirection, SyncError, Transaction,
	TransactionStatus, TransactionType, UnspentObject, sum_amounts,
};

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;
use tracing::debug;

/// Default window inside which two equal spends collapse into one.
pub const DEFAULT_DUPLICATE_WINDOW: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct MergeOptions {
	/// Zero keeps every spend whose timestamp differs.
	pub duplicate_window: Duration,
	/// Whether pending spends may be handed to the settlement layer.
	pub online: bool,
}

impl Default for MergeOptions {
	fn default() -> Self {
		Self {
			duplicate_window: DEFAULT_DUPLICATE_WINDOW,
			online: false,
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergePlan {
	/// Stored card, or the card to create for a previously unseen tag.
	pub card: Card,
	pub is_new_card: bool,
	pub objects_to_add: Vec<UnspentObject>,
	pub objects_to_remove: Vec<String>,
	/// Pending spends to try against the settlement layer this cycle.
	pub spends_to_settle: Vec<PendingTransaction>,
	pub spends_to_keep_pending: Vec<PendingTransaction>,
	/// Incoming spends that collapsed into a known spend or were already resolved.
	pub spends_dropped: Vec<PendingSpend>,
	/// History rows for spends first seen on the tag.
	pub new_transactions: Vec<Transaction>,
	/// The card's objects after the merge.
	pub resulting_objects: Vec<UnspentObject>,
	pub balance_after: u64,
}

impl MergePlan {
	/// False when applying the plan would leave the store as it is.
	pub fn has_changes(&self) -> bool {
		self.is_new_card
			|| !self.objects_to_add.is_empty()
			|| !self.objects_to_remove.is_empty()
			|| !self.new_transactions.is_empty()
	}

	pub fn pending_count(&self) -> usize {
		self.spends_to_settle.len() + self.spends_to_keep_pending.len()
	}
}

fn is_same_spend(
	a_to: &str,
	a_amount: u64,
	a_timestamp: i64,
	b: &PendingSpend,
	window: Duration,
) -> bool {
	if a_to != b.to || a_amount != b.amount {
		return false;
	}
	let distance = a_timestamp.abs_diff(b.timestamp);
	distance == 0 || (distance as u128) <= window.as_millis()
}

/// Compute the merge of `incoming` into `existing` (None for an unseen tag).
pub fn diff(
	existing: Option<&CardLedger>,
	incoming: &TagLedgerPayload,
	options: &MergeOptions,
) -> Result<MergePlan, SyncError> {
	let (card, is_new_card) = match existing {
		Some(ledger) => {
			if ledger.card.address != incoming.wallet_address {
				return Err(SyncError::CardMismatch {
					expected: ledger.card.address.clone(),
					found: incoming.wallet_address.clone(),
				});
			}
			(ledger.card.clone(), false)
		}
		None => {
			let name = format!("Card {}", short_address(&incoming.wallet_address));
			(
				Card::new(generate_id("card"), name, incoming.wallet_address.clone()),
				true,
			)
		}
	};

	let stored_objects: &[UnspentObject] = existing.map(|l| l.objects.as_slice()).unwrap_or(&[]);
	let stored_pending: &[PendingTransaction] = existing.map(|l| l.pending.as_slice()).unwrap_or(&[]);
	let history: &[Transaction] = existing.map(|l| l.transactions.as_slice()).unwrap_or(&[]);

	let resulting_objects = merge_objects(&card, stored_objects, incoming);
	let objects_to_add: Vec<UnspentObject> = resulting_objects
		.iter()
		.filter(|o| !stored_objects.iter().any(|s| s.id == o.id))
		.cloned()
		.collect();
	let objects_to_remove: Vec<String> = stored_objects
		.iter()
		.filter(|s| !resulting_objects.iter().any(|o| o.id == s.id))
		.map(|s| s.id.clone())
		.collect();

	let (new_pending, spends_dropped) =
		merge_pending(&card, stored_pending, history, incoming, options.duplicate_window);
	let new_transactions: Vec<Transaction> = new_pending
		.iter()
		.map(|p| Transaction {
			id: p.transaction_id.clone(),
			tx_type: TransactionType::Pending,
			amount: p.amount,
			from: Some(card.address.clone()),
			to: Some(p.to.clone()),
			timestamp: p.timestamp,
			status: TransactionStatus::Pending,
			note: None,
			card_id: Some(card.id.clone()),
			settlement_hash: None,
			direction: SpendDirection::Send,
		})
		.collect();

	let mut pending: Vec<PendingTransaction> = stored_pending.to_vec();
	pending.extend(new_pending);
	pending.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));

	let objects_total = sum_amounts(resulting_objects.iter().map(|o| o.amount));
	let pending_total = sum_amounts(pending.iter().map(|p| p.amount));
	if pending_total > objects_total {
		return Err(SyncError::InconsistentLedger(format!(
			"pending spends {} exceed unspent objects {} for {}",
			pending_total, objects_total, card.address
		)));
	}

	let (spends_to_settle, spends_to_keep_pending) = if options.online {
		(pending, Vec::new())
	} else {
		(Vec::new(), pending)
	};

	let plan = MergePlan {
		card,
		is_new_card,
		objects_to_add,
		objects_to_remove,
		spends_to_settle,
		spends_to_keep_pending,
		spends_dropped,
		new_transactions,
		resulting_objects,
		balance_after: objects_total - pending_total,
	};

	debug!(
		"Merge plan for {}: +{} -{} objects, {} new spends, {} dropped, balance {}",
		plan.card.address,
		plan.objects_to_add.len(),
		plan.objects_to_remove.len(),
		plan.new_transactions.len(),
		plan.spends_dropped.len(),
		plan.balance_after
	);
	Ok(plan)
}

fn merge_objects(
	card: &Card,
	stored: &[UnspentObject],
	incoming: &TagLedgerPayload,
) -> Vec<UnspentObject> {
	let stored_by_id: HashMap<&str, &UnspentObject> =
		stored.iter().map(|o| (o.id.as_str(), o)).collect();

	let mut seen = BTreeSet::new();
	let mut ids: Vec<&str> = Vec::new();
	for id in &incoming.unspent_object_ids {
		if !card.retired_object_ids.contains(id) && seen.insert(id.as_str()) {
			ids.push(id);
		}
	}
	if card.tag_stale {
		for object in stored {
			if seen.insert(object.id.as_str()) {
				ids.push(&object.id);
			}
		}
	}

	// Value the tag carries but the store cannot attribute to a known object.
	let tag_objects_total = incoming.last_balance.saturating_add(incoming.pending_total());
	let known_total = sum_amounts(
		incoming
			.unspent_object_ids
			.iter()
			.filter(|id| ids.contains(&id.as_str()))
			.filter_map(|id| stored_by_id.get(id.as_str()))
			.map(|o| o.amount),
	);
	let mut unknown: Vec<&str> = ids
		.iter()
		.copied()
		.filter(|id| !stored_by_id.contains_key(id))
		.collect();
	unknown.sort_unstable();
	let shares = split_evenly(tag_objects_total.saturating_sub(known_total), unknown.len());
	let unknown_amounts: HashMap<&str, u64> = unknown.into_iter().zip(shares).collect();

	ids.into_iter()
		.map(|id| match stored_by_id.get(id) {
			Some(object) => (*object).clone(),
			None => UnspentObject::new(id, unknown_amounts.get(id).copied().unwrap_or(0)),
		})
		.collect()
}

fn split_evenly(total: u64, parts: usize) -> Vec<u64> {
	if parts == 0 {
		return Vec::new();
	}
	let parts_u64 = parts as u64;
	let share = total / parts_u64;
	let mut shares = vec![share; parts];
	shares[0] += total % parts_u64;
	shares
}

fn merge_pending(
	card: &Card,
	stored: &[PendingTransaction],
	history: &[Transaction],
	incoming: &TagLedgerPayload,
	window: Duration,
) -> (Vec<PendingTransaction>, Vec<PendingSpend>) {
	let mut spends = incoming.pending_spends.clone();
	spends.sort_by(|a, b| {
		a.timestamp
			.cmp(&b.timestamp)
			.then_with(|| a.to.cmp(&b.to))
			.then_with(|| a.amount.cmp(&b.amount))
	});

	let mut created: Vec<PendingTransaction> = Vec::new();
	let mut dropped = Vec::new();

	for spend in spends {
		let known_locally = stored
			.iter()
			.chain(created.iter())
			.any(|p| is_same_spend(&p.to, p.amount, p.timestamp, &spend, window));
		if known_locally {
			// Same spend read twice, or a spend this device created.
			if !stored.iter().any(|p| p.spend() == spend) {
				dropped.push(spend);
			}
			continue;
		}

		let resolved = history.iter().any(|tx| {
			tx.status.is_final()
				&& tx.to.as_deref() == Some(spend.to.as_str())
				&& is_same_spend(&spend.to, tx.amount, tx.timestamp, &spend, window)
		});
		if resolved {
			debug!(
				"Dropping tag spend of {} to {} already resolved locally",
				spend.amount, spend.to
			);
			dropped.push(spend);
			continue;
		}

		created.push(PendingTransaction {
			id: generate_id("pending"),
			card_id: card.id.clone(),
			to: spend.to,
			amount: spend.amount,
			timestamp: spend.timestamp,
			transaction_id: generate_id("tx"),
			locked_object_ids: Vec::new(),
			settlement_hash: None,
		});
	}

	(created, dropped)
}

fn short_address(address: &str) -> &str {
	let end = address
		.char_indices()
		.nth(10)
		.map(|(i, _)| i)
		.unwrap_or(address.len());
	&address[..end]
}

#[cfg(test)]
mod tests {
	use super::*;

	const T: i64 = 1_700_000_000_000;

	fn payload(objects: &[&str], last_balance: u64, spends: Vec<PendingSpend>) -> TagLedgerPayload {
		TagLedgerPayload {
			wallet_address: "0xcard".to_string(),
			last_balance,
			unspent_object_ids: objects.iter().map(|s| s.to_string()).collect(),
			pending_spends: spends,
		}
	}

	fn spend(amount: u64, timestamp: i64) -> PendingSpend {
		PendingSpend {
			to: "0xabc".to_string(),
			amount,
			timestamp,
		}
	}

	fn ledger(objects: Vec<UnspentObject>) -> CardLedger {
		CardLedger {
			card: Card::new("c1", "Card", "0xcard"),
			objects,
			pending: Vec::new(),
			transactions: Vec::new(),
		}
	}

	#[test]
	fn unseen_tag_creates_card_with_tag_objects() {
		let incoming = payload(&["o1", "o2"], 7, vec![]);
		let plan = diff(None, &incoming, &MergeOptions::default()).unwrap();

		assert!(plan.is_new_card);
		assert_eq!(plan.card.address, "0xcard");
		assert_eq!(plan.objects_to_add.len(), 2);
		// 7 split over two unknown objects, remainder on the first sorted id
		assert_eq!(plan.resulting_objects[0].amount, 4);
		assert_eq!(plan.resulting_objects[1].amount, 3);
		assert_eq!(plan.balance_after, 7);
	}

	#[test]
	fn tag_objects_replace_stored_set() {
		let existing = ledger(vec![UnspentObject::new("o1", 10), UnspentObject::new("o2", 5)]);
		let incoming = payload(&["o1", "o3"], 12, vec![]);
		let plan = diff(Some(&existing), &incoming, &MergeOptions::default()).unwrap();

		assert_eq!(plan.objects_to_remove, vec!["o2".to_string()]);
		assert_eq!(plan.objects_to_add, vec![UnspentObject::new("o3", 2)]);
		assert_eq!(plan.balance_after, 12);
	}

	#[test]
	fn spends_within_window_collapse() {
		let incoming = payload(&["o1"], 6, vec![spend(4, T), spend(4, T + 2)]);
		let plan = diff(None, &incoming, &MergeOptions::default()).unwrap();

		assert_eq!(plan.pending_count(), 1);
		assert_eq!(plan.new_transactions.len(), 1);
		assert_eq!(plan.spends_dropped, vec![spend(4, T + 2)]);
	}

	#[test]
	fn second_scan_collapses_with_stored_spend() {
		let first = payload(&["o1"], 6, vec![spend(4, T)]);
		let plan = diff(None, &first, &MergeOptions::default()).unwrap();
		let mut existing = ledger(plan.resulting_objects.clone());
		existing.card = plan.card.clone();
		existing.pending = plan.spends_to_keep_pending.clone();
		existing.transactions = plan.new_transactions.clone();

		let second = payload(&["o1"], 6, vec![spend(4, T + 2_000)]);
		let plan = diff(Some(&existing), &second, &MergeOptions::default()).unwrap();
		assert!(!plan.has_changes());
		assert_eq!(plan.pending_count(), 1);
	}

	#[test]
	fn zero_window_preserves_distinct_spends() {
		let incoming = payload(&["o1"], 2, vec![spend(4, T), spend(4, T + 2)]);
		let options = MergeOptions {
			duplicate_window: Duration::ZERO,
			online: false,
		};
		let plan = diff(None, &incoming, &options).unwrap();
		assert_eq!(plan.pending_count(), 2);
	}

	#[test]
	fn spends_outside_window_are_distinct() {
		let incoming = payload(&["o1"], 2, vec![spend(4, T), spend(4, T + 6_000)]);
		let plan = diff(None, &incoming, &MergeOptions::default()).unwrap();
		assert_eq!(plan.pending_count(), 2);
	}

	#[test]
	fn resolved_spends_are_not_resurrected() {
		let mut existing = ledger(vec![UnspentObject::new("o9", 6)]);
		existing.transactions.push(Transaction {
			id: "t1".to_string(),
			tx_type: TransactionType::Sent,
			amount: 4,
			from: Some("0xcard".to_string()),
			to: Some("0xabc".to_string()),
			timestamp: T,
			status: TransactionStatus::Confirmed,
			note: None,
			card_id: Some("c1".to_string()),
			settlement_hash: Some("0xhash".to_string()),
			direction: SpendDirection::Send,
		});
		existing.card.tag_stale = true;
		existing.card.retired_object_ids.insert("o1".to_string());

		// Tag still carries the pre-settlement ledger.
		let incoming = payload(&["o1"], 6, vec![spend(4, T)]);
		let plan = diff(Some(&existing), &incoming, &MergeOptions::default()).unwrap();

		assert_eq!(plan.pending_count(), 0);
		assert_eq!(plan.spends_dropped.len(), 1);
		assert!(!plan.has_changes());
		assert_eq!(plan.resulting_objects, vec![UnspentObject::new("o9", 6)]);
		assert_eq!(plan.balance_after, 6);
	}

	#[test]
	fn online_plan_settles_every_pending_spend() {
		let incoming = payload(&["o1"], 6, vec![spend(4, T)]);
		let options = MergeOptions {
			online: true,
			..Default::default()
		};
		let plan = diff(None, &incoming, &options).unwrap();
		assert_eq!(plan.spends_to_settle.len(), 1);
		assert!(plan.spends_to_keep_pending.is_empty());
	}

	#[test]
	fn address_mismatch_is_rejected() {
		let existing = ledger(vec![]);
		let mut incoming = payload(&[], 0, vec![]);
		incoming.wallet_address = "0xother".to_string();
		assert!(matches!(
			diff(Some(&existing), &incoming, &MergeOptions::default()),
			Err(SyncError::CardMismatch { .. })
		));
	}

	#[test]
	fn pending_beyond_objects_is_inconsistent() {
		let existing = ledger(vec![UnspentObject::new("o1", 3)]);
		let incoming = payload(&["o1"], 0, vec![spend(4, T)]);
		assert!(matches!(
			diff(Some(&existing), &incoming, &MergeOptions::default()),
			Err(SyncError::InconsistentLedger(_))
		));
	}
}
