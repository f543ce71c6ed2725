use crate::settlement::ObjectRef;
use crate::tag::{CodecError, DecodeError, PendingSpend, TagIoError, TagLedgerPayload};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// One physical NFC tag bound to one address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
	pub id: String,
	pub display_name: String,
	/// Presentation only.
	#[serde(default)]
	pub color_tag: Option<String>,
	pub address: String,
	/// Derived: sum of unspent objects minus sum of pending spends. Refreshed on
	/// every store commit, never written by callers.
	pub balance: u64,
	pub last_synced_at: Option<DateTime<Utc>>,
	pub created_at: DateTime<Utc>,
	/// True while the store holds changes the tag has not received yet.
	#[serde(default)]
	pub tag_stale: bool,
	/// Objects consumed since the last successful tag write.
	#[serde(default)]
	pub retired_object_ids: BTreeSet<String>,
}

impl Card {
	pub fn new(id: impl Into<String>, display_name: impl Into<String>, address: impl Into<String>) -> Self {
		Self {
			id: id.into(),
			display_name: display_name.into(),
			color_tag: None,
			address: address.into(),
			balance: 0,
			last_synced_at: None,
			created_at: Utc::now(),
			tag_stale: false,
			retired_object_ids: BTreeSet::new(),
		}
	}
}

/// One spendable unit of value owned by a card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnspentObject {
	/// Settlement-layer object identifier.
	pub id: String,
	pub amount: u64,
	#[serde(default)]
	pub version: Option<u64>,
	/// Reserved by an in-flight spend.
	#[serde(default)]
	pub locked: bool,
}

impl UnspentObject {
	pub fn new(id: impl Into<String>, amount: u64) -> Self {
		Self {
			id: id.into(),
			amount,
			version: None,
			locked: false,
		}
	}

	pub fn object_ref(&self) -> ObjectRef {
		ObjectRef {
			id: self.id.clone(),
			amount: self.amount,
			version: self.version,
		}
	}
}

impl From<ObjectRef> for UnspentObject {
	fn from(object: ObjectRef) -> Self {
		Self {
			id: object.id,
			amount: object.amount,
			version: object.version,
			locked: false,
		}
	}
}

/// A spend not yet confirmed by the settlement layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingTransaction {
	pub id: String,
	pub card_id: String,
	pub to: String,
	pub amount: u64,
	/// Creation instant, Unix milliseconds.
	pub timestamp: i64,
	/// The history row tracking this spend.
	pub transaction_id: String,
	/// Objects reserved for this spend. Empty for spends first seen on a tag.
	#[serde(default)]
	pub locked_object_ids: Vec<String>,
	/// Set once submitted; later cycles poll this hash instead of resubmitting.
	#[serde(default)]
	pub settlement_hash: Option<String>,
}

impl PendingTransaction {
	/// The tag-side representation of this spend.
	pub fn spend(&self) -> PendingSpend {
		PendingSpend {
			to: self.to.clone(),
			amount: self.amount,
			timestamp: self.timestamp,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
	Sent,
	Received,
	Pending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
	Pending,
	Confirmed,
	Failed,
}

impl TransactionStatus {
	/// Status only moves forward: pending to confirmed or failed.
	pub fn can_transition_to(self, next: TransactionStatus) -> bool {
		matches!(
			(self, next),
			(TransactionStatus::Pending, TransactionStatus::Confirmed)
				| (TransactionStatus::Pending, TransactionStatus::Failed)
		)
	}

	pub fn is_final(self) -> bool {
		!matches!(self, TransactionStatus::Pending)
	}
}

/// Which way value moves relative to this device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpendDirection {
	/// The card pays a recipient chosen on this device.
	#[default]
	Send,
	/// This device collects a payment from the tapped card.
	Pull,
}

impl SpendDirection {
	/// Transaction type once the spend is confirmed.
	pub fn settled_type(self) -> TransactionType {
		match self {
			SpendDirection::Send => TransactionType::Sent,
			SpendDirection::Pull => TransactionType::Received,
		}
	}
}

impl fmt::Display for SpendDirection {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			SpendDirection::Send => write!(f, "send"),
			SpendDirection::Pull => write!(f, "pull"),
		}
	}
}

/// Role this device plays, fixed by configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CardMode {
	Sender,
	Receiver,
}

impl CardMode {
	pub fn permits(self, direction: SpendDirection) -> bool {
		matches!(
			(self, direction),
			(CardMode::Sender, SpendDirection::Send) | (CardMode::Receiver, SpendDirection::Pull)
		)
	}
}

impl fmt::Display for CardMode {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			CardMode::Sender => write!(f, "sender"),
			CardMode::Receiver => write!(f, "receiver"),
		}
	}
}

/// Append-only history record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
	pub id: String,
	#[serde(rename = "type")]
	pub tx_type: TransactionType,
	pub amount: u64,
	pub from: Option<String>,
	pub to: Option<String>,
	pub timestamp: i64,
	pub status: TransactionStatus,
	pub note: Option<String>,
	pub card_id: Option<String>,
	pub settlement_hash: Option<String>,
	#[serde(default)]
	pub direction: SpendDirection,
}

/// Everything the store knows about one card, read in a single snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardLedger {
	pub card: Card,
	pub objects: Vec<UnspentObject>,
	pub pending: Vec<PendingTransaction>,
	pub transactions: Vec<Transaction>,
}

impl CardLedger {
	pub fn object_total(&self) -> u64 {
		sum_amounts(self.objects.iter().map(|o| o.amount))
	}

	pub fn pending_total(&self) -> u64 {
		sum_amounts(self.pending.iter().map(|p| p.amount))
	}

	pub fn unlocked_total(&self) -> u64 {
		sum_amounts(self.objects.iter().filter(|o| !o.locked).map(|o| o.amount))
	}

	pub fn balance(&self) -> u64 {
		self.object_total().saturating_sub(self.pending_total())
	}

	/// Snapshot to write to the tag. Pending spends are ordered by creation so
	/// that unchanged state always encodes to identical bytes.
	pub fn to_payload(&self) -> TagLedgerPayload {
		let mut pending_spends: Vec<PendingSpend> = self.pending.iter().map(|p| p.spend()).collect();
		pending_spends.sort_by(|a, b| {
			a.timestamp
				.cmp(&b.timestamp)
				.then_with(|| a.to.cmp(&b.to))
				.then_with(|| a.amount.cmp(&b.amount))
		});

		TagLedgerPayload {
			wallet_address: self.card.address.clone(),
			last_balance: self.balance(),
			unspent_object_ids: self.objects.iter().map(|o| o.id.clone()).collect(),
			pending_spends,
		}
	}
}

pub(crate) fn sum_amounts(amounts: impl Iterator<Item = u64>) -> u64 {
	amounts.fold(0u64, |acc, amount| acc.saturating_add(amount))
}

/// Persistence failures. A failed operation never leaves partial state behind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
	#[error("Persistence I/O error: {0}")]
	Io(String),

	#[error("Serialization error: {0}")]
	Serialization(String),

	#[error("Card not found: {0}")]
	CardNotFound(String),

	#[error("Address {0} is already bound to another card")]
	DuplicateAddress(String),

	#[error("Transaction not found: {0}")]
	TransactionNotFound(String),

	#[error("Pending transaction not found: {0}")]
	PendingNotFound(String),

	#[error("Card {card_id}: pending spends {pending} exceed unspent objects {objects}")]
	BalanceInvariant {
		card_id: String,
		objects: u64,
		pending: u64,
	},

	#[error("Only {available} unlocked, {requested} requested")]
	InsufficientUnlockedFunds { available: u64, requested: u64 },
}

/// Reasons a spend request is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SpendError {
	#[error("Amount must be greater than zero")]
	InvalidAmount,

	#[error("Card not found: {0}")]
	CardNotFound(String),

	#[error("Insufficient balance: have {available}, need {requested}")]
	InsufficientBalance { available: u64, requested: u64 },

	#[error("Funds reserved by in-flight spends: {available} unlocked, need {requested}")]
	FundsReserved { available: u64, requested: u64 },

	#[error("Device is offline and offline spends were not allowed")]
	OfflineNotPermitted,

	#[error("Device in {mode} mode cannot originate a {direction}")]
	WrongCardMode {
		mode: CardMode,
		direction: SpendDirection,
	},

	#[error("Recipient address must not be empty")]
	InvalidRecipient,

	#[error("No receive address configured for pull requests")]
	NoReceiveAddress,

	#[error("Store error: {0}")]
	Store(#[from] StoreError),
}

/// Failures of a sync cycle. Stores keep their last committed state.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
	#[error("Sync already in progress for card {0}")]
	SyncInProgress(String),

	#[error("Sync cancelled before reconciliation")]
	Cancelled,

	#[error("{operation} timed out after {after:?}")]
	Timeout {
		operation: &'static str,
		after: Duration,
	},

	#[error("Tag data rejected: {0}")]
	Decode(#[from] DecodeError),

	#[error("Tag encoding failed: {0}")]
	Codec(#[from] CodecError),

	#[error("Tag I/O error: {0}")]
	TagIo(#[from] TagIoError),

	#[error("Store error: {0}")]
	Store(#[from] StoreError),

	#[error("Tag is blank; provision a card first")]
	BlankTag,

	#[error("Tag already carries the ledger of {0}")]
	TagInUse(String),

	#[error("Tag belongs to {found}, expected {expected}")]
	CardMismatch { expected: String, found: String },

	#[error("Card not found: {0}")]
	CardNotFound(String),

	#[error("Tag ledger inconsistent: {0}")]
	InconsistentLedger(String),
}
