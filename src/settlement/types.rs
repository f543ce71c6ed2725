//! Types shared by the settlement capabilities

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Reference to a settlement-layer object used as a spend input or created as change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
	pub id: String,
	pub amount: u64,
	pub version: Option<u64>,
}

/// Everything the signer needs to authorise one spend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionIntent {
	/// Address of the card being debited.
	pub from: String,
	/// Recipient address.
	pub to: String,
	/// Amount in base units.
	pub amount: u64,
	/// Objects consumed by the spend.
	pub inputs: Vec<ObjectRef>,
	/// Creation instant of the spend (Unix milliseconds), doubles as a nonce.
	pub nonce: i64,
}

impl TransactionIntent {
	pub fn input_total(&self) -> u64 {
		self.inputs
			.iter()
			.fold(0u64, |acc, input| acc.saturating_add(input.amount))
	}
}

/// Settlement status of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlementStatus {
	/// Submitted, not final yet.
	Pending,
	/// Final. Carries the objects the transaction created (change outputs).
	Confirmed { created_objects: Vec<ObjectRef> },
	/// Permanently failed.
	Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SignerError {
	#[error("Failed to serialize intent: {0}")]
	Serialization(String),

	#[error("Signing key unavailable: {0}")]
	KeyUnavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SettlementError {
	#[error("Settlement layer unreachable: {0}")]
	Transient(String),

	#[error("Settlement rejected: {0}")]
	Rejected(String),

	#[error("Insufficient balance at settlement: have {available}, need {requested}")]
	InsufficientBalance { available: u64, requested: u64 },

	#[error("Settlement call timed out after {0:?}")]
	Timeout(Duration),

	#[error("Unknown transaction: {0}")]
	UnknownTransaction(String),

	#[error("Signing failed: {0}")]
	Signing(#[from] SignerError),

	#[error("Invalid intent: {0}")]
	Intent(String),
}

impl SettlementError {
	/// Errors worth retrying within the same call.
	pub fn is_transient(&self) -> bool {
		matches!(self, SettlementError::Transient(_))
	}

	/// Balance failures are the only settlement failures surfaced to callers.
	pub fn is_balance_related(&self) -> bool {
		matches!(self, SettlementError::InsufficientBalance { .. })
	}
}
