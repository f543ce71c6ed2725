//! Types for the ledger snapshot carried on an NFC tag

use serde::{Deserialize, Serialize};

/// One spend recorded on the tag that the settlement layer has not confirmed yet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingSpend {
	/// Recipient address.
	pub to: String,
	/// Amount in base units. Written to the tag in token units by the codec.
	pub amount: u64,
	/// Creation instant as Unix milliseconds.
	pub timestamp: i64,
}

/// Snapshot of a card's ledger as stored in the tag's data area.
///
/// Each write fully replaces the previous snapshot. Amounts are held in base
/// units; `LedgerCodec` owns the wire form and its token-unit numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagLedgerPayload {
	/// Account identifier bound to the card.
	pub wallet_address: String,
	/// Balance at the time of the last write, in base units.
	pub last_balance: u64,
	/// Settlement-layer identifiers of the card's unspent objects.
	pub unspent_object_ids: Vec<String>,
	/// Spends queued on the card and not yet settled.
	pub pending_spends: Vec<PendingSpend>,
}

impl TagLedgerPayload {
	/// Sum of all pending spend amounts.
	pub fn pending_total(&self) -> u64 {
		self.pending_spends
			.iter()
			.fold(0u64, |acc, spend| acc.saturating_add(spend.amount))
	}
}

/// Result of decoding a tag's data area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodedTag {
	/// The tag carries no ledger yet (factory-fresh or wiped).
	Blank,
	/// The tag carries a structurally valid ledger.
	Ledger(TagLedgerPayload),
}

/// Structural problems found while decoding tag bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
	#[error("Truncated payload: declared {declared} bytes, found {available}")]
	Truncated { declared: usize, available: usize },

	#[error("Missing length prefix: {0} bytes available")]
	MissingPrefix(usize),

	#[error("Payload is not valid UTF-8")]
	InvalidUtf8,

	#[error("Payload is not valid JSON: {0}")]
	InvalidJson(String),

	#[error("Invalid field `{field}`: {reason}")]
	InvalidField { field: String, reason: String },
}

impl DecodeError {
	pub(crate) fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
		DecodeError::InvalidField {
			field: field.into(),
			reason: reason.into(),
		}
	}
}

/// Errors raised while encoding a payload for a tag.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
	#[error("Payload needs {needed} bytes but the tag holds {capacity}")]
	CapacityExceeded { needed: usize, capacity: usize },

	#[error("Failed to serialize payload: {0}")]
	Serialization(String),

	#[error("Token scale of {0} decimals is not supported")]
	UnsupportedScale(u32),
}

/// Hardware-level tag I/O failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagIoError {
	#[error("No tag detected")]
	NoTagDetected,

	#[error("Tag write failed: {0}")]
	WriteError(String),
}
