//! Transaction intent builder
//!
//! Assembles the intent handed to the signer from a pending spend and the
//! objects reserved to cover it.

use crate::settlement::types::{ObjectRef, SettlementError, TransactionIntent};

/// Builder for constructing settlement intents
#[derive(Debug, Default)]
pub struct TransactionIntentBuilder {
	from: Option<String>,
	to: Option<String>,
	amount: Option<u64>,
	inputs: Vec<ObjectRef>,
	nonce: Option<i64>,
}

impl TransactionIntentBuilder {
	/// Creates a new intent builder
	pub fn new() -> Self {
		Self::default()
	}

	/// Sets the debited address
	pub fn with_from(mut self, from: impl Into<String>) -> Self {
		self.from = Some(from.into());
		self
	}

	/// Sets the recipient address
	pub fn with_to(mut self, to: impl Into<String>) -> Self {
		self.to = Some(to.into());
		self
	}

	pub fn with_amount(mut self, amount: u64) -> Self {
		self.amount = Some(amount);
		self
	}

	/// Adds the objects consumed by the spend
	pub fn with_inputs(mut self, inputs: impl IntoIterator<Item = ObjectRef>) -> Self {
		self.inputs.extend(inputs);
		self
	}

	pub fn with_nonce(mut self, nonce: i64) -> Self {
		self.nonce = Some(nonce);
		self
	}

	/// Builds the final intent
	pub fn build(self) -> Result<TransactionIntent, SettlementError> {
		let from = self
			.from
			.ok_or_else(|| SettlementError::Intent("missing sender".to_string()))?;
		let to = self
			.to
			.ok_or_else(|| SettlementError::Intent("missing recipient".to_string()))?;
		let amount = self
			.amount
			.ok_or_else(|| SettlementError::Intent("missing amount".to_string()))?;
		let nonce = self
			.nonce
			.ok_or_else(|| SettlementError::Intent("missing nonce".to_string()))?;

		if amount == 0 {
			return Err(SettlementError::Intent("amount must be positive".to_string()));
		}

		let intent = TransactionIntent {
			from,
			to,
			amount,
			inputs: self.inputs,
			nonce,
		};

		let input_total = intent.input_total();
		if input_total < amount {
			log::error!(
				"Intent inputs cover {} but spend needs {}",
				input_total,
				amount
			);
			return Err(SettlementError::InsufficientBalance {
				available: input_total,
				requested: amount,
			});
		}

		log::info!(
			"Built intent {} -> {} for {} using {} inputs",
			intent.from,
			intent.to,
			intent.amount,
			intent.inputs.len()
		);
		Ok(intent)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn input(id: &str, amount: u64) -> ObjectRef {
		ObjectRef {
			id: id.to_string(),
			amount,
			version: None,
		}
	}

	#[test]
	fn builds_when_inputs_cover_amount() {
		let intent = TransactionIntentBuilder::new()
			.with_from("0xcard")
			.with_to("0xabc")
			.with_amount(4)
			.with_inputs([input("o1", 10)])
			.with_nonce(1)
			.build()
			.unwrap();
		assert_eq!(intent.input_total(), 10);
	}

	#[test]
	fn rejects_uncovered_amount() {
		let err = TransactionIntentBuilder::new()
			.with_from("0xcard")
			.with_to("0xabc")
			.with_amount(12)
			.with_inputs([input("o1", 10)])
			.with_nonce(1)
			.build()
			.unwrap_err();
		assert!(err.is_balance_related());
	}

	#[test]
	fn rejects_missing_fields() {
		let err = TransactionIntentBuilder::new().with_amount(1).build().unwrap_err();
		assert!(matches!(err, SettlementError::Intent(_)));
	}
}
