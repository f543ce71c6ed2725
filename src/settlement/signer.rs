//!
//! Signer capability.
//!
//! Key custody lives outside the wallet core; the settlement path only needs
//! opaque signed bytes for an intent.

use crate::settlement::types::{SignerError, TransactionIntent};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[async_trait::async_trait]
pub trait Signer: Send + Sync {
	/// Produce the signed, submit-ready encoding of `intent`.
	async fn sign(&self, intent: &TransactionIntent) -> Result<Vec<u8>, SignerError>;
}

/// Wire envelope produced by `SimulatedSigner` and understood by the simulated client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedEnvelope {
	pub intent: TransactionIntent,
	pub key_id: String,
	pub signature: Vec<u8>,
}

impl SignedEnvelope {
	pub fn from_bytes(bytes: &[u8]) -> Result<Self, SignerError> {
		bincode::deserialize(bytes).map_err(|e| SignerError::Serialization(e.to_string()))
	}
}

/// Signer that attaches a random signature, for hosts without key custody.
#[derive(Debug, Clone)]
pub struct SimulatedSigner {
	key_id: String,
}

impl SimulatedSigner {
	pub fn new(key_id: impl Into<String>) -> Self {
		Self {
			key_id: key_id.into(),
		}
	}
}

#[async_trait::async_trait]
impl Signer for SimulatedSigner {
	async fn sign(&self, intent: &TransactionIntent) -> Result<Vec<u8>, SignerError> {
		let mut signature = vec![0u8; 64];
		rand::rng().fill(&mut signature[..]);

		let envelope = SignedEnvelope {
			intent: intent.clone(),
			key_id: self.key_id.clone(),
			signature,
		};
		let bytes =
			bincode::serialize(&envelope).map_err(|e| SignerError::Serialization(e.to_string()))?;

		debug!(
			"Signed intent {} -> {} ({} bytes) with key {}",
			intent.from,
			intent.to,
			bytes.len(),
			self.key_id
		);
		Ok(bytes)
	}
}
