//!
//! Settlement client capability.
//!
//! The wire protocol to the settlement network is out of scope; the wallet
//! submits signed bytes and polls status by hash. `SimulatedSettlementClient`
//! keeps an in-memory ledger of consumed objects and scripted failures.

use crate::settlement::signer::SignedEnvelope;
use crate::settlement::types::{ObjectRef, SettlementError, SettlementStatus};

use rand::Rng;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait::async_trait]
pub trait SettlementClient: Send + Sync {
	/// Submit signed bytes, returning the settlement hash.
	async fn submit(&self, signed: &[u8]) -> Result<String, SettlementError>;

	/// Current status of a previously submitted transaction.
	async fn get_status(&self, hash: &str) -> Result<SettlementStatus, SettlementError>;
}

#[derive(Debug)]
struct SimulatedLedger {
	statuses: HashMap<String, SettlementStatus>,
	consumed: HashSet<String>,
	scripted_failures: VecDeque<SettlementError>,
	auto_confirm: bool,
	submissions: usize,
	status_queries: usize,
	latency: Option<Duration>,
}

/// In-memory settlement layer used for offline development and tests.
#[derive(Debug)]
pub struct SimulatedSettlementClient {
	ledger: Mutex<SimulatedLedger>,
}

impl Default for SimulatedSettlementClient {
	fn default() -> Self {
		Self::new()
	}
}

impl SimulatedSettlementClient {
	pub fn new() -> Self {
		Self {
			ledger: Mutex::new(SimulatedLedger {
				statuses: HashMap::new(),
				consumed: HashSet::new(),
				scripted_failures: VecDeque::new(),
				auto_confirm: true,
				submissions: 0,
				status_queries: 0,
				latency: None,
			}),
		}
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, SimulatedLedger> {
		self.ledger.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Fail the next submission with `error`. Failures are consumed in order.
	pub fn push_failure(&self, error: SettlementError) {
		self.lock().scripted_failures.push_back(error);
	}

	/// When disabled, submissions stay `Pending` until `confirm` or `fail`.
	pub fn set_auto_confirm(&self, auto_confirm: bool) {
		self.lock().auto_confirm = auto_confirm;
	}

	/// Finalise a pending submission, keeping the change computed at submit time.
	pub fn confirm(&self, hash: &str) {
		let mut ledger = self.lock();
		if matches!(ledger.statuses.get(hash), Some(SettlementStatus::Pending)) {
			let created = ledger
				.statuses
				.get(&format!("{}#change", hash))
				.and_then(|status| match status {
					SettlementStatus::Confirmed { created_objects } => Some(created_objects.clone()),
					_ => None,
				})
				.unwrap_or_default();
			ledger.statuses.insert(
				hash.to_string(),
				SettlementStatus::Confirmed {
					created_objects: created,
				},
			);
		}
	}

	pub fn fail(&self, hash: &str, reason: &str) {
		self.lock()
			.statuses
			.insert(hash.to_string(), SettlementStatus::Failed(reason.to_string()));
	}

	/// Delay every submit and status call, e.g. to exceed the caller's timeout.
	pub fn set_latency(&self, latency: Option<Duration>) {
		self.lock().latency = latency;
	}

	async fn simulate_latency(&self) {
		let latency = self.lock().latency;
		if let Some(latency) = latency {
			tokio::time::sleep(latency).await;
		}
	}

	pub fn submission_count(&self) -> usize {
		self.lock().submissions
	}

	pub fn status_query_count(&self) -> usize {
		self.lock().status_queries
	}

	pub fn submitted_hashes(&self) -> Vec<String> {
		self.lock()
			.statuses
			.keys()
			.filter(|hash| !hash.ends_with("#change"))
			.cloned()
			.collect()
	}
}

#[async_trait::async_trait]
impl SettlementClient for SimulatedSettlementClient {
	async fn submit(&self, signed: &[u8]) -> Result<String, SettlementError> {
		self.simulate_latency().await;
		let mut ledger = self.lock();
		ledger.submissions += 1;

		if let Some(failure) = ledger.scripted_failures.pop_front() {
			warn!("Simulated settlement failure: {}", failure);
			return Err(failure);
		}

		let envelope = SignedEnvelope::from_bytes(signed)
			.map_err(|e| SettlementError::Rejected(format!("malformed transaction: {}", e)))?;
		let intent = envelope.intent;

		if let Some(spent) = intent
			.inputs
			.iter()
			.find(|input| ledger.consumed.contains(&input.id))
		{
			return Err(SettlementError::Rejected(format!(
				"object {} already consumed",
				spent.id
			)));
		}

		let available = intent.input_total();
		if available < intent.amount {
			return Err(SettlementError::InsufficientBalance {
				available,
				requested: intent.amount,
			});
		}

		let mut hash_bytes = [0u8; 32];
		rand::rng().fill(&mut hash_bytes);
		let hash = format!("0x{}", hex::encode(hash_bytes));

		for input in &intent.inputs {
			ledger.consumed.insert(input.id.clone());
		}

		let change = available - intent.amount;
		let created_objects = if change > 0 {
			vec![ObjectRef {
				id: format!("{}:change", &hash[..18]),
				amount: change,
				version: Some(1),
			}]
		} else {
			Vec::new()
		};

		let status = if ledger.auto_confirm {
			SettlementStatus::Confirmed { created_objects }
		} else {
			ledger.statuses.insert(
				format!("{}#change", hash),
				SettlementStatus::Confirmed { created_objects },
			);
			SettlementStatus::Pending
		};
		ledger.statuses.insert(hash.clone(), status);

		info!(
			"Simulated settlement accepted {} -> {} for {}: {}",
			intent.from, intent.to, intent.amount, hash
		);
		Ok(hash)
	}

	async fn get_status(&self, hash: &str) -> Result<SettlementStatus, SettlementError> {
		self.simulate_latency().await;
		let mut ledger = self.lock();
		ledger.status_queries += 1;
		let status = ledger
			.statuses
			.get(hash)
			.cloned()
			.ok_or_else(|| SettlementError::UnknownTransaction(hash.to_string()))?;
		debug!("Simulated status for {}: {:?}", hash, status);
		Ok(status)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::settlement::{Signer, SimulatedSigner, TransactionIntent};

	async fn signed(inputs: Vec<ObjectRef>, amount: u64) -> Vec<u8> {
		let intent = TransactionIntent {
			from: "0xcard".to_string(),
			to: "0xabc".to_string(),
			amount,
			inputs,
			nonce: 1,
		};
		SimulatedSigner::new("k").sign(&intent).await.unwrap()
	}

	fn object(id: &str, amount: u64) -> ObjectRef {
		ObjectRef {
			id: id.to_string(),
			amount,
			version: None,
		}
	}

	#[tokio::test]
	async fn confirms_with_change() {
		let client = SimulatedSettlementClient::new();
		let hash = client.submit(&signed(vec![object("o1", 10)], 4).await).await.unwrap();
		match client.get_status(&hash).await.unwrap() {
			SettlementStatus::Confirmed { created_objects } => {
				assert_eq!(created_objects.len(), 1);
				assert_eq!(created_objects[0].amount, 6);
			}
			other => panic!("unexpected status {other:?}"),
		}
	}

	#[tokio::test]
	async fn rejects_double_spend() {
		let client = SimulatedSettlementClient::new();
		client.submit(&signed(vec![object("o1", 10)], 10).await).await.unwrap();
		let err = client
			.submit(&signed(vec![object("o1", 10)], 10).await)
			.await
			.unwrap_err();
		assert!(matches!(err, SettlementError::Rejected(_)));
	}

	#[tokio::test]
	async fn pending_until_confirmed() {
		let client = SimulatedSettlementClient::new();
		client.set_auto_confirm(false);
		let hash = client.submit(&signed(vec![object("o1", 10)], 4).await).await.unwrap();
		assert_eq!(client.get_status(&hash).await.unwrap(), SettlementStatus::Pending);

		client.confirm(&hash);
		assert!(matches!(
			client.get_status(&hash).await.unwrap(),
			SettlementStatus::Confirmed { .. }
		));
	}

	#[tokio::test]
	async fn scripted_failures_come_first() {
		let client = SimulatedSettlementClient::new();
		client.push_failure(SettlementError::Transient("offline".to_string()));
		let bytes = signed(vec![object("o1", 10)], 4).await;
		assert!(client.submit(&bytes).await.unwrap_err().is_transient());
		assert!(client.submit(&bytes).await.is_ok());
		assert_eq!(client.submission_count(), 2);
	}
}
