//! Settlement path shared by the sync engine and the transaction processor.
//!
//! Resolving a pending spend either polls the hash it was already submitted
//! under, or reserves inputs, builds and signs an intent and submits it. Every
//! call to the settlement layer is bounded by the configured timeout; transient
//! submit failures are retried with exponential backoff inside that bound.

use crate::config::SettlementConfig;
use crate::settlement::{
	ObjectRef, SettlementClient, SettlementError, SettlementStatus, Signer, TransactionIntentBuilder,
};
use crate::wallet::card_store::CardStore;
use crate::wallet::types::{PendingTransaction, StoreError, Transaction};

use backoff::{ExponentialBackoff, future::retry};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// What happened to a pending spend after one settlement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingResolution {
	/// Confirmed; the store has consumed its inputs.
	Settled(Transaction),
	/// Permanently failed; its inputs are released.
	Failed {
		transaction: Transaction,
		cause: SettlementError,
	},
	/// Still queued. Carries the error when the attempt itself failed.
	StillPending(Option<SettlementError>),
}

pub struct SettlementService {
	signer: Arc<dyn Signer>,
	client: Arc<dyn SettlementClient>,
	config: SettlementConfig,
}

impl SettlementService {
	pub fn new(
		signer: Arc<dyn Signer>,
		client: Arc<dyn SettlementClient>,
		config: SettlementConfig,
	) -> Self {
		Self {
			signer,
			client,
			config,
		}
	}

	/// Drive one pending spend as far as the settlement layer allows.
	///
	/// Settlement failures are folded into the resolution; only store errors
	/// are returned as errors.
	pub async fn resolve(
		&self,
		store: &CardStore,
		from: &str,
		pending: &PendingTransaction,
	) -> Result<PendingResolution, StoreError> {
		if let Some(hash) = &pending.settlement_hash {
			match self.status(hash).await {
				Ok(status) => return self.apply_status(store, pending, hash, status).await,
				Err(SettlementError::UnknownTransaction(_)) => {
					warn!("Settlement layer lost {}, resubmitting spend {}", hash, pending.id);
				}
				Err(e) => {
					debug!("Status of {} unavailable: {}", hash, e);
					return Ok(PendingResolution::StillPending(Some(e)));
				}
			}
		}

		let pending = if pending.locked_object_ids.is_empty() {
			match store.reserve_inputs(&pending.card_id, &pending.id).await {
				Ok(reserved) => reserved,
				Err(StoreError::InsufficientUnlockedFunds {
					available,
					requested,
				}) => {
					debug!(
						"Spend {} waits for inputs: {} unlocked, {} needed",
						pending.id, available, requested
					);
					return Ok(PendingResolution::StillPending(Some(
						SettlementError::InsufficientBalance {
							available,
							requested,
						},
					)));
				}
				Err(e) => return Err(e),
			}
		} else {
			pending.clone()
		};

		let inputs: Vec<ObjectRef> = store
			.get_unspent_objects(&pending.card_id)
			.await
			.iter()
			.filter(|o| pending.locked_object_ids.contains(&o.id))
			.map(|o| o.object_ref())
			.collect();

		let submitted = match self.sign_and_submit(from, &pending, inputs).await {
			Ok(hash) => hash,
			Err(e) if e.is_balance_related() => {
				warn!("Spend {} rejected at settlement: {}", pending.id, e);
				let transaction = store.fail_pending(&pending.card_id, &pending.id).await?;
				return Ok(PendingResolution::Failed {
					transaction,
					cause: e,
				});
			}
			Err(e) => {
				info!("Spend {} stays pending: {}", pending.id, e);
				return Ok(PendingResolution::StillPending(Some(e)));
			}
		};

		store
			.record_submission(&pending.card_id, &pending.id, &submitted)
			.await?;

		match self.status(&submitted).await {
			Ok(status) => self.apply_status(store, &pending, &submitted, status).await,
			Err(e) => Ok(PendingResolution::StillPending(Some(e))),
		}
	}

	async fn apply_status(
		&self,
		store: &CardStore,
		pending: &PendingTransaction,
		hash: &str,
		status: SettlementStatus,
	) -> Result<PendingResolution, StoreError> {
		match status {
			SettlementStatus::Confirmed { created_objects } => {
				let transaction = store
					.settle_pending(&pending.card_id, &pending.id, hash, created_objects)
					.await?;
				info!("Spend {} confirmed as {}", pending.id, hash);
				Ok(PendingResolution::Settled(transaction))
			}
			SettlementStatus::Failed(reason) => {
				let transaction = store.fail_pending(&pending.card_id, &pending.id).await?;
				warn!("Spend {} failed at settlement: {}", pending.id, reason);
				Ok(PendingResolution::Failed {
					transaction,
					cause: SettlementError::Rejected(reason),
				})
			}
			SettlementStatus::Pending => {
				debug!("Spend {} awaiting finality under {}", pending.id, hash);
				Ok(PendingResolution::StillPending(None))
			}
		}
	}

	async fn sign_and_submit(
		&self,
		from: &str,
		pending: &PendingTransaction,
		inputs: Vec<ObjectRef>,
	) -> Result<String, SettlementError> {
		let intent = TransactionIntentBuilder::new()
			.with_from(from)
			.with_to(pending.to.clone())
			.with_amount(pending.amount)
			.with_inputs(inputs)
			.with_nonce(pending.timestamp)
			.build()?;

		let signed = self.signer.sign(&intent).await?;
		self.submit(&signed).await
	}

	async fn submit(&self, signed: &[u8]) -> Result<String, SettlementError> {
		let policy = ExponentialBackoff {
			initial_interval: Duration::from_millis(50),
			max_interval: Duration::from_millis(1_000),
			max_elapsed_time: Some(self.config.retry_budget),
			..Default::default()
		};

		let client = &self.client;
		let attempts = retry(policy, || async move {
			client.submit(signed).await.map_err(|e| {
				if e.is_transient() {
					debug!("Transient submit failure, retrying: {}", e);
					backoff::Error::transient(e)
				} else {
					backoff::Error::permanent(e)
				}
			})
		});

		tokio::time::timeout(self.config.timeout, attempts)
			.await
			.map_err(|_| SettlementError::Timeout(self.config.timeout))?
	}

	async fn status(&self, hash: &str) -> Result<SettlementStatus, SettlementError> {
		tokio::time::timeout(self.config.timeout, self.client.get_status(hash))
			.await
			.map_err(|_| SettlementError::Timeout(self.config.timeout))?
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::settlement::{SimulatedSettlementClient, SimulatedSigner};
	use crate::wallet::card_store::SpendRecord;
	use crate::wallet::repositories::InMemoryLedgerStateRepository;
	use crate::wallet::types::{
		Card, SpendDirection, TransactionStatus, TransactionType, UnspentObject,
	};

	async fn setup() -> (CardStore, Arc<SimulatedSettlementClient>, SettlementService) {
		let store = CardStore::open(Arc::new(InMemoryLedgerStateRepository::new()))
			.await
			.unwrap();
		store
			.upsert_card(Card::new("c1", "Card", "0xcard"))
			.await
			.unwrap();
		store
			.replace_unspent_objects("c1", vec![UnspentObject::new("o1", 10)])
			.await
			.unwrap();

		let client = Arc::new(SimulatedSettlementClient::new());
		let service = SettlementService::new(
			Arc::new(SimulatedSigner::new("test-key")),
			client.clone(),
			SettlementConfig {
				timeout: Duration::from_secs(2),
				retry_budget: Duration::from_millis(500),
			},
		);
		(store, client, service)
	}

	async fn queue(store: &CardStore) -> PendingTransaction {
		store
			.record_spend(SpendRecord {
				card_id: "c1".to_string(),
				pending_id: "p1".to_string(),
				to: "0xabc".to_string(),
				amount: 4,
				timestamp: 1_000,
				transaction: Transaction {
					id: "t1".to_string(),
					tx_type: TransactionType::Pending,
					amount: 4,
					from: Some("0xcard".to_string()),
					to: Some("0xabc".to_string()),
					timestamp: 1_000,
					status: TransactionStatus::Pending,
					note: None,
					card_id: Some("c1".to_string()),
					settlement_hash: None,
					direction: SpendDirection::Send,
				},
			})
			.await
			.unwrap()
	}

	#[tokio::test]
	async fn settles_and_keeps_change() {
		let (store, _, service) = setup().await;
		let pending = queue(&store).await;

		let resolution = service.resolve(&store, "0xcard", &pending).await.unwrap();
		assert!(matches!(resolution, PendingResolution::Settled(ref tx) if tx.status == TransactionStatus::Confirmed));
		assert_eq!(store.get_card("c1").await.unwrap().balance, 6);
		let objects = store.get_unspent_objects("c1").await;
		assert_eq!(objects.len(), 1);
		assert!(objects[0].id.ends_with(":change"));
	}

	#[tokio::test]
	async fn transient_failures_are_retried() {
		let (store, client, service) = setup().await;
		let pending = queue(&store).await;
		client.push_failure(SettlementError::Transient("flaky".to_string()));

		let resolution = service.resolve(&store, "0xcard", &pending).await.unwrap();
		assert!(matches!(resolution, PendingResolution::Settled(_)));
		assert_eq!(client.submission_count(), 2);
	}

	#[tokio::test]
	async fn rejection_keeps_spend_pending() {
		let (store, client, service) = setup().await;
		let pending = queue(&store).await;
		client.push_failure(SettlementError::Rejected("busy".to_string()));

		let resolution = service.resolve(&store, "0xcard", &pending).await.unwrap();
		assert!(matches!(
			resolution,
			PendingResolution::StillPending(Some(SettlementError::Rejected(_)))
		));
		assert_eq!(store.get_pending_transactions("c1").await.len(), 1);
	}

	#[tokio::test]
	async fn slow_settlement_times_out_and_stays_queued() {
		let store = CardStore::open(Arc::new(InMemoryLedgerStateRepository::new()))
			.await
			.unwrap();
		store
			.upsert_card(Card::new("c1", "Card", "0xcard"))
			.await
			.unwrap();
		store
			.replace_unspent_objects("c1", vec![UnspentObject::new("o1", 10)])
			.await
			.unwrap();
		let client = Arc::new(SimulatedSettlementClient::new());
		client.set_latency(Some(Duration::from_millis(300)));
		let service = SettlementService::new(
			Arc::new(SimulatedSigner::new("test-key")),
			client.clone(),
			SettlementConfig {
				timeout: Duration::from_millis(100),
				retry_budget: Duration::from_millis(50),
			},
		);
		let pending = queue(&store).await;

		let resolution = service.resolve(&store, "0xcard", &pending).await.unwrap();
		assert_eq!(
			resolution,
			PendingResolution::StillPending(Some(SettlementError::Timeout(Duration::from_millis(100))))
		);
		let queued = store.get_pending_transactions("c1").await;
		assert_eq!(queued.len(), 1);
		assert!(queued[0].settlement_hash.is_none());
		assert_eq!(store.get_unspent_objects("c1").await[0].id, "o1");
	}

	#[tokio::test]
	async fn balance_failure_fails_the_spend() {
		let (store, client, service) = setup().await;
		let pending = queue(&store).await;
		client.push_failure(SettlementError::InsufficientBalance {
			available: 2,
			requested: 4,
		});

		let resolution = service.resolve(&store, "0xcard", &pending).await.unwrap();
		assert!(matches!(resolution, PendingResolution::Failed { .. }));
		assert!(store.get_pending_transactions("c1").await.is_empty());
		assert!(!store.get_unspent_objects("c1").await[0].locked);
	}

	#[tokio::test]
	async fn submitted_spend_is_polled_not_resubmitted() {
		let (store, client, service) = setup().await;
		client.set_auto_confirm(false);
		let pending = queue(&store).await;

		let first = service.resolve(&store, "0xcard", &pending).await.unwrap();
		assert_eq!(first, PendingResolution::StillPending(None));
		let pending = store.get_pending_transactions("c1").await.remove(0);
		let hash = pending.settlement_hash.clone().unwrap();

		client.confirm(&hash);
		let second = service.resolve(&store, "0xcard", &pending).await.unwrap();
		assert!(matches!(second, PendingResolution::Settled(_)));
		assert_eq!(client.submission_count(), 1);
	}
}
