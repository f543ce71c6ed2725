use crate::settlement::SettlementError;
use crate::utils::{format_token_amount, generate_id, now_millis};
use crate::wallet::card_store::{CardStore, SpendRecord};
use crate::wallet::connectivity::Connectivity;
use crate::wallet::sync::events::{EventDispatcher, SyncEvent};
use crate::wallet::sync::session::CardLocks;
use crate::wallet::sync::settlement_service::{PendingResolution, SettlementService};
use crate::wallet::types::{
	CardLedger, CardMode, SpendDirection, SpendError, StoreError, Transaction, TransactionStatus,
	TransactionType,
};

use std::sync::Arc;
use tracing::{debug, error, info};

/// Decision point for every spend this device originates.
///
/// A spend is recorded first, with its inputs locked and its pending entry
/// created in one store commit. When online it is then settled immediately;
/// any failure other than a balance failure leaves it queued for the next sync.
pub struct TransactionProcessor {
	store: Arc<CardStore>,
	settlement: Arc<SettlementService>,
	connectivity: Arc<dyn Connectivity>,
	events: Arc<EventDispatcher>,
	locks: Arc<CardLocks>,
	mode: CardMode,
	receive_address: Option<String>,
	decimals: u32,
}

impl TransactionProcessor {
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		store: Arc<CardStore>,
		settlement: Arc<SettlementService>,
		connectivity: Arc<dyn Connectivity>,
		events: Arc<EventDispatcher>,
		locks: Arc<CardLocks>,
		mode: CardMode,
		receive_address: Option<String>,
		decimals: u32,
	) -> Self {
		Self {
			store,
			settlement,
			connectivity,
			events,
			locks,
			mode,
			receive_address,
			decimals,
		}
	}

	pub fn mode(&self) -> CardMode {
		self.mode
	}

	/// Pay `recipient` from the card.
	pub async fn request_spend(
		&self,
		card_id: &str,
		amount: u64,
		recipient: &str,
		note: Option<String>,
		allow_offline: bool,
	) -> Result<Transaction, SpendError> {
		self.originate(
			SpendDirection::Send,
			card_id,
			amount,
			Some(recipient),
			note,
			allow_offline,
		)
		.await
	}

	/// Collect `amount` from the tapped card into this device's receive address.
	pub async fn request_pull(
		&self,
		card_id: &str,
		amount: u64,
		note: Option<String>,
		allow_offline: bool,
	) -> Result<Transaction, SpendError> {
		self.originate(
			SpendDirection::Pull,
			card_id,
			amount,
			None,
			note,
			allow_offline,
		)
		.await
	}

	async fn originate(
		&self,
		direction: SpendDirection,
		card_id: &str,
		amount: u64,
		recipient: Option<&str>,
		note: Option<String>,
		allow_offline: bool,
	) -> Result<Transaction, SpendError> {
		if !self.mode.permits(direction) {
			return Err(SpendError::WrongCardMode {
				mode: self.mode,
				direction,
			});
		}
		if amount == 0 {
			return Err(SpendError::InvalidAmount);
		}
		let to = match direction {
			SpendDirection::Send => recipient
				.filter(|to| !to.is_empty())
				.map(str::to_string)
				.ok_or(SpendError::InvalidRecipient)?,
			SpendDirection::Pull => self
				.receive_address
				.clone()
				.ok_or(SpendError::NoReceiveAddress)?,
		};

		let _guard = self.locks.acquire(card_id).await;

		let ledger = match self.store.ledger(card_id).await {
			Ok(ledger) => ledger,
			Err(StoreError::CardNotFound(id)) => return Err(SpendError::CardNotFound(id)),
			Err(e) => return Err(e.into()),
		};
		check_funds(&ledger, amount)?;

		let online = self.connectivity.is_online();
		if !online && !allow_offline {
			return Err(SpendError::OfflineNotPermitted);
		}

		let timestamp = now_millis();
		let transaction = Transaction {
			id: generate_id("tx"),
			tx_type: if online {
				direction.settled_type()
			} else {
				TransactionType::Pending
			},
			amount,
			from: Some(ledger.card.address.clone()),
			to: Some(to.clone()),
			timestamp,
			status: TransactionStatus::Pending,
			note,
			card_id: Some(card_id.to_string()),
			settlement_hash: None,
			direction,
		};
		let transaction_id = transaction.id.clone();

		let pending = self
			.store
			.record_spend(SpendRecord {
				card_id: card_id.to_string(),
				pending_id: generate_id("pending"),
				to: to.clone(),
				amount,
				timestamp,
				transaction,
			})
			.await?;
		info!(
			"Recorded {} of {} from card {} to {} ({})",
			direction,
			format_token_amount(amount, self.decimals),
			card_id,
			to,
			if online { "settling" } else { "offline" }
		);

		if online {
			match self
				.settlement
				.resolve(&self.store, &ledger.card.address, &pending)
				.await?
			{
				PendingResolution::Settled(tx) => {
					self.events
						.dispatch(SyncEvent::SpendSettled {
							card_id: card_id.to_string(),
							transaction_id: tx.id.clone(),
							amount,
							settlement_hash: tx.settlement_hash.clone().unwrap_or_default(),
						})
						.await;
					return Ok(tx);
				}
				PendingResolution::Failed { transaction, cause } => {
					self.events
						.dispatch(SyncEvent::SpendFailed {
							card_id: card_id.to_string(),
							transaction_id: transaction.id.clone(),
							reason: cause.to_string(),
						})
						.await;
					if let SettlementError::InsufficientBalance {
						available,
						requested,
					} = cause
					{
						error!("Spend {} rejected for balance at settlement", transaction.id);
						return Err(SpendError::InsufficientBalance {
							available,
							requested,
						});
					}
					return Ok(transaction);
				}
				PendingResolution::StillPending(reason) => {
					debug!(
						"Immediate settlement of {} deferred: {:?}",
						transaction_id, reason
					);
				}
			}
		}

		self.events
			.dispatch(SyncEvent::SpendQueued {
				card_id: card_id.to_string(),
				transaction_id: transaction_id.clone(),
				amount,
			})
			.await;

		self.store
			.get_transaction(&transaction_id)
			.await
			.ok_or_else(|| StoreError::TransactionNotFound(transaction_id).into())
	}
}

fn check_funds(ledger: &CardLedger, amount: u64) -> Result<(), SpendError> {
	let balance = ledger.balance();
	if amount > balance {
		return Err(SpendError::InsufficientBalance {
			available: balance,
			requested: amount,
		});
	}
	let unlocked = ledger.unlocked_total();
	if amount > unlocked {
		return Err(SpendError::FundsReserved {
			available: unlocked,
			requested: amount,
		});
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::config::SettlementConfig;
	use crate::settlement::{SimulatedSettlementClient, SimulatedSigner};
	use crate::wallet::connectivity::StaticConnectivity;
	use crate::wallet::repositories::InMemoryLedgerStateRepository;
	use crate::wallet::types::{Card, UnspentObject};
	use std::time::Duration;

	struct Harness {
		store: Arc<CardStore>,
		client: Arc<SimulatedSettlementClient>,
		connectivity: Arc<StaticConnectivity>,
		processor: TransactionProcessor,
	}

	async fn harness(mode: CardMode, online: bool) -> Harness {
		let store = Arc::new(
			CardStore::open(Arc::new(InMemoryLedgerStateRepository::new()))
				.await
				.unwrap(),
		);
		store
			.upsert_card(Card::new("c1", "Card", "0xcard"))
			.await
			.unwrap();
		store
			.replace_unspent_objects("c1", vec![UnspentObject::new("o1", 10)])
			.await
			.unwrap();

		let client = Arc::new(SimulatedSettlementClient::new());
		let settlement = Arc::new(SettlementService::new(
			Arc::new(SimulatedSigner::new("k")),
			client.clone(),
			SettlementConfig {
				timeout: Duration::from_secs(2),
				retry_budget: Duration::from_millis(200),
			},
		));
		let connectivity = Arc::new(StaticConnectivity::new(online));
		let processor = TransactionProcessor::new(
			store.clone(),
			settlement,
			connectivity.clone(),
			Arc::new(EventDispatcher::new()),
			Arc::new(CardLocks::new()),
			mode,
			Some("0xshop".to_string()),
			0,
		);
		Harness {
			store,
			client,
			connectivity,
			processor,
		}
	}

	#[tokio::test]
	async fn offline_spend_is_queued() {
		let h = harness(CardMode::Sender, false).await;
		let tx = h
			.processor
			.request_spend("c1", 4, "0xabc", None, true)
			.await
			.unwrap();

		assert_eq!(tx.status, TransactionStatus::Pending);
		assert_eq!(tx.tx_type, TransactionType::Pending);
		let pending = h.store.get_pending_transactions("c1").await;
		assert_eq!(pending.len(), 1);
		assert_eq!(pending[0].to, "0xabc");
		assert_eq!(pending[0].amount, 4);
		assert_eq!(h.store.get_card("c1").await.unwrap().balance, 6);
	}

	#[tokio::test]
	async fn online_spend_settles_immediately() {
		let h = harness(CardMode::Sender, true).await;
		let tx = h
			.processor
			.request_spend("c1", 4, "0xabc", Some("coffee".to_string()), false)
			.await
			.unwrap();

		assert_eq!(tx.status, TransactionStatus::Confirmed);
		assert_eq!(tx.tx_type, TransactionType::Sent);
		assert!(tx.settlement_hash.is_some());
		assert!(h.store.get_pending_transactions("c1").await.is_empty());
		assert_eq!(h.store.get_card("c1").await.unwrap().balance, 6);
	}

	#[tokio::test]
	async fn settlement_failure_falls_back_to_queue() {
		let h = harness(CardMode::Sender, true).await;
		h.client
			.push_failure(SettlementError::Rejected("node busy".to_string()));

		let tx = h
			.processor
			.request_spend("c1", 4, "0xabc", None, false)
			.await
			.unwrap();
		assert_eq!(tx.status, TransactionStatus::Pending);
		assert_eq!(h.store.get_pending_transactions("c1").await.len(), 1);
	}

	#[tokio::test]
	async fn balance_failure_at_settlement_is_fatal() {
		let h = harness(CardMode::Sender, true).await;
		h.client.push_failure(SettlementError::InsufficientBalance {
			available: 1,
			requested: 4,
		});

		let err = h
			.processor
			.request_spend("c1", 4, "0xabc", None, false)
			.await
			.unwrap_err();
		assert!(matches!(err, SpendError::InsufficientBalance { .. }));
		assert!(h.store.get_pending_transactions("c1").await.is_empty());
		assert_eq!(h.store.get_card("c1").await.unwrap().balance, 10);
	}

	#[tokio::test]
	async fn preconditions_reject_without_state() {
		let h = harness(CardMode::Sender, false).await;
		assert_eq!(
			h.processor.request_spend("c1", 0, "0xabc", None, true).await,
			Err(SpendError::InvalidAmount)
		);
		assert!(matches!(
			h.processor.request_spend("c1", 11, "0xabc", None, true).await,
			Err(SpendError::InsufficientBalance {
				available: 10,
				requested: 11
			})
		));
		assert_eq!(
			h.processor.request_spend("c1", 4, "0xabc", None, false).await,
			Err(SpendError::OfflineNotPermitted)
		);
		assert_eq!(
			h.processor.request_spend("nope", 4, "0xabc", None, true).await,
			Err(SpendError::CardNotFound("nope".to_string()))
		);
		assert!(h.store.list_transactions(None).await.is_empty());
		assert!(h.store.get_pending_transactions("c1").await.is_empty());
		assert!(!h.store.get_unspent_objects("c1").await[0].locked);
	}

	#[tokio::test]
	async fn locked_funds_are_reserved() {
		let h = harness(CardMode::Sender, false).await;
		h.processor
			.request_spend("c1", 4, "0xabc", None, true)
			.await
			.unwrap();
		assert!(matches!(
			h.processor.request_spend("c1", 3, "0xabc", None, true).await,
			Err(SpendError::FundsReserved { available: 0, .. })
		));
	}

	#[tokio::test]
	async fn card_mode_gates_direction() {
		let sender = harness(CardMode::Sender, false).await;
		assert!(matches!(
			sender.processor.request_pull("c1", 4, None, true).await,
			Err(SpendError::WrongCardMode { .. })
		));

		let receiver = harness(CardMode::Receiver, false).await;
		assert!(matches!(
			receiver
				.processor
				.request_spend("c1", 4, "0xabc", None, true)
				.await,
			Err(SpendError::WrongCardMode { .. })
		));

		receiver.connectivity.set_online(true);
		let tx = receiver
			.processor
			.request_pull("c1", 4, None, false)
			.await
			.unwrap();
		assert_eq!(tx.tx_type, TransactionType::Received);
		assert_eq!(tx.to.as_deref(), Some("0xshop"));
		assert_eq!(tx.status, TransactionStatus::Confirmed);
	}
}
