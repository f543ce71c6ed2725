//! Command and query surface for UI and CLI layers.
//!
//! Hosts construct the capabilities (tag I/O, signer, settlement client,
//! connectivity), hand them to `WalletService::start`, and from then on only
//! issue commands and observe results and events.

use crate::config::WalletConfig;
use crate::settlement::{SettlementClient, Signer};
use crate::tag::{LedgerCodec, TagIo};
use crate::wallet::card_store::CardStore;
use crate::wallet::connectivity::Connectivity;
use crate::wallet::repositories::{FileLedgerStateRepository, LedgerStateRepository};
use crate::wallet::sync::{
	ChannelEventHandler, EventDispatcher, LoggingEventHandler, SettlementService, SyncCancellation,
	ScannedTag, SyncEngine, SyncEvent, SyncPhase, SyncReport, session::CardLocks,
};
use crate::wallet::transaction_processor::TransactionProcessor;
use crate::wallet::types::{
	Card, SpendError, StoreError, SyncError, Transaction, UnspentObject,
};

use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// External collaborators, real or simulated, chosen by the host.
#[derive(Clone)]
pub struct WalletCapabilities {
	pub tag: Arc<dyn TagIo>,
	pub signer: Arc<dyn Signer>,
	pub settlement_client: Arc<dyn SettlementClient>,
	pub connectivity: Arc<dyn Connectivity>,
}

pub struct WalletService {
	config: WalletConfig,
	store: Arc<CardStore>,
	processor: TransactionProcessor,
	engine: SyncEngine,
	events: Arc<EventDispatcher>,
	locks: Arc<CardLocks>,
}

impl WalletService {
	/// Start with the file repository under `config.data_dir`.
	pub async fn open(
		config: WalletConfig,
		capabilities: WalletCapabilities,
	) -> Result<Self, StoreError> {
		let repository = Arc::new(FileLedgerStateRepository::new(config.data_dir.clone()));
		Self::start(config, repository, capabilities).await
	}

	pub async fn start(
		config: WalletConfig,
		repository: Arc<dyn LedgerStateRepository>,
		capabilities: WalletCapabilities,
	) -> Result<Self, StoreError> {
		let store = Arc::new(CardStore::open(repository).await?);
		let events = Arc::new(EventDispatcher::new());
		events
			.register_handler(Box::new(LoggingEventHandler::new(config.token_decimals)))
			.await;
		let locks = Arc::new(CardLocks::new());

		let settlement = Arc::new(SettlementService::new(
			capabilities.signer,
			capabilities.settlement_client,
			config.settlement.clone(),
		));
		let processor = TransactionProcessor::new(
			store.clone(),
			settlement.clone(),
			capabilities.connectivity.clone(),
			events.clone(),
			locks.clone(),
			config.card_mode,
			config.receive_address.clone(),
			config.token_decimals,
		);
		let engine = SyncEngine::new(
			store.clone(),
			capabilities.tag,
			settlement,
			capabilities.connectivity,
			events.clone(),
			locks.clone(),
			config.sync.clone(),
		)
		.with_codec(LedgerCodec::with_decimals(config.token_decimals));

		info!("Wallet service started in {} mode", config.card_mode);
		Ok(Self {
			config,
			store,
			processor,
			engine,
			events,
			locks,
		})
	}

	pub fn config(&self) -> &WalletConfig {
		&self.config
	}

	pub async fn list_cards(&self) -> Vec<Card> {
		self.store.list_cards().await
	}

	pub async fn get_card(&self, id: &str) -> Option<Card> {
		self.store.get_card(id).await
	}

	pub async fn list_transactions(&self, card_id: Option<&str>) -> Vec<Transaction> {
		self.store.list_transactions(card_id).await
	}

	pub async fn request_spend(
		&self,
		card_id: &str,
		amount: u64,
		recipient: &str,
		note: Option<String>,
		allow_offline: bool,
	) -> Result<Transaction, SpendError> {
		self.processor
			.request_spend(card_id, amount, recipient, note, allow_offline)
			.await
	}

	pub async fn request_pull(
		&self,
		card_id: &str,
		amount: u64,
		note: Option<String>,
		allow_offline: bool,
	) -> Result<Transaction, SpendError> {
		self.processor
			.request_pull(card_id, amount, note, allow_offline)
			.await
	}

	pub async fn start_sync(
		&self,
		card_id: &str,
		cancel: &SyncCancellation,
	) -> Result<SyncReport, SyncError> {
		self.engine.start_sync(card_id, cancel).await
	}

	pub async fn sync_tag(&self, cancel: &SyncCancellation) -> Result<SyncReport, SyncError> {
		self.engine.sync_tag(cancel).await
	}

	/// Decode the tag in the field and plan its merge without touching the store.
	pub async fn scan_tag(&self, cancel: &SyncCancellation) -> Result<ScannedTag, SyncError> {
		self.engine.scan(cancel).await
	}

	pub async fn provision_card(
		&self,
		display_name: &str,
		address: &str,
		initial_objects: Vec<UnspentObject>,
	) -> Result<Card, SyncError> {
		self.engine
			.provision_card(display_name, address, initial_objects)
			.await
	}

	/// Delete a card once no sync or spend holds it.
	pub async fn delete_card(&self, card_id: &str) -> Result<(), StoreError> {
		let _guard = self.locks.acquire(card_id).await;
		self.store.delete_card(card_id).await?;
		info!("Deleted card {}", card_id);
		Ok(())
	}

	pub fn phase(&self) -> SyncPhase {
		self.engine.phase()
	}

	pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
		self.engine.subscribe_phase()
	}

	/// Receive every event emitted from now on.
	pub async fn subscribe_events(&self) -> mpsc::UnboundedReceiver<SyncEvent> {
		let (handler, receiver) = ChannelEventHandler::channel();
		self.events.register_handler(Box::new(handler)).await;
		receiver
	}

	/// Wait for any in-flight sync to finish, then release every service.
	pub async fn shutdown(self) {
		self.engine.wait_idle().await;
		let cards = self.store.list_cards().await.len();
		info!("Wallet service stopped ({} cards)", cards);
	}
}
