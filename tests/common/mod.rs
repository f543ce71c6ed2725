#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tapwallet_sync::config::{SettlementConfig, SyncConfig, WalletConfig};
use tapwallet_sync::settlement::{SimulatedSettlementClient, SimulatedSigner};
use tapwallet_sync::tag::{LedgerCodec, SimulatedTag, TagLedgerPayload};
use tapwallet_sync::wallet::repositories::InMemoryLedgerStateRepository;
use tapwallet_sync::wallet::{
	Card, CardMode, StaticConnectivity, UnspentObject, WalletCapabilities, WalletService,
};

pub const TAG_CAPACITY: usize = 504;
pub const CARD_ADDRESS: &str = "0xcard";

pub struct TestWallet {
	pub service: WalletService,
	pub tag: Arc<SimulatedTag>,
	pub client: Arc<SimulatedSettlementClient>,
	pub connectivity: Arc<StaticConnectivity>,
	pub repository: Arc<InMemoryLedgerStateRepository>,
}

pub fn config(mode: CardMode) -> WalletConfig {
	WalletConfig {
		card_mode: mode,
		receive_address: Some("0xshop".to_string()),
		token_decimals: 0,
		sync: SyncConfig {
			io_timeout: Duration::from_millis(200),
			duplicate_window: Duration::from_secs(5),
		},
		settlement: SettlementConfig {
			timeout: Duration::from_secs(1),
			retry_budget: Duration::from_millis(200),
		},
		..WalletConfig::default()
	}
}

pub fn capabilities(
	tag: &Arc<SimulatedTag>,
	client: &Arc<SimulatedSettlementClient>,
	connectivity: &Arc<StaticConnectivity>,
) -> WalletCapabilities {
	WalletCapabilities {
		tag: tag.clone(),
		signer: Arc::new(SimulatedSigner::new("test-key")),
		settlement_client: client.clone(),
		connectivity: connectivity.clone(),
	}
}

pub async fn wallet(mode: CardMode) -> anyhow::Result<TestWallet> {
	let tag = Arc::new(SimulatedTag::new(TAG_CAPACITY));
	let client = Arc::new(SimulatedSettlementClient::new());
	let connectivity = Arc::new(StaticConnectivity::new(false));
	let repository = Arc::new(InMemoryLedgerStateRepository::new());

	let service = WalletService::start(
		config(mode),
		repository.clone(),
		capabilities(&tag, &client, &connectivity),
	)
	.await?;

	Ok(TestWallet {
		service,
		tag,
		client,
		connectivity,
		repository,
	})
}

/// Wallet with one provisioned card holding a single object of 10.
pub async fn provisioned(mode: CardMode) -> anyhow::Result<(TestWallet, Card)> {
	let wallet = wallet(mode).await?;
	let card = wallet
		.service
		.provision_card("Test card", CARD_ADDRESS, vec![UnspentObject::new("o1", 10)])
		.await?;
	Ok((wallet, card))
}

pub fn encode(payload: &TagLedgerPayload) -> Vec<u8> {
	LedgerCodec::new().encode(payload, TAG_CAPACITY).unwrap()
}

pub fn decode(bytes: &[u8]) -> TagLedgerPayload {
	match LedgerCodec::new().decode(bytes).unwrap() {
		tapwallet_sync::tag::DecodedTag::Ledger(payload) => payload,
		tapwallet_sync::tag::DecodedTag::Blank => panic!("tag is blank"),
	}
}
