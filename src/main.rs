use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use tapwallet_sync::config::WalletConfig;
use tapwallet_sync::settlement::{SimulatedSettlementClient, SimulatedSigner};
use tapwallet_sync::tag::{DEFAULT_TAG_CAPACITY, SimulatedTag};
use tapwallet_sync::utils::format_token_amount;
use tapwallet_sync::wallet::repositories::InMemoryLedgerStateRepository;
use tapwallet_sync::wallet::sync::SyncCancellation;
use tapwallet_sync::wallet::{
	StaticConnectivity, UnspentObject, WalletCapabilities, WalletService,
};

#[tokio::main(flavor = "current_thread")]
async fn main() {
	tracing_subscriber::fmt()
		.with_env_filter(
			EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| EnvFilter::new("info,tapwallet_sync=debug")),
		)
		.with_target(false)
		.with_thread_ids(false)
		.with_thread_names(false)
		.with_file(false)
		.with_line_number(false)
		.with_timer(tracing_subscriber::fmt::time::time())
		.init();

	if let Err(e) = run().await {
		error!("Demo failed: {}", e);
	}
}

/// Provision a simulated card, spend offline, then settle on the next tap.
async fn run() -> Result<(), Box<dyn std::error::Error>> {
	info!("Starting tap wallet sync demo");
	let config = WalletConfig::from_env()?;
	let decimals = config.token_decimals;
	let unit = 10u64
		.checked_pow(decimals)
		.ok_or("token decimals out of range")?;

	let tag = Arc::new(SimulatedTag::new(DEFAULT_TAG_CAPACITY));
	let connectivity = Arc::new(StaticConnectivity::new(false));
	let capabilities = WalletCapabilities {
		tag: tag.clone(),
		signer: Arc::new(SimulatedSigner::new("demo-key")),
		settlement_client: Arc::new(SimulatedSettlementClient::new()),
		connectivity: connectivity.clone(),
	};

	// Simulated hosts keep the ledger in memory; `WalletService::open` persists under data_dir.
	let service = WalletService::start(
		config,
		Arc::new(InMemoryLedgerStateRepository::new()),
		capabilities,
	)
	.await?;

	let card = service
		.provision_card(
			"Demo card",
			"0xcafe00000000000000000000000000000000beef",
			vec![UnspentObject::new("0xdemo:genesis", 10 * unit)],
		)
		.await?;
	info!(
		"Provisioned {} with {}",
		card.display_name,
		format_token_amount(card.balance, decimals)
	);

	let tx = service
		.request_spend(&card.id, 4 * unit, "0xabc", Some("coffee".to_string()), true)
		.await?;
	info!("Offline spend {} is {:?}", tx.id, tx.status);

	let report = service.start_sync(&card.id, &SyncCancellation::new()).await?;
	info!("Offline tap: {}", report.summary());

	connectivity.set_online(true);
	let report = service.start_sync(&card.id, &SyncCancellation::new()).await?;
	info!("Online tap: {}", report.summary());

	if let Some(card) = service.get_card(&card.id).await {
		info!(
			"Final balance of {}: {}",
			card.display_name,
			format_token_amount(card.balance, decimals)
		);
	}
	for tx in service.list_transactions(Some(&card.id)).await {
		info!(
			"{} {:?} {:?} {} -> {:?}",
			tx.id,
			tx.tx_type,
			tx.status,
			format_token_amount(tx.amount, decimals),
			tx.settlement_hash
		);
	}
	info!("Tag holds {} bytes", tag.data().len());

	service.shutdown().await;
	Ok(())
}
