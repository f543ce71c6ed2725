//! Wallet configuration, read from `TAPWALLET_*` environment variables.

use crate::tag::codec::MAX_DECIMALS;
use crate::wallet::CardMode;

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_DATA_DIR: &str = "./tapwallet-data";
pub const DEFAULT_TOKEN_DECIMALS: u32 = 9;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
	#[error("Invalid value {value:?} for {key}: {reason}")]
	InvalidValue {
		key: &'static str,
		value: String,
		reason: String,
	},

	#[error("Unknown card mode {0:?}, expected sender or receiver")]
	UnknownCardMode(String),
}

/// Sync engine settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
	/// Bound on every tag read and write.
	pub io_timeout: Duration,
	/// Equal spends closer than this collapse into one. Zero keeps them all.
	pub duplicate_window: Duration,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			io_timeout: Duration::from_millis(5_000),
			duplicate_window: Duration::from_millis(5_000),
		}
	}
}

/// Settlement path settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementConfig {
	/// Bound on one settlement attempt, retries included.
	pub timeout: Duration,
	/// How long transient submit failures are retried.
	pub retry_budget: Duration,
}

impl Default for SettlementConfig {
	fn default() -> Self {
		Self {
			timeout: Duration::from_millis(10_000),
			retry_budget: Duration::from_millis(3_000),
		}
	}
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletConfig {
	pub data_dir: PathBuf,
	pub card_mode: CardMode,
	/// Address credited by pull requests in receiver mode.
	pub receive_address: Option<String>,
	pub token_decimals: u32,
	pub sync: SyncConfig,
	pub settlement: SettlementConfig,
}

impl Default for WalletConfig {
	fn default() -> Self {
		Self {
			data_dir: PathBuf::from(DEFAULT_DATA_DIR),
			card_mode: CardMode::Sender,
			receive_address: None,
			token_decimals: DEFAULT_TOKEN_DECIMALS,
			sync: SyncConfig::default(),
			settlement: SettlementConfig::default(),
		}
	}
}

impl FromStr for CardMode {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_lowercase().as_str() {
			"sender" => Ok(CardMode::Sender),
			"receiver" => Ok(CardMode::Receiver),
			other => Err(ConfigError::UnknownCardMode(other.to_string())),
		}
	}
}

impl WalletConfig {
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|key| env::var(key).ok())
	}

	/// Build a configuration from any key lookup, falling back to defaults.
	pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
		let defaults = Self::default();

		let data_dir = lookup("TAPWALLET_DATA_DIR")
			.map(PathBuf::from)
			.unwrap_or(defaults.data_dir);

		let card_mode = match lookup("TAPWALLET_CARD_MODE") {
			Some(mode) => mode.parse()?,
			None => defaults.card_mode,
		};

		let receive_address = lookup("TAPWALLET_RECEIVE_ADDRESS").filter(|a| !a.trim().is_empty());
		if card_mode == CardMode::Receiver && receive_address.is_none() {
			warn!("Receiver mode without TAPWALLET_RECEIVE_ADDRESS, pull requests will be rejected");
		}

		let token_decimals = parse_or(&lookup, "TAPWALLET_TOKEN_DECIMALS", defaults.token_decimals)?;
		let sync = SyncConfig {
			io_timeout: millis_or(&lookup, "TAPWALLET_IO_TIMEOUT_MS", defaults.sync.io_timeout)?,
			duplicate_window: millis_or(
				&lookup,
				"TAPWALLET_DUPLICATE_WINDOW_MS",
				defaults.sync.duplicate_window,
			)?,
		};
		let settlement = SettlementConfig {
			timeout: millis_or(
				&lookup,
				"TAPWALLET_SETTLEMENT_TIMEOUT_MS",
				defaults.settlement.timeout,
			)?,
			retry_budget: millis_or(
				&lookup,
				"TAPWALLET_SETTLEMENT_RETRY_MS",
				defaults.settlement.retry_budget,
			)?,
		};

		if token_decimals > MAX_DECIMALS {
			return Err(ConfigError::InvalidValue {
				key: "TAPWALLET_TOKEN_DECIMALS",
				value: token_decimals.to_string(),
				reason: format!("at most {} decimals are supported", MAX_DECIMALS),
			});
		}
		if sync.io_timeout.is_zero() {
			return Err(ConfigError::InvalidValue {
				key: "TAPWALLET_IO_TIMEOUT_MS",
				value: "0".to_string(),
				reason: "timeout must be positive".to_string(),
			});
		}
		if settlement.timeout.is_zero() {
			return Err(ConfigError::InvalidValue {
				key: "TAPWALLET_SETTLEMENT_TIMEOUT_MS",
				value: "0".to_string(),
				reason: "timeout must be positive".to_string(),
			});
		}

		info!(
			"Wallet configured: mode={}, data_dir={:?}, duplicate window {:?}",
			card_mode, data_dir, sync.duplicate_window
		);

		Ok(Self {
			data_dir,
			card_mode,
			receive_address,
			token_decimals,
			sync,
			settlement,
		})
	}
}

fn parse_or<T>(
	lookup: &impl Fn(&str) -> Option<String>,
	key: &'static str,
	default: T,
) -> Result<T, ConfigError>
where
	T: FromStr,
	T::Err: std::fmt::Display,
{
	match lookup(key) {
		Some(value) => value
			.trim()
			.parse()
			.map_err(|e: T::Err| ConfigError::InvalidValue {
				key,
				value: value.clone(),
				reason: e.to_string(),
			}),
		None => Ok(default),
	}
}

fn millis_or(
	lookup: &impl Fn(&str) -> Option<String>,
	key: &'static str,
	default: Duration,
) -> Result<Duration, ConfigError> {
	let millis = parse_or(lookup, key, default.as_millis() as u64)?;
	Ok(Duration::from_millis(millis))
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::collections::HashMap;

	fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> = pairs
			.iter()
			.map(|(k, v)| (k.to_string(), v.to_string()))
			.collect();
		move |key| map.get(key).cloned()
	}

	#[test]
	fn defaults_apply_when_unset() {
		let config = WalletConfig::from_lookup(lookup(&[])).unwrap();
		assert_eq!(config, WalletConfig::default());
		assert_eq!(config.sync.duplicate_window, Duration::from_secs(5));
	}

	#[test]
	fn reads_overrides() {
		let config = WalletConfig::from_lookup(lookup(&[
			("TAPWALLET_CARD_MODE", "Receiver"),
			("TAPWALLET_RECEIVE_ADDRESS", "0xshop"),
			("TAPWALLET_DUPLICATE_WINDOW_MS", "0"),
			("TAPWALLET_IO_TIMEOUT_MS", "250"),
			("TAPWALLET_TOKEN_DECIMALS", "6"),
		]))
		.unwrap();
		assert_eq!(config.card_mode, CardMode::Receiver);
		assert_eq!(config.receive_address.as_deref(), Some("0xshop"));
		assert_eq!(config.sync.duplicate_window, Duration::ZERO);
		assert_eq!(config.sync.io_timeout, Duration::from_millis(250));
		assert_eq!(config.token_decimals, 6);
	}

	#[test]
	fn rejects_bad_values() {
		assert_eq!(
			WalletConfig::from_lookup(lookup(&[("TAPWALLET_CARD_MODE", "both")])).unwrap_err(),
			ConfigError::UnknownCardMode("both".to_string())
		);
		assert!(matches!(
			WalletConfig::from_lookup(lookup(&[("TAPWALLET_IO_TIMEOUT_MS", "soon")])),
			Err(ConfigError::InvalidValue {
				key: "TAPWALLET_IO_TIMEOUT_MS",
				..
			})
		));
		assert!(matches!(
			WalletConfig::from_lookup(lookup(&[("TAPWALLET_SETTLEMENT_TIMEOUT_MS", "0")])),
			Err(ConfigError::InvalidValue { .. })
		));
		assert!(matches!(
			WalletConfig::from_lookup(lookup(&[("TAPWALLET_TOKEN_DECIMALS", "20")])),
			Err(ConfigError::InvalidValue {
				key: "TAPWALLET_TOKEN_DECIMALS",
				..
			})
		));
	}
}
