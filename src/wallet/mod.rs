pub mod card_store;
pub mod connectivity;
pub mod ledger_model;
pub mod repositories;
pub mod service;
pub mod sync;
pub mod transaction_processor;
pub mod types;

pub use card_store::CardStore;
pub use connectivity::{Connectivity, StaticConnectivity};
pub use service::{WalletCapabilities, WalletService};
pub use types::*;
