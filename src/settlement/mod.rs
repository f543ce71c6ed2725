//! Settlement integration module
//!
//! Signing and submission are pluggable capabilities. The wallet core builds an
//! intent, hands it to a `Signer`, and submits the signed bytes through a
//! `SettlementClient`. Simulated implementations are selected by the host when
//! no real settlement layer is wired in.

/// Intent builder
pub mod builder;
/// Settlement client capability and simulated settlement layer
pub mod client;
/// Signer capability and simulated signer
pub mod signer;
/// Intent, status and error types
mod types;

pub use builder::TransactionIntentBuilder;
pub use client::{SettlementClient, SimulatedSettlementClient};
pub use signer::{SignedEnvelope, Signer, SimulatedSigner};
pub use types::*;
