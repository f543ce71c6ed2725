//! Offline-tolerant ledger sync for NFC tag wallets.
//!
//! Cards carry a snapshot of their ledger on an NFC tag. The wallet keeps a
//! local card store, queues spends while offline and reconciles tag, store and
//! settlement layer whenever a tag is tapped.

pub mod config;
pub mod settlement;
pub mod tag;
pub mod utils;
pub mod wallet;
