//!
//! Utility module for the tap wallet.
//!
//! Re-exports formatting helpers and id/time helpers for use throughout the codebase.
/// Utility functions for formatting, identifiers and timestamps
pub mod index;

pub use index::{format_token_amount, generate_id, now_millis};
