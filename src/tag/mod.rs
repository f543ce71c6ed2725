//! NFC tag integration module
//!
//! This module provides the ledger codec, the tag I/O capability and the types
//! exchanged with a physical tag. The tag payload is the only bit-exact external
//! contract of the wallet: any compliant implementation must be able to read it.

/// Length-prefixed JSON codec for the tag data area
pub mod codec;
/// Tag read/write capability and the simulated tag
pub mod io;
/// Payload and error types
mod types;

pub use codec::LedgerCodec;
pub use io::{DEFAULT_TAG_CAPACITY, SimulatedTag, TagIo};
pub use types::*;
