//! Ledger codec for the tag data area.
//!
//! Layout: a 4-byte big-endian length followed by that many bytes of UTF-8 JSON.
//! Anything after the declared length is ignored, since tags expose a fixed-size
//! memory area. An empty area, or an all-zero area at least as long as the
//! prefix, is a blank tag.
//!
//! Amounts on the tag are JSON numbers in token units and may be fractional.
//! The codec converts them exactly to integer base units using the token's
//! number of decimals; a value with more fractional digits than that scale is
//! rejected instead of rounded.
//!
//! Decoding validates the whole structure before returning a payload, so callers
//! never observe a partially populated ledger.

use crate::tag::types::{CodecError, DecodeError, DecodedTag, PendingSpend, TagLedgerPayload};

use serde::Serialize;
use serde_json::{Map, Number, Value};
use std::str::FromStr;
use tracing::{debug, error};

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Largest scale whose unit still fits in a `u64` (10^19).
pub const MAX_DECIMALS: u32 = 19;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WirePayload<'a> {
	wallet_address: &'a str,
	last_balance: Number,
	unspent_object_ids: &'a [String],
	pending_spends: Vec<WireSpend<'a>>,
}

#[derive(Serialize)]
struct WireSpend<'a> {
	to: &'a str,
	amount: Number,
	timestamp: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LedgerCodec {
	decimals: u32,
}

impl LedgerCodec {
	/// Codec whose tag amounts are plain base units.
	pub fn new() -> Self {
		Self { decimals: 0 }
	}

	/// Codec whose tag amounts are token units with `decimals` fractional digits.
	pub fn with_decimals(decimals: u32) -> Self {
		Self { decimals }
	}

	pub fn decimals(&self) -> u32 {
		self.decimals
	}

	/// Encode a payload, failing with `CapacityExceeded` when it would not fit
	/// in `capacity` bytes.
	pub fn encode(
		&self,
		payload: &TagLedgerPayload,
		capacity: usize,
	) -> Result<Vec<u8>, CodecError> {
		let wire = WirePayload {
			wallet_address: &payload.wallet_address,
			last_balance: self.to_number(payload.last_balance)?,
			unspent_object_ids: &payload.unspent_object_ids,
			pending_spends: payload
				.pending_spends
				.iter()
				.map(|spend| {
					Ok(WireSpend {
						to: &spend.to,
						amount: self.to_number(spend.amount)?,
						timestamp: spend.timestamp,
					})
				})
				.collect::<Result<Vec<_>, CodecError>>()?,
		};
		let json =
			serde_json::to_vec(&wire).map_err(|e| CodecError::Serialization(e.to_string()))?;

		let needed = LENGTH_PREFIX_LEN + json.len();
		if needed > capacity {
			error!(
				"[ENCODE] Payload for {} needs {} bytes, tag capacity is {}",
				payload.wallet_address, needed, capacity
			);
			return Err(CodecError::CapacityExceeded { needed, capacity });
		}

		let len = u32::try_from(json.len())
			.map_err(|_| CodecError::Serialization("payload length overflows u32".to_string()))?;

		let mut bytes = Vec::with_capacity(needed);
		bytes.extend_from_slice(&len.to_be_bytes());
		bytes.extend_from_slice(&json);
		Ok(bytes)
	}

	/// Decode and fully validate the raw data area of a tag.
	pub fn decode(&self, bytes: &[u8]) -> Result<DecodedTag, DecodeError> {
		if bytes.is_empty() {
			debug!("[DECODE] Blank tag (empty read)");
			return Ok(DecodedTag::Blank);
		}
		// A short read may hold just the zero high bytes of a live prefix.
		if bytes.len() < LENGTH_PREFIX_LEN {
			return Err(DecodeError::MissingPrefix(bytes.len()));
		}
		if bytes.iter().all(|b| *b == 0) {
			debug!("[DECODE] Blank tag ({} bytes)", bytes.len());
			return Ok(DecodedTag::Blank);
		}

		let mut prefix = [0u8; LENGTH_PREFIX_LEN];
		prefix.copy_from_slice(&bytes[..LENGTH_PREFIX_LEN]);
		let declared = u32::from_be_bytes(prefix) as usize;
		let body = &bytes[LENGTH_PREFIX_LEN..];

		if declared == 0 {
			return Err(DecodeError::field("length", "zero length with non-empty data area"));
		}
		if body.len() < declared {
			return Err(DecodeError::Truncated {
				declared,
				available: body.len(),
			});
		}

		let text = std::str::from_utf8(&body[..declared]).map_err(|_| DecodeError::InvalidUtf8)?;
		let value: Value =
			serde_json::from_str(text).map_err(|e| DecodeError::InvalidJson(e.to_string()))?;

		let payload = validate_payload(&value, self.decimals)?;
		debug!(
			"[DECODE] Ledger for {}: {} objects, {} pending spends",
			payload.wallet_address,
			payload.unspent_object_ids.len(),
			payload.pending_spends.len()
		);
		Ok(DecodedTag::Ledger(payload))
	}

	fn to_number(&self, base_units: u64) -> Result<Number, CodecError> {
		let text = format_units(base_units, self.decimals)
			.ok_or(CodecError::UnsupportedScale(self.decimals))?;
		Number::from_str(&text).map_err(|e| CodecError::Serialization(e.to_string()))
	}
}

/// Render base units as the shortest exact decimal in token units.
fn format_units(base_units: u64, decimals: u32) -> Option<String> {
	let unit = 10u64.checked_pow(decimals)?;
	let whole = base_units / unit;
	let fraction = base_units % unit;
	if fraction == 0 {
		return Some(whole.to_string());
	}
	let digits = format!("{:0width$}", fraction, width = decimals as usize);
	Some(format!("{}.{}", whole, digits.trim_end_matches('0')))
}

/// Convert the text of a JSON number in token units to exact base units.
fn parse_units(text: &str, decimals: u32) -> Result<u64, &'static str> {
	if decimals > MAX_DECIMALS {
		return Err("token scale is too large");
	}
	let (negative, unsigned) = match text.strip_prefix('-') {
		Some(rest) => (true, rest),
		None => (false, text),
	};
	let (mantissa, exponent) = match unsigned.find(['e', 'E']) {
		Some(at) => {
			let exponent = unsigned[at + 1..]
				.parse::<i64>()
				.map_err(|_| "exponent out of range")?;
			(&unsigned[..at], exponent)
		}
		None => (unsigned, 0),
	};
	let (whole, fraction) = mantissa.split_once('.').unwrap_or((mantissa, ""));

	let mut digits: String = whole.chars().chain(fraction.chars()).collect();
	if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
		return Err("expected a number");
	}
	if digits.bytes().all(|b| b == b'0') {
		return Ok(0);
	}
	if negative {
		return Err("expected a non-negative amount");
	}

	let shift = i64::try_from(fraction.len())
		.ok()
		.and_then(|len| i64::from(decimals).checked_add(exponent)?.checked_sub(len))
		.ok_or("exponent out of range")?;
	if shift >= 0 {
		if shift > 20 {
			return Err("amount overflows u64 base units");
		}
		digits.extend(std::iter::repeat_n('0', shift as usize));
	} else {
		let cut = usize::try_from(shift.unsigned_abs()).map_err(|_| "exponent out of range")?;
		let keep = digits.len().saturating_sub(cut);
		if !digits[keep..].bytes().all(|b| b == b'0') {
			return Err("more fractional digits than the token scale allows");
		}
		digits.truncate(keep);
	}

	let significant = digits.trim_start_matches('0');
	if significant.is_empty() {
		return Ok(0);
	}
	significant
		.parse::<u64>()
		.map_err(|_| "amount overflows u64 base units")
}

fn validate_payload(value: &Value, decimals: u32) -> Result<TagLedgerPayload, DecodeError> {
	let root = value
		.as_object()
		.ok_or_else(|| DecodeError::field("payload", "expected a JSON object"))?;

	let wallet_address = non_empty_string(root, "walletAddress")?;
	let last_balance = non_negative_amount(root.get("lastBalance"), "lastBalance", decimals)?;

	let unspent_object_ids = root
		.get("unspentObjectIds")
		.and_then(Value::as_array)
		.ok_or_else(|| DecodeError::field("unspentObjectIds", "expected an array"))?
		.iter()
		.enumerate()
		.map(|(i, id)| {
			id.as_str().map(str::to_string).ok_or_else(|| {
				DecodeError::field(format!("unspentObjectIds[{}]", i), "expected a string")
			})
		})
		.collect::<Result<Vec<_>, _>>()?;

	let pending_spends = root
		.get("pendingSpends")
		.and_then(Value::as_array)
		.ok_or_else(|| DecodeError::field("pendingSpends", "expected an array"))?
		.iter()
		.enumerate()
		.map(|(i, entry)| validate_pending_spend(i, entry, decimals))
		.collect::<Result<Vec<_>, _>>()?;

	Ok(TagLedgerPayload {
		wallet_address,
		last_balance,
		unspent_object_ids,
		pending_spends,
	})
}

fn validate_pending_spend(
	index: usize,
	entry: &Value,
	decimals: u32,
) -> Result<PendingSpend, DecodeError> {
	let field = |name: &str| format!("pendingSpends[{}].{}", index, name);

	let obj = entry
		.as_object()
		.ok_or_else(|| DecodeError::field(format!("pendingSpends[{}]", index), "expected an object"))?;

	let to = match obj.get("to").and_then(Value::as_str) {
		Some(to) if !to.is_empty() => to.to_string(),
		_ => return Err(DecodeError::field(field("to"), "expected a non-empty string")),
	};
	let amount = non_negative_amount(obj.get("amount"), &field("amount"), decimals)?;
	let timestamp = obj
		.get("timestamp")
		.and_then(Value::as_i64)
		.ok_or_else(|| DecodeError::field(field("timestamp"), "expected an integer"))?;

	Ok(PendingSpend {
		to,
		amount,
		timestamp,
	})
}

fn non_empty_string(obj: &Map<String, Value>, name: &str) -> Result<String, DecodeError> {
	match obj.get(name).and_then(Value::as_str) {
		Some(s) if !s.is_empty() => Ok(s.to_string()),
		_ => Err(DecodeError::field(name, "expected a non-empty string")),
	}
}

fn non_negative_amount(
	value: Option<&Value>,
	name: &str,
	decimals: u32,
) -> Result<u64, DecodeError> {
	match value {
		Some(Value::Number(number)) => {
			parse_units(&number.to_string(), decimals).map_err(|reason| DecodeError::field(name, reason))
		}
		_ => Err(DecodeError::field(name, "expected a non-negative number")),
	}
}
