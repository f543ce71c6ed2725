use chrono::Utc;
use rand::Rng;

pub fn format_token_amount(amount: u64, decimals: u32) -> String {
	format!(
		"{:.*}",
		decimals as usize,
		amount as f64 / 10f64.powi(decimals as i32)
	)
}

/// Random 16-byte hex identifier, prefixed for readability in logs.
pub fn generate_id(prefix: &str) -> String {
	let mut bytes = [0u8; 16];
	rand::rng().fill(&mut bytes);
	format!("{}_{}", prefix, hex::encode(bytes))
}

/// Current wall-clock time as Unix milliseconds, the unit used on tags.
pub fn now_millis() -> i64 {
	Utc::now().timestamp_millis()
}
