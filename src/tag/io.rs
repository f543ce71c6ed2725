//!
//! Tag I/O capability.
//!
//! The radio driver is an external collaborator; the sync engine only sees raw
//! reads and writes of the tag's data area plus its capacity. `SimulatedTag`
//! stands in for hardware on hosts without NFC and in tests.

use crate::tag::types::TagIoError;

use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, warn};

/// NTAG215 user memory, the smallest tag the wallet ships with.
pub const DEFAULT_TAG_CAPACITY: usize = 504;

#[async_trait::async_trait]
pub trait TagIo: Send + Sync {
	/// Read the whole data area of the tag currently in the field.
	async fn read_raw(&self) -> Result<Vec<u8>, TagIoError>;

	/// Replace the tag's data area.
	async fn write_raw(&self, bytes: &[u8]) -> Result<(), TagIoError>;

	/// Usable bytes in the data area.
	fn capacity(&self) -> usize;
}

#[derive(Debug, Default)]
struct SimulatedTagState {
	present: bool,
	data: Vec<u8>,
	failing_writes: u32,
	latency: Option<Duration>,
	reads: usize,
	writes: usize,
}

/// In-memory tag used when no NFC hardware is available.
#[derive(Debug)]
pub struct SimulatedTag {
	capacity: usize,
	state: Mutex<SimulatedTagState>,
}

impl SimulatedTag {
	/// A blank tag already held against the reader.
	pub fn new(capacity: usize) -> Self {
		Self {
			capacity,
			state: Mutex::new(SimulatedTagState {
				present: true,
				..Default::default()
			}),
		}
	}

	/// A tag preloaded with `data`.
	pub fn with_data(capacity: usize, data: Vec<u8>) -> Self {
		let tag = Self::new(capacity);
		tag.set_data(data);
		tag
	}

	fn lock(&self) -> std::sync::MutexGuard<'_, SimulatedTagState> {
		self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	/// Put the tag in (or take it out of) the reader's field.
	pub fn set_present(&self, present: bool) {
		self.lock().present = present;
	}

	pub fn set_data(&self, data: Vec<u8>) {
		self.lock().data = data;
	}

	pub fn data(&self) -> Vec<u8> {
		self.lock().data.clone()
	}

	/// Make the next `count` writes fail as if the tag left the field mid-write.
	pub fn fail_next_writes(&self, count: u32) {
		self.lock().failing_writes = count;
	}

	/// Delay every read and write, to exercise timeouts.
	pub fn set_latency(&self, latency: Option<Duration>) {
		self.lock().latency = latency;
	}

	pub fn read_count(&self) -> usize {
		self.lock().reads
	}

	pub fn write_count(&self) -> usize {
		self.lock().writes
	}

	fn latency(&self) -> Option<Duration> {
		self.lock().latency
	}
}

#[async_trait::async_trait]
impl TagIo for SimulatedTag {
	async fn read_raw(&self) -> Result<Vec<u8>, TagIoError> {
		if let Some(latency) = self.latency() {
			tokio::time::sleep(latency).await;
		}

		let mut state = self.lock();
		if !state.present {
			return Err(TagIoError::NoTagDetected);
		}
		state.reads += 1;
		debug!("Simulated tag read: {} bytes", state.data.len());
		Ok(state.data.clone())
	}

	async fn write_raw(&self, bytes: &[u8]) -> Result<(), TagIoError> {
		if let Some(latency) = self.latency() {
			tokio::time::sleep(latency).await;
		}

		let mut state = self.lock();
		if !state.present {
			return Err(TagIoError::NoTagDetected);
		}
		if bytes.len() > self.capacity {
			return Err(TagIoError::WriteError(format!(
				"{} bytes exceed tag capacity {}",
				bytes.len(),
				self.capacity
			)));
		}
		if state.failing_writes > 0 {
			state.failing_writes -= 1;
			warn!("Simulated tag write interrupted");
			return Err(TagIoError::WriteError(
				"tag removed during write".to_string(),
			));
		}

		// Reads return exactly the last written bytes, no stale tail.
		state.data = bytes.to_vec();
		state.writes += 1;
		debug!("Simulated tag write: {} bytes", bytes.len());
		Ok(())
	}

	fn capacity(&self) -> usize {
		self.capacity
	}
}
