use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Debounced online signal supplied by the host's network monitor.
pub trait Connectivity: Send + Sync {
	fn is_online(&self) -> bool;
}

/// Connectivity flag set directly by the host or a test.
#[derive(Debug, Default)]
pub struct StaticConnectivity {
	online: AtomicBool,
}

impl StaticConnectivity {
	pub fn new(online: bool) -> Self {
		Self {
			online: AtomicBool::new(online),
		}
	}

	pub fn set_online(&self, online: bool) {
		self.online.store(online, Ordering::SeqCst);
	}
}

impl Connectivity for StaticConnectivity {
	fn is_online(&self) -> bool {
		self.online.load(Ordering::SeqCst)
	}
}

impl Connectivity for watch::Receiver<bool> {
	fn is_online(&self) -> bool {
		*self.borrow()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn static_flag_toggles() {
		let signal = StaticConnectivity::new(false);
		assert!(!signal.is_online());
		signal.set_online(true);
		assert!(signal.is_online());
	}

	#[test]
	fn watch_receiver_follows_sender() {
		let (tx, rx) = watch::channel(false);
		assert!(!rx.is_online());
		tx.send(true).unwrap();
		assert!(rx.is_online());
	}
}
