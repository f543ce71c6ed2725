//! Event system for card synchronization.
//!
//! This module defines the event types, the event handler trait and the event dispatcher shared by
//! the sync engine and the transaction processor. Components emit events as they move through a
//! sync cycle or a spend's lifecycle; registered handlers turn them into log lines or forward them
//! to UI layers. Handlers never influence the outcome of the operation that emitted the event.

use crate::utils::format_token_amount;
use crate::wallet::sync::session::SyncPhase;

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, info, warn};

/// Events that occur during card synchronization and spend processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// The sync cycle moved to another phase
    PhaseChanged {
        card_id: Option<String>,
        phase: SyncPhase,
    },
    /// A tag was read and matched to a card
    TagDetected {
        card_id: String,
        address: String,
        is_new_card: bool,
    },
    /// A merge plan was committed to the card store
    LedgerMerged {
        card_id: String,
        objects_added: usize,
        objects_removed: usize,
        spends_merged: usize,
    },
    /// A spend was recorded and waits for settlement
    SpendQueued {
        card_id: String,
        transaction_id: String,
        amount: u64,
    },
    /// A spend was confirmed by the settlement layer
    SpendSettled {
        card_id: String,
        transaction_id: String,
        amount: u64,
        settlement_hash: String,
    },
    /// A spend failed permanently and its inputs were released
    SpendFailed {
        card_id: String,
        transaction_id: String,
        reason: String,
    },
    /// The reconciled ledger reached the tag
    TagWritten { card_id: String, bytes: usize },
    /// The sync cycle finished
    SyncCompleted { card_id: String, summary: String },
    /// The sync cycle ended in an error
    SyncFailed {
        card_id: Option<String>,
        error: String,
    },
}

/// Errors raised by event handlers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("Event receiver for {0} was dropped")]
    ReceiverDropped(&'static str),
}

/// Trait for handling sync events.
///
/// Implementors receive every dispatched event and may perform side effects.
#[async_trait::async_trait]
pub trait SyncEventHandler: Send + Sync {
    /// Handle a sync event.
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), EventError>;

    /// Get the name of this handler for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Event dispatcher that manages multiple event handlers.
///
/// The dispatcher is shared between the sync engine and the transaction processor, so handlers
/// live behind an async mutex and can be registered at any time.
pub struct EventDispatcher {
    handlers: Mutex<Vec<Box<dyn SyncEventHandler>>>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// Create a new, empty event dispatcher.
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(Vec::new()),
        }
    }

    /// Register a new event handler.
    ///
    /// Handlers are called in the order they are registered.
    pub async fn register_handler(&self, handler: Box<dyn SyncEventHandler>) {
        debug!("Registering event handler {}", handler.name());
        self.handlers.lock().await.push(handler);
    }

    /// Dispatch an event to all registered handlers.
    ///
    /// Errors from handlers are logged, but do not stop other handlers from running. Handlers whose
    /// receiver is gone are removed.
    pub async fn dispatch(&self, event: SyncEvent) {
        let mut handlers = self.handlers.lock().await;
        let mut index = 0;
        while index < handlers.len() {
            match handlers[index].handle(&event).await {
                Ok(()) => index += 1,
                Err(EventError::ReceiverDropped(name)) => {
                    warn!("Removing handler {}: receiver dropped", name);
                    handlers.remove(index);
                }
            }
        }
    }
}

/// Handler that writes every event to the log.
pub struct LoggingEventHandler {
    decimals: u32,
}

impl LoggingEventHandler {
    pub fn new(decimals: u32) -> Self {
        Self { decimals }
    }
}

#[async_trait::async_trait]
impl SyncEventHandler for LoggingEventHandler {
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), EventError> {
        match event {
            SyncEvent::PhaseChanged { card_id, phase } => {
                debug!("Sync phase -> {} (card {:?})", phase, card_id);
            }
            SyncEvent::TagDetected {
                card_id,
                address,
                is_new_card,
            } => {
                info!(
                    "Tag detected for {} (card {}{})",
                    address,
                    card_id,
                    if *is_new_card { ", new" } else { "" }
                );
            }
            SyncEvent::LedgerMerged {
                card_id,
                objects_added,
                objects_removed,
                spends_merged,
            } => {
                info!(
                    "Merged tag ledger into card {}: +{} -{} objects, {} new spends",
                    card_id, objects_added, objects_removed, spends_merged
                );
            }
            SyncEvent::SpendQueued {
                card_id,
                transaction_id,
                amount,
            } => {
                info!(
                    "Queued spend {} of {} on card {}",
                    transaction_id,
                    format_token_amount(*amount, self.decimals),
                    card_id
                );
            }
            SyncEvent::SpendSettled {
                card_id,
                transaction_id,
                amount,
                settlement_hash,
            } => {
                info!(
                    "Settled spend {} of {} on card {}: {}",
                    transaction_id,
                    format_token_amount(*amount, self.decimals),
                    card_id,
                    settlement_hash
                );
            }
            SyncEvent::SpendFailed {
                card_id,
                transaction_id,
                reason,
            } => {
                warn!(
                    "Spend {} on card {} failed: {}",
                    transaction_id, card_id, reason
                );
            }
            SyncEvent::TagWritten { card_id, bytes } => {
                info!("Wrote {} bytes to tag of card {}", bytes, card_id);
            }
            SyncEvent::SyncCompleted { card_id, summary } => {
                info!("Sync of card {} completed: {}", card_id, summary);
            }
            SyncEvent::SyncFailed { card_id, error } => {
                warn!("Sync failed (card {:?}): {}", card_id, error);
            }
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "LoggingEventHandler"
    }
}

/// Handler that forwards events to a UI layer over a channel.
pub struct ChannelEventHandler {
    sender: mpsc::UnboundedSender<SyncEvent>,
}

impl ChannelEventHandler {
    /// Create a handler together with the receiving end of its channel.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait::async_trait]
impl SyncEventHandler for ChannelEventHandler {
    async fn handle(&mut self, event: &SyncEvent) -> Result<(), EventError> {
        self.sender
            .send(event.clone())
            .map_err(|_| EventError::ReceiverDropped(self.name()))
    }

    fn name(&self) -> &'static str {
        "ChannelEventHandler"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn channel_handler_forwards_events() {
        let dispatcher = EventDispatcher::new();
        let (handler, mut rx) = ChannelEventHandler::channel();
        dispatcher.register_handler(Box::new(handler)).await;
        dispatcher
            .register_handler(Box::new(LoggingEventHandler::new(9)))
            .await;

        let event = SyncEvent::TagWritten {
            card_id: "c1".to_string(),
            bytes: 42,
        };
        dispatcher.dispatch(event.clone()).await;
        assert_eq!(rx.recv().await, Some(event));
    }

    #[tokio::test]
    async fn dropped_receivers_are_unregistered() {
        let dispatcher = EventDispatcher::new();
        let (handler, rx) = ChannelEventHandler::channel();
        dispatcher.register_handler(Box::new(handler)).await;
        drop(rx);

        dispatcher
            .dispatch(SyncEvent::PhaseChanged {
                card_id: None,
                phase: SyncPhase::Scanning,
            })
            .await;
        assert!(dispatcher.handlers.lock().await.is_empty());
    }
}
