//! Card sync orchestrator and integration point for all sync services.
//!
//! This module defines the `SyncEngine`, which coordinates everything involved in synchronizing a
//! card's tag with the local card store and the settlement layer. One sync cycle runs
//! `scan → reconcile → writeBack`:
//!
//! - `scan` reads and decodes the tag, resolves the card by address and computes a `MergePlan`
//!   without mutating anything
//! - `reconcile` commits the plan in one store operation, then tries to settle pending spends when
//!   the device is online
//! - `writeBack` encodes the card's reconciled state and writes it to the tag
//!
//! The engine publishes its phase through a watch channel and emits `SyncEvent`s for every step.
//! A cycle holds the card's lock from scan to write-back. Tag I/O is bounded by the configured
//! timeout and may be cancelled by the caller until reconciliation starts.

use crate::config::SyncConfig;
use crate::tag::{DecodedTag, LedgerCodec, TagIo, TagLedgerPayload};
use crate::utils::generate_id;
use crate::wallet::card_store::CardStore;
use crate::wallet::connectivity::Connectivity;
use crate::wallet::ledger_model::{self, MergeOptions, MergePlan};
use crate::wallet::sync::{
    events::{EventDispatcher, SyncEvent},
    progress_tracker::{SyncProgressTracker, SyncReport},
    session::{CardGuard, CardLocks, PhaseSignal, SyncCancellation, SyncPhase},
    settlement_service::{PendingResolution, SettlementService},
};
use crate::wallet::types::{Card, CardLedger, StoreError, SyncError, UnspentObject};

use chrono::Utc;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Lock key taken by every cycle that talks to the tag reader.
const TAG_READER_LOCK: &str = "tag-reader";

/// Result of scanning a tag: the decoded snapshot and the plan to merge it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedTag {
    pub payload: TagLedgerPayload,
    pub plan: MergePlan,
}

impl ScannedTag {
    /// The card the tag belongs to. Not yet stored when `plan.is_new_card`.
    pub fn card(&self) -> &Card {
        &self.plan.card
    }
}

/// Main sync engine that coordinates tag I/O, reconciliation and settlement.
///
/// The engine owns no state of its own besides the phase signal; every service is constructed by
/// the host and passed in, so tag, signer and settlement implementations can be real or simulated.
pub struct SyncEngine {
    store: Arc<CardStore>,
    tag: Arc<dyn TagIo>,
    codec: LedgerCodec,
    settlement: Arc<SettlementService>,
    connectivity: Arc<dyn Connectivity>,
    events: Arc<EventDispatcher>,
    locks: Arc<CardLocks>,
    phase: PhaseSignal,
    config: SyncConfig,
}

impl SyncEngine {
    /// Create a new engine wired to the given services.
    pub fn new(
        store: Arc<CardStore>,
        tag: Arc<dyn TagIo>,
        settlement: Arc<SettlementService>,
        connectivity: Arc<dyn Connectivity>,
        events: Arc<EventDispatcher>,
        locks: Arc<CardLocks>,
        config: SyncConfig,
    ) -> Self {
        Self {
            store,
            tag,
            codec: LedgerCodec::new(),
            settlement,
            connectivity,
            events,
            locks,
            phase: PhaseSignal::new(),
            config,
        }
    }

    /// Use `codec` for tag payloads, typically one scaled to the token's decimals.
    pub fn with_codec(mut self, codec: LedgerCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Current phase of the sync state machine.
    pub fn phase(&self) -> SyncPhase {
        self.phase.current()
    }

    /// Observe phase changes.
    pub fn subscribe_phase(&self) -> watch::Receiver<SyncPhase> {
        self.phase.subscribe()
    }

    /// Resolves once no cycle holds the tag reader.
    pub async fn wait_idle(&self) {
        let _reader = self.locks.acquire(TAG_READER_LOCK).await;
    }

    async fn set_phase(&self, card_id: Option<&str>, phase: SyncPhase) {
        self.phase.set(phase);
        self.events
            .dispatch(SyncEvent::PhaseChanged {
                card_id: card_id.map(str::to_string),
                phase,
            })
            .await;
    }

    /// Synchronize the tag of a known card.
    ///
    /// Fails fast with `SyncInProgress` when the card is already syncing, and with `CardMismatch`
    /// when the tag in the field belongs to another address.
    pub async fn start_sync(
        &self,
        card_id: &str,
        cancel: &SyncCancellation,
    ) -> Result<SyncReport, SyncError> {
        let card_guard = self.locks.try_acquire(card_id)?;
        let _reader = self.locks.try_acquire(TAG_READER_LOCK)?;

        let card = self
            .store
            .get_card(card_id)
            .await
            .ok_or_else(|| SyncError::CardNotFound(card_id.to_string()))?;

        info!("Starting sync of card {}", card_id);
        let mut tracker = SyncProgressTracker::new();
        let result = self
            .run_cycle(Some(&card), &card_guard, cancel, &mut tracker)
            .await;
        self.finish_cycle(Some(card_id), result, &tracker).await
    }

    /// Synchronize whichever tag is in the field, creating a card for an unseen address.
    pub async fn sync_tag(&self, cancel: &SyncCancellation) -> Result<SyncReport, SyncError> {
        let _reader = self.locks.try_acquire(TAG_READER_LOCK)?;
        let mut tracker = SyncProgressTracker::new();

        self.set_phase(None, SyncPhase::Scanning).await;
        let payload = match self.read_payload(cancel).await {
            Ok(payload) => payload,
            Err(e) => return self.finish_cycle(None, Err(e), &tracker).await,
        };

        let existing = self.store.get_card_by_address(&payload.wallet_address).await;
        let guard_id = existing
            .as_ref()
            .map(|card| card.id.clone())
            .unwrap_or_else(|| generate_id("card"));
        let card_guard = match self.locks.try_acquire(&guard_id) {
            Ok(guard) => guard,
            Err(e) => {
                let card_id = existing.as_ref().map(|c| c.id.as_str());
                return self.finish_cycle(card_id, Err(e), &tracker).await;
            }
        };

        let result = self
            .continue_cycle(payload, existing.as_ref(), &card_guard, cancel, &mut tracker)
            .await;
        let card_id = tracker.get_report().card_id;
        let card_id = (!card_id.is_empty()).then_some(card_id);
        self.finish_cycle(card_id.as_deref(), result, &tracker).await
    }

    async fn run_cycle(
        &self,
        card: Option<&Card>,
        guard: &CardGuard,
        cancel: &SyncCancellation,
        tracker: &mut SyncProgressTracker,
    ) -> Result<(), SyncError> {
        self.set_phase(card.map(|c| c.id.as_str()), SyncPhase::Scanning)
            .await;
        let payload = match (self.read_tag(cancel).await?, card) {
            (DecodedTag::Ledger(payload), _) => payload,
            (DecodedTag::Blank, Some(card)) => {
                return self.restore_blank(card, cancel, tracker).await;
            }
            (DecodedTag::Blank, None) => return Err(SyncError::BlankTag),
        };

        if let Some(card) = card {
            if card.address != payload.wallet_address {
                return Err(SyncError::CardMismatch {
                    expected: card.address.clone(),
                    found: payload.wallet_address,
                });
            }
        }

        self.continue_cycle(payload, card, guard, cancel, tracker)
            .await
    }

    async fn continue_cycle(
        &self,
        payload: TagLedgerPayload,
        card: Option<&Card>,
        guard: &CardGuard,
        cancel: &SyncCancellation,
        tracker: &mut SyncProgressTracker,
    ) -> Result<(), SyncError> {
        let mut plan = self.plan(&payload, card).await?;
        if plan.is_new_card {
            // New cards take the id their lock was taken under.
            plan.card.id = guard.card_id().to_string();
            for pending in plan
                .spends_to_settle
                .iter_mut()
                .chain(plan.spends_to_keep_pending.iter_mut())
            {
                pending.card_id = plan.card.id.clone();
            }
            for tx in plan.new_transactions.iter_mut() {
                tx.card_id = Some(plan.card.id.clone());
            }
        }
        let card_id = plan.card.id.clone();
        tracker.record_card(&card_id, plan.is_new_card);

        self.set_phase(Some(&card_id), SyncPhase::Detected).await;
        self.events
            .dispatch(SyncEvent::TagDetected {
                card_id: card_id.clone(),
                address: plan.card.address.clone(),
                is_new_card: plan.is_new_card,
            })
            .await;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        // Past this point the cycle runs to completion or fails atomically.
        self.set_phase(Some(&card_id), SyncPhase::Reconciling).await;
        self.reconcile(&plan, tracker).await?;

        self.set_phase(Some(&card_id), SyncPhase::Writing).await;
        let bytes = self.write_back(&card_id).await?;
        tracker.record_written(bytes);
        Ok(())
    }

    /// A known card's tag came back blank: the store is authoritative, so its
    /// current state is written to the tag without a merge.
    async fn restore_blank(
        &self,
        card: &Card,
        cancel: &SyncCancellation,
        tracker: &mut SyncProgressTracker,
    ) -> Result<(), SyncError> {
        warn!("Tag of card {} is blank, restoring it from the store", card.id);
        tracker.record_card(&card.id, false);

        self.set_phase(Some(&card.id), SyncPhase::Detected).await;
        self.events
            .dispatch(SyncEvent::TagDetected {
                card_id: card.id.clone(),
                address: card.address.clone(),
                is_new_card: false,
            })
            .await;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        for _ in self.store.get_pending_transactions(&card.id).await {
            tracker.record_still_pending();
        }

        self.set_phase(Some(&card.id), SyncPhase::Writing).await;
        let bytes = self.write_back(&card.id).await?;
        tracker.record_written(bytes);
        self.store.touch_synced(&card.id, Utc::now()).await?;
        Ok(())
    }

    async fn finish_cycle(
        &self,
        card_id: Option<&str>,
        result: Result<(), SyncError>,
        tracker: &SyncProgressTracker,
    ) -> Result<SyncReport, SyncError> {
        match result {
            Ok(()) => {
                let report = tracker.get_report();
                self.set_phase(card_id, SyncPhase::Ready).await;
                self.events
                    .dispatch(SyncEvent::SyncCompleted {
                        card_id: report.card_id.clone(),
                        summary: report.summary(),
                    })
                    .await;
                tracker.log_progress();
                Ok(report)
            }
            Err(e) => {
                warn!("Sync cycle failed: {}", e);
                self.set_phase(card_id, SyncPhase::Error).await;
                self.events
                    .dispatch(SyncEvent::SyncFailed {
                        card_id: card_id.map(str::to_string),
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    /// Read and decode the tag in the field, then compute its merge plan.
    ///
    /// Nothing is mutated; a decode failure leaves every store untouched. Fails with
    /// `SyncInProgress` while a cycle holds the tag reader.
    pub async fn scan(&self, cancel: &SyncCancellation) -> Result<ScannedTag, SyncError> {
        let _reader = self.locks.try_acquire(TAG_READER_LOCK)?;
        let payload = self.read_payload(cancel).await?;
        let existing = self.store.get_card_by_address(&payload.wallet_address).await;
        let plan = self.plan(&payload, existing.as_ref()).await?;
        Ok(ScannedTag { payload, plan })
    }

    async fn read_raw(&self, cancel: &SyncCancellation) -> Result<Vec<u8>, SyncError> {
        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let read = tokio::time::timeout(self.config.io_timeout, self.tag.read_raw());
        let bytes = tokio::select! {
            result = read => result.map_err(|_| SyncError::Timeout {
                operation: "tag read",
                after: self.config.io_timeout,
            })??,
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
        };
        debug!("Read {} bytes from tag", bytes.len());
        Ok(bytes)
    }

    async fn read_tag(&self, cancel: &SyncCancellation) -> Result<DecodedTag, SyncError> {
        let bytes = self.read_raw(cancel).await?;
        Ok(self.codec.decode(&bytes)?)
    }

    async fn read_payload(&self, cancel: &SyncCancellation) -> Result<TagLedgerPayload, SyncError> {
        match self.read_tag(cancel).await? {
            DecodedTag::Ledger(payload) => Ok(payload),
            DecodedTag::Blank => Err(SyncError::BlankTag),
        }
    }

    async fn plan(
        &self,
        payload: &TagLedgerPayload,
        card: Option<&Card>,
    ) -> Result<MergePlan, SyncError> {
        let existing = match card {
            Some(card) => Some(self.store.ledger(&card.id).await?),
            None => None,
        };
        let options = MergeOptions {
            duplicate_window: self.config.duplicate_window,
            online: self.connectivity.is_online(),
        };
        ledger_model::diff(existing.as_ref(), payload, &options)
    }

    /// Commit a merge plan, then settle what connectivity allows.
    ///
    /// The merge is one atomic store operation. Settlement failures leave spends pending for the
    /// next cycle; running reconcile again without external change settles nothing new.
    /// Callers hold the card's lock.
    pub(crate) async fn reconcile(
        &self,
        plan: &MergePlan,
        tracker: &mut SyncProgressTracker,
    ) -> Result<CardLedger, SyncError> {
        let card_id = plan.card.id.as_str();
        let changed = plan.has_changes();

        if changed {
            self.store.apply_merge(plan, Utc::now()).await?;
            self.events
                .dispatch(SyncEvent::LedgerMerged {
                    card_id: card_id.to_string(),
                    objects_added: plan.objects_to_add.len(),
                    objects_removed: plan.objects_to_remove.len(),
                    spends_merged: plan.new_transactions.len(),
                })
                .await;
        } else {
            debug!("Tag of card {} matches the store", card_id);
            self.store.touch_synced(card_id, Utc::now()).await?;
        }
        tracker.record_merge(
            plan.objects_to_add.len(),
            plan.objects_to_remove.len(),
            plan.new_transactions.len(),
            plan.spends_dropped.len(),
            changed,
        );

        for spend in &plan.spends_to_settle {
            let current = self
                .store
                .get_pending_transactions(card_id)
                .await
                .into_iter()
                .find(|p| p.id == spend.id);
            let Some(current) = current else {
                continue;
            };

            match self
                .settlement
                .resolve(&self.store, &plan.card.address, &current)
                .await?
            {
                PendingResolution::Settled(tx) => {
                    tracker.record_settled();
                    self.events
                        .dispatch(SyncEvent::SpendSettled {
                            card_id: card_id.to_string(),
                            transaction_id: tx.id.clone(),
                            amount: tx.amount,
                            settlement_hash: tx.settlement_hash.clone().unwrap_or_default(),
                        })
                        .await;
                }
                PendingResolution::Failed { transaction, cause } => {
                    tracker.record_failed();
                    self.events
                        .dispatch(SyncEvent::SpendFailed {
                            card_id: card_id.to_string(),
                            transaction_id: transaction.id,
                            reason: cause.to_string(),
                        })
                        .await;
                }
                PendingResolution::StillPending(_) => tracker.record_still_pending(),
            }
        }
        for _ in &plan.spends_to_keep_pending {
            tracker.record_still_pending();
        }

        Ok(self.store.ledger(card_id).await?)
    }

    /// Encode the card's current state and write it to the tag.
    ///
    /// A failed write leaves the store reconciled and the tag stale until the next cycle.
    /// Callers hold the card's lock.
    pub(crate) async fn write_back(&self, card_id: &str) -> Result<usize, SyncError> {
        let ledger = self.store.ledger(card_id).await?;
        let payload = ledger.to_payload();
        let bytes = self.codec.encode(&payload, self.tag.capacity())?;

        tokio::time::timeout(self.config.io_timeout, self.tag.write_raw(&bytes))
            .await
            .map_err(|_| SyncError::Timeout {
                operation: "tag write",
                after: self.config.io_timeout,
            })??;

        self.store.mark_tag_written(card_id, &payload).await?;
        self.events
            .dispatch(SyncEvent::TagWritten {
                card_id: card_id.to_string(),
                bytes: bytes.len(),
            })
            .await;
        Ok(bytes.len())
    }

    /// Bind a blank tag to a new card and write its first ledger.
    ///
    /// A card whose first write never completed may be provisioned again onto a blank tag.
    pub async fn provision_card(
        &self,
        display_name: &str,
        address: &str,
        initial_objects: Vec<UnspentObject>,
    ) -> Result<Card, SyncError> {
        let _reader = self.locks.try_acquire(TAG_READER_LOCK)?;
        self.set_phase(None, SyncPhase::Scanning).await;

        let result = self
            .provision_inner(display_name, address, initial_objects)
            .await;
        match result {
            Ok(card) => {
                info!("Provisioned card {} for {}", card.id, card.address);
                self.set_phase(Some(&card.id), SyncPhase::Ready).await;
                Ok(card)
            }
            Err(e) => {
                warn!("Provisioning {} failed: {}", address, e);
                self.set_phase(None, SyncPhase::Error).await;
                self.events
                    .dispatch(SyncEvent::SyncFailed {
                        card_id: None,
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn provision_inner(
        &self,
        display_name: &str,
        address: &str,
        initial_objects: Vec<UnspentObject>,
    ) -> Result<Card, SyncError> {
        let bytes = self.read_raw(&SyncCancellation::new()).await?;
        if let DecodedTag::Ledger(payload) = self.codec.decode(&bytes)? {
            return Err(SyncError::TagInUse(payload.wallet_address));
        }

        let card = match self.store.get_card_by_address(address).await {
            Some(card) if card.last_synced_at.is_none() => {
                info!("Resuming provisioning of card {}", card.id);
                card
            }
            Some(_) => {
                return Err(SyncError::Store(StoreError::DuplicateAddress(
                    address.to_string(),
                )));
            }
            None => {
                let mut card = Card::new(generate_id("card"), display_name, address);
                card.tag_stale = true;
                let card = self.store.upsert_card(card).await?;
                let objects = initial_objects
                    .into_iter()
                    .map(|mut object| {
                        object.locked = false;
                        object
                    })
                    .collect();
                self.store.replace_unspent_objects(&card.id, objects).await?;
                card
            }
        };

        let _guard = self.locks.try_acquire(&card.id)?;
        self.set_phase(Some(&card.id), SyncPhase::Writing).await;
        self.write_back(&card.id).await?;
        self.store.touch_synced(&card.id, Utc::now()).await?;

        self.store
            .get_card(&card.id)
            .await
            .ok_or_else(|| SyncError::CardNotFound(card.id.clone()))
    }
}
