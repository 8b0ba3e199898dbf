//! Per-chain event synchronization.
//!
//! [`ChainSyncer`] walks a chain from its checkpoint toward the confirmed
//! head in bounded chunks, applies events in strict nonce order and
//! persists the checkpoint after every applied event.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};
use vaultsync_rpc::ChainId;

use super::metrics::SyncMetrics;
use crate::config::ChainSyncConfig;
use crate::error::IndexerError;
use crate::events::{ChainEvent, EventKind, EventRecord, FetchedLog};
use crate::projection::{ProjectionApplier, SyncCheckpoint};
use crate::source::ChainSource;
use crate::store::ProjectionStore;

/// Gap tracking carried across chunks and ticks.
#[derive(Debug, Default)]
struct SyncState {
    /// Height to re-fetch from while a gap is suspected.
    gap_marker: Option<u64>,

    /// Set once a gap was seen, cleared by the next gap-free fetch.
    gap_flagged: bool,

    /// Gaps seen in a row, scales the rewind up to one chunk.
    consecutive_gaps: u64,

    /// Target of the last tick.
    last_target: Option<u64>,

    /// Checkpoint at the end of the last tick.
    last_checkpoint: Option<SyncCheckpoint>,
}

/// Outcome of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EventOutcome {
    /// Projected, recorded and checkpointed.
    Applied,
    /// Record already existed; only the checkpoint moved.
    Replayed,
    /// At or below the checkpoint nonce.
    Skipped,
    /// Projection or persistence failed.
    Failed,
}

/// Result of one sync pass over a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Chain ID.
    pub chain_id: ChainId,

    /// Confirmed target height, `None` if already caught up.
    pub target: Option<u64>,

    /// Chunks fetched, gap re-fetches included.
    pub chunks: u32,

    /// Events applied.
    pub applied: u64,

    /// Events that already had a record.
    pub replayed: u64,

    /// Events that failed to apply.
    pub failed: u64,

    /// Gaps detected.
    pub gaps: u32,

    /// Checkpoint after the pass.
    pub checkpoint: SyncCheckpoint,
}

impl SyncReport {
    /// Returns true if the chain was already at its target.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.target.is_none()
    }
}

/// Lag and gap status of a chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncStatus {
    /// Chain ID.
    pub chain_id: ChainId,

    /// Last known checkpoint.
    pub checkpoint: Option<SyncCheckpoint>,

    /// Last computed target height.
    pub target: Option<u64>,

    /// Pending gap re-fetch height.
    pub gap_marker: Option<u64>,

    /// Whether a gap is suspected.
    pub gap_flagged: bool,
}

impl SyncStatus {
    /// Returns how many confirmed blocks the checkpoint is behind.
    #[must_use]
    pub fn lag_blocks(&self) -> Option<u64> {
        match (&self.checkpoint, self.target) {
            (Some(cp), Some(target)) => Some(target.saturating_sub(cp.height)),
            _ => None,
        }
    }
}

/// Synchronizes one chain into the projection store.
pub struct ChainSyncer {
    config: ChainSyncConfig,
    source: Arc<dyn ChainSource>,
    store: Arc<dyn ProjectionStore>,
    applier: ProjectionApplier,
    metrics: Arc<SyncMetrics>,
    state: Mutex<SyncState>,
    /// Serializes checkpoint writers for this chain.
    writer: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ChainSyncer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainSyncer")
            .field("chain_id", &self.config.chain_id)
            .field("name", &self.config.name)
            .finish_non_exhaustive()
    }
}

impl ChainSyncer {
    /// Creates a syncer.
    ///
    /// # Errors
    ///
    /// Returns [`IndexerError::Config`] if the configuration is invalid or
    /// names a different chain than the source.
    pub fn new(
        config: ChainSyncConfig,
        source: Arc<dyn ChainSource>,
        store: Arc<dyn ProjectionStore>,
        applier: ProjectionApplier,
    ) -> Result<Self, IndexerError> {
        config.validate()?;
        if source.chain_id() != config.chain_id {
            return Err(IndexerError::Config(format!(
                "source chain {} does not match configured chain {}",
                source.chain_id(),
                config.chain_id
            )));
        }

        Ok(Self {
            config,
            source,
            store,
            applier,
            metrics: Arc::new(SyncMetrics::new()),
            state: Mutex::new(SyncState::default()),
            writer: tokio::sync::Mutex::new(()),
        })
    }

    /// Returns the chain ID.
    #[must_use]
    pub fn chain_id(&self) -> ChainId {
        self.config.chain_id
    }

    /// Returns the configuration.
    #[must_use]
    pub const fn config(&self) -> &ChainSyncConfig {
        &self.config
    }

    /// Returns the metrics.
    #[must_use]
    pub fn metrics(&self) -> Arc<SyncMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Returns the lag and gap status.
    #[must_use]
    pub fn status(&self) -> SyncStatus {
        let state = self.state.lock();
        SyncStatus {
            chain_id: self.config.chain_id,
            checkpoint: state.last_checkpoint.clone(),
            target: state.last_target,
            gap_marker: state.gap_marker,
            gap_flagged: state.gap_flagged,
        }
    }

    /// Loads the stored checkpoint, bootstrapping one if none exists.
    ///
    /// A bootstrapped checkpoint is not persisted until something advances.
    async fn load_checkpoint(&self) -> Result<SyncCheckpoint, IndexerError> {
        let chain_id = self.config.chain_id;
        if let Some(cp) = self.store.find_checkpoint(chain_id).await? {
            return Ok(cp);
        }

        let cp = match self.store.find_last_event_record(chain_id).await? {
            Some(record) => SyncCheckpoint::new(chain_id, record.block_number, record.nonce),
            None => SyncCheckpoint::new(chain_id, self.config.start_height, 0),
        };
        info!(
            chain_id,
            height = cp.height,
            nonce = cp.nonce,
            "bootstrapped checkpoint"
        );
        Ok(cp)
    }

    /// Advances the height watermark when no events are pending.
    ///
    /// Run once at startup: if the live nonce equals the checkpoint nonce,
    /// the checkpoint height moves to the confirmed head without a log query.
    ///
    /// # Errors
    ///
    /// Returns an error if a chain read or the store fails.
    pub async fn reconcile(&self) -> Result<Option<SyncCheckpoint>, IndexerError> {
        let _writer = self.writer.lock().await;
        let chain_id = self.config.chain_id;
        let cp = self.load_checkpoint().await?;

        let live_nonce = self.source.live_nonce().await?;
        if live_nonce > cp.nonce {
            debug!(chain_id, live_nonce, nonce = cp.nonce, "events pending, skipping reconcile");
            return Ok(None);
        }

        let latest = self.source.block_height().await?;
        let height = latest.saturating_sub(self.config.confirmation_delay);
        if height <= cp.height {
            return Ok(None);
        }

        let cp = self.store.upsert_checkpoint(chain_id, height, cp.nonce).await?;
        info!(
            chain = %self.config.name,
            chain_id,
            height,
            nonce = cp.nonce,
            "reconciled checkpoint height"
        );
        self.state.lock().last_checkpoint = Some(cp.clone());
        Ok(Some(cp))
    }

    /// Runs one sync pass.
    ///
    /// # Errors
    ///
    /// Returns an error if a chain read or a checkpoint write fails. Single
    /// event failures are logged and counted in the report instead.
    pub async fn sync_once(&self) -> Result<SyncReport, IndexerError> {
        let _writer = self.writer.lock().await;
        let chain_id = self.config.chain_id;
        let mut cp = self.load_checkpoint().await?;

        let latest = self.source.block_height().await?;
        let target = latest.saturating_sub(self.config.confirmation_delay);

        let mut report = SyncReport {
            chain_id,
            target: None,
            chunks: 0,
            applied: 0,
            replayed: 0,
            failed: 0,
            gaps: 0,
            checkpoint: cp.clone(),
        };

        if target <= cp.height {
            debug!(chain_id, target, height = cp.height, "nothing to sync");
            self.remember(&cp, target);
            return Ok(report);
        }
        report.target = Some(target);

        let mut cursor = cp.height;
        let mut gap_retries = 0u32;

        while report.chunks < self.config.max_chunks_per_tick && cursor < target {
            report.chunks += 1;
            self.metrics.record_chunk();

            let to = cursor.saturating_add(self.config.chunk_size).min(target);
            let (from, gap_flagged) = {
                let state = self.state.lock();
                (state.gap_marker.unwrap_or(cursor), state.gap_flagged)
            };

            let base_nonce = cp.nonce;
            let live_nonce = self.source.live_nonce().await?;

            if live_nonce <= base_nonce {
                if gap_flagged {
                    let watermark = to
                        .saturating_sub(self.config.stale_nonce_rewind_blocks())
                        .max(cp.height);
                    if watermark > cp.height {
                        cp = self.store.upsert_checkpoint(chain_id, watermark, cp.nonce).await?;
                    }
                    self.metrics.record_stale_rewind();
                    debug!(chain_id, to, watermark, "nonce unchanged with gap flagged, holding watermark back");
                } else {
                    if to > cp.height {
                        cp = self.store.upsert_checkpoint(chain_id, to, cp.nonce).await?;
                    }
                    self.metrics.record_fast_path();
                }
                cursor = to;
                continue;
            }

            let events = self.fetch_range(from, to, base_nonce, live_nonce).await?;

            let expected = base_nonce.saturating_add(1);
            let run_len = events
                .iter()
                .zip(expected..)
                .take_while(|(entry, nonce)| entry.nonce() == *nonce)
                .count();
            let (run, leftover) = events.split_at(run_len);

            let mut chunk_failed = false;
            let mut advanced = 0u64;
            for entry in run {
                match self.process_fetched(&mut cp, entry, !chunk_failed).await {
                    EventOutcome::Applied => {
                        report.applied += 1;
                        if !chunk_failed {
                            advanced += 1;
                        }
                    }
                    EventOutcome::Replayed => {
                        report.replayed += 1;
                        if !chunk_failed {
                            advanced += 1;
                        }
                    }
                    EventOutcome::Skipped => {}
                    EventOutcome::Failed => {
                        report.failed += 1;
                        chunk_failed = true;
                    }
                }
            }

            if chunk_failed {
                warn!(
                    chain = %self.config.name,
                    chain_id,
                    nonce = cp.nonce,
                    "event apply failed, holding checkpoint until next tick"
                );
                break;
            }

            if let Some(next_seen) = leftover.first().map(FetchedLog::nonce) {
                report.gaps += 1;
                gap_retries += 1;
                self.metrics.record_gap();

                let marker = {
                    let mut state = self.state.lock();
                    state.consecutive_gaps = state.consecutive_gaps.saturating_add(1);
                    let rewind = self
                        .config
                        .gap_rewind_blocks()
                        .saturating_mul(state.consecutive_gaps)
                        .min(self.config.chunk_size);
                    let marker = cp.height.saturating_sub(rewind);
                    state.gap_marker = Some(marker);
                    state.gap_flagged = true;
                    marker
                };
                warn!(
                    chain = %self.config.name,
                    chain_id,
                    missing_nonce = cp.nonce.saturating_add(1),
                    next_seen,
                    marker,
                    "nonce gap detected, re-fetching from marker"
                );

                if gap_retries >= self.config.max_gap_retries_per_tick {
                    break;
                }
                continue;
            }

            {
                let mut state = self.state.lock();
                state.gap_marker = None;
                state.gap_flagged = false;
                state.consecutive_gaps = 0;
            }

            if advanced == 0 && to > cp.height {
                cp = self.store.upsert_checkpoint(chain_id, to, cp.nonce).await?;
            }
            cursor = to;
        }

        if report.applied > 0 || report.gaps > 0 || report.failed > 0 {
            info!(
                chain = %self.config.name,
                chain_id,
                target,
                chunks = report.chunks,
                applied = report.applied,
                replayed = report.replayed,
                failed = report.failed,
                gaps = report.gaps,
                height = cp.height,
                nonce = cp.nonce,
                "sync pass finished"
            );
        }

        self.remember(&cp, target);
        report.checkpoint = cp;
        Ok(report)
    }

    fn remember(&self, cp: &SyncCheckpoint, target: u64) {
        let mut state = self.state.lock();
        state.last_checkpoint = Some(cp.clone());
        state.last_target = Some(target);
    }

    /// Fetches logs in `[from, to]` with nonces above `base_nonce`, in
    /// nonce order. A decoded event wins over an undecodable log with the
    /// same nonce.
    ///
    /// Stops querying kinds once every nonce up to `live_nonce` is found.
    async fn fetch_range(
        &self,
        from: u64,
        to: u64,
        base_nonce: u64,
        live_nonce: u64,
    ) -> Result<Vec<FetchedLog>, IndexerError> {
        let mut events = Vec::new();
        let mut seen = BTreeSet::new();

        for kind in EventKind::QUERY_ORDER {
            self.metrics.record_log_query();
            let fetched = self.source.fetch_events(kind, from, to).await?;
            for entry in fetched.into_iter().filter(|e| e.nonce() > base_nonce) {
                seen.insert(entry.nonce());
                events.push(entry);
            }

            let pending = live_nonce.saturating_sub(base_nonce);
            let found = seen.range(base_nonce.saturating_add(1)..=live_nonce).count();
            if u64::try_from(found).unwrap_or(u64::MAX) >= pending {
                break;
            }
        }

        events.sort_by_key(|e| (e.nonce(), e.is_malformed(), e.block_number()));
        events.dedup_by_key(|e| e.nonce());

        debug!(
            chain_id = self.config.chain_id,
            from,
            to,
            base_nonce,
            live_nonce,
            count = events.len(),
            "fetched chunk"
        );
        Ok(events)
    }

    /// Applies one fetched log. An undecodable log counts as a failed event,
    /// so the checkpoint stays right before its nonce.
    async fn process_fetched(
        &self,
        cp: &mut SyncCheckpoint,
        entry: &FetchedLog,
        advance: bool,
    ) -> EventOutcome {
        match entry {
            FetchedLog::Event(event) => self.process_event(cp, event, advance).await,
            FetchedLog::Malformed(log) => {
                if cp.is_applied(log.nonce) {
                    return EventOutcome::Skipped;
                }
                self.metrics.record_apply_error();
                error!(
                    chain_id = log.chain_id,
                    nonce = log.nonce,
                    kind = %log.kind,
                    block = log.block_number,
                    transaction_hash = %log.transaction_hash,
                    reason = %log.reason,
                    "undecodable event, holding checkpoint before it"
                );
                EventOutcome::Failed
            }
        }
    }

    /// Applies one event and, if `advance` is set, moves the checkpoint to it.
    ///
    /// Failures are logged here and never propagate.
    async fn process_event(
        &self,
        cp: &mut SyncCheckpoint,
        event: &ChainEvent,
        advance: bool,
    ) -> EventOutcome {
        if cp.is_applied(event.nonce) {
            return EventOutcome::Skipped;
        }

        match self.try_process_event(cp, event, advance).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_apply_error();
                if e.is_missing_dependency() {
                    warn!(
                        chain_id = event.chain_id,
                        nonce = event.nonce,
                        kind = %event.kind(),
                        error = %e,
                        "event dependency missing"
                    );
                } else {
                    error!(
                        chain_id = event.chain_id,
                        nonce = event.nonce,
                        kind = %event.kind(),
                        error = %e,
                        "failed to apply event"
                    );
                }
                EventOutcome::Failed
            }
        }
    }

    async fn try_process_event(
        &self,
        cp: &mut SyncCheckpoint,
        event: &ChainEvent,
        advance: bool,
    ) -> Result<EventOutcome, IndexerError> {
        let chain_id = event.chain_id;

        let outcome = if self
            .store
            .find_event_record(chain_id, event.nonce)
            .await?
            .is_some()
        {
            self.metrics.record_replay();
            debug!(chain_id, nonce = event.nonce, "event already recorded, skipping projection");
            EventOutcome::Replayed
        } else {
            let started = Instant::now();
            self.applier
                .apply(self.source.as_ref(), self.store.as_ref(), event)
                .await?;
            self.store
                .insert_event_record(&EventRecord::from_event(event, Utc::now()))
                .await?;
            self.metrics.record_applied(event.kind(), started.elapsed());
            EventOutcome::Applied
        };

        if advance {
            *cp = self
                .store
                .upsert_checkpoint(chain_id, event.block_number, event.nonce)
                .await?;
        }
        Ok(outcome)
    }
}
