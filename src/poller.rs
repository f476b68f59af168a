use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::csr_client::ChangeSource;
use crate::dedup::DeduplicationGate;
use crate::error::{PollError, StoreError};
use crate::metrics;
use crate::models::{ActionType, Notification, PollOutcome};
use crate::normalizer::{is_unchanged, normalize};
use crate::store::NotificationStore;

/// Fetches, normalizes, deduplicates and stores changes for each region,
/// then acknowledges everything fetched back to CSR.
pub struct RegionPoller<C, S> {
    source: Arc<C>,
    store: Arc<S>,
    gate: DeduplicationGate<S>,
    concurrency: usize,
}

/// Result of polling every configured region once.
#[derive(Debug, Default)]
pub struct RegionsReport {
    pub outcomes: Vec<PollOutcome>,
    pub failed_regions: Vec<u32>,
}

impl<C, S> RegionPoller<C, S>
where
    C: ChangeSource + Sync,
    S: NotificationStore + Sync,
{
    pub fn new(source: Arc<C>, store: Arc<S>, concurrency: usize) -> Self {
        Self {
            source,
            gate: DeduplicationGate::new(store.clone()),
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Polls `regions` in the order given. A failed region is logged and
    /// reported; the others still run.
    pub async fn poll_all_regions(&self, regions: &[u32]) -> RegionsReport {
        // `buffered` keeps results in input order even when polls overlap
        let results: Vec<(u32, Result<PollOutcome, PollError>)> = stream::iter(regions.iter().copied())
            .map(|region| async move { (region, self.poll_region(region).await) })
            .buffered(self.concurrency)
            .collect()
            .await;

        let mut report = RegionsReport::default();
        for (region, result) in results {
            match result {
                Ok(outcome) => report.outcomes.push(outcome),
                Err(e) => {
                    error!(region, error = %e, "Region poll abandoned for this tick");
                    metrics::REGION_FAILURES
                        .with_label_values(&[region.to_string().as_str()])
                        .inc();
                    report.failed_regions.push(region);
                }
            }
        }
        report
    }

    pub async fn poll_region(&self, region: u32) -> Result<PollOutcome, PollError> {
        info!(region, "Refreshing modified details");

        let changes = self
            .source
            .fetch_changes(region)
            .await
            .map_err(|source| PollError::Fetch { region, source })?;

        let mut outcome = PollOutcome::new(region, changes.len());
        metrics::CHANGES_FETCHED
            .with_label_values(&[region.to_string().as_str()])
            .inc_by(changes.len() as u64);
        if changes.is_empty() {
            debug!(region, "No modified details");
            return Ok(outcome);
        }

        for raw in &changes {
            if is_unchanged(raw) {
                outcome.dropped += 1;
                metrics::CHANGES_DROPPED.inc();
                continue;
            }

            let candidate = match normalize(raw) {
                Ok(candidate) => candidate,
                Err(e) => {
                    warn!(region, id = e.raw_id(), error = %e, "Skipping unmappable change");
                    metrics::MAPPING_ERRORS.inc();
                    outcome.rejected += 1;
                    continue;
                }
            };

            let candidate = match self
                .resolve_shift_level_edit(candidate)
                .await
                .map_err(|source| PollError::Store { region, source })?
            {
                Some(candidate) => candidate,
                None => {
                    debug!(region, id = raw.id, "Dropping shift-level edit");
                    metrics::CHANGES_DROPPED.inc();
                    outcome.dropped += 1;
                    continue;
                }
            };

            if self.store_if_new(&candidate).await.map_err(|source| PollError::Store { region, source })? {
                outcome.inserted += 1;
            } else {
                debug!(region, id = raw.id, quantum_id = %candidate.quantum_id, "Skipping duplicate change");
                outcome.duplicates += 1;
            }
        }

        // Every fetched id is acknowledged, duplicates and rejects included,
        // so CSR stops redelivering them
        let ids: Vec<i64> = changes.iter().map(|raw| raw.id).collect();
        match self.source.acknowledge_processed(region, &ids).await {
            Ok(()) => outcome.acknowledged_ids = ids.into_iter().collect(),
            Err(e) => {
                // Stored rows stay; redelivered changes are deduplicated next tick
                warn!(region, error = %e, "Failed to acknowledge processed details");
                metrics::ACKNOWLEDGEMENT_FAILURES.inc();
            }
        }

        info!(
            region,
            fetched = outcome.fetched,
            inserted = outcome.inserted,
            duplicates = outcome.duplicates,
            rejected = outcome.rejected,
            dropped = outcome.dropped,
            "Completed refreshing modified details"
        );
        Ok(outcome)
    }

    /// Shift-level changes (no activity) only ever surface as an ADD: the first
    /// EDIT seen for a shift becomes an ADD, later ones are dropped.
    async fn resolve_shift_level_edit(
        &self,
        mut candidate: Notification,
    ) -> Result<Option<Notification>, StoreError> {
        if candidate.activity.is_some() || candidate.action_type != ActionType::Edit {
            return Ok(Some(candidate));
        }

        let adds = self
            .store
            .count_by_action_key(
                &candidate.quantum_id,
                candidate.detail_start,
                candidate.parent_type,
                ActionType::Add,
            )
            .await?;
        if adds > 0 {
            return Ok(None);
        }

        candidate.action_type = ActionType::Add;
        Ok(Some(candidate))
    }

    // Ok(false) for duplicates, including a uniqueness conflict lost to a concurrent writer
    async fn store_if_new(&self, candidate: &Notification) -> Result<bool, StoreError> {
        if self.gate.exists(candidate).await? {
            metrics::DUPLICATES_SKIPPED.inc();
            return Ok(false);
        }

        match self.store.insert(candidate).await {
            Ok(id) => {
                debug!(id, quantum_id = %candidate.quantum_id, "Stored notification");
                metrics::NOTIFICATIONS_INSERTED.inc();
                Ok(true)
            }
            Err(StoreError::Conflict) => {
                metrics::DUPLICATES_SKIPPED.inc();
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
