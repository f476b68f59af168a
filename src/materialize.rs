use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::description::{describe, format_day_with_ordinal};
use crate::error::StoreError;
use crate::metrics;
use crate::models::{Notification, ParentType};
use crate::snooze::SnoozeGate;
use crate::store::{NotificationStore, SnoozePreferenceStore};

// Lines per summary handed to the sink
pub const SUMMARY_CHUNK_SIZE: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSummary {
    pub quantum_id: String,
    pub title: String,
    pub lines: Vec<String>,
}

// Outbound delivery of summaries; channel mechanics live behind this
#[trait_variant::make(NotificationSink: Send)]
pub trait LocalNotificationSink {
    async fn deliver(&self, summary: &NotificationSummary) -> anyhow::Result<()>;
}

/// Default sink: records what would be sent.
pub struct LogSink;

impl NotificationSink for LogSink {
    async fn deliver(&self, summary: &NotificationSummary) -> anyhow::Result<()> {
        info!(
            quantum_id = %summary.quantum_id,
            title = %summary.title,
            lines = summary.lines.len(),
            "Notification summary ready"
        );
        Ok(())
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MaterializeReport {
    pub subjects: usize,
    pub summaries: usize,
    pub snoozed: usize,
    pub failed: usize,
    pub marked_processed: u64,
}

/// Turns the unprocessed rows of a poll cycle into per-subject summaries and
/// flips them to processed.
pub struct NotificationMaterializer<S, P, K> {
    store: Arc<S>,
    snooze: Arc<SnoozeGate<P>>,
    sink: Arc<K>,
}

impl<S, P, K> NotificationMaterializer<S, P, K>
where
    S: NotificationStore + Sync,
    P: SnoozePreferenceStore + Sync,
    K: NotificationSink + Sync,
{
    pub fn new(store: Arc<S>, snooze: Arc<SnoozeGate<P>>, sink: Arc<K>) -> Self {
        Self { store, snooze, sink }
    }

    pub async fn materialize_notifications(
        &self,
        today: NaiveDate,
    ) -> Result<MaterializeReport, StoreError> {
        let unprocessed = self.store.find_unprocessed().await?;
        info!(count = unprocessed.len(), "Sending notifications");

        let mut report = MaterializeReport::default();
        for (_, group) in group_by_subject(unprocessed) {
            report.subjects += 1;
            let quantum_id = group[0].quantum_id.clone();
            let ids: Vec<i64> = group.iter().filter_map(|n| n.id).collect();

            if self.snooze.is_snoozed(&quantum_id, today).await {
                debug!(quantum_id = %quantum_id, "Subject snoozed, not sending");
                report.snoozed += 1;
            } else {
                match self.deliver_group(&quantum_id, group).await {
                    Ok(sent) => report.summaries += sent,
                    Err(e) => {
                        // Left unprocessed so the next cycle tries again
                        warn!(quantum_id = %quantum_id, error = %e, "Sending notifications failed");
                        report.failed += 1;
                        continue;
                    }
                }
            }

            report.marked_processed += self.store.mark_processed(&ids).await?;
        }

        info!(
            subjects = report.subjects,
            summaries = report.summaries,
            snoozed = report.snoozed,
            failed = report.failed,
            "Finished sending notifications"
        );
        Ok(report)
    }

    async fn deliver_group(
        &self,
        quantum_id: &str,
        group: Vec<Notification>,
    ) -> anyhow::Result<usize> {
        let latest = latest_per_detail(group);
        let mut sent = 0;
        // A failure part way leaves the whole group unprocessed, so chunks
        // already delivered are sent again on the next cycle
        for chunk in latest.chunks(SUMMARY_CHUNK_SIZE) {
            self.sink.deliver(&summarize(quantum_id, chunk)).await?;
            metrics::SUMMARIES_DELIVERED.inc();
            sent += 1;
        }
        Ok(sent)
    }
}

// Case-insensitive subject grouping in a stable order
fn group_by_subject(notifications: Vec<Notification>) -> BTreeMap<String, Vec<Notification>> {
    let mut groups: BTreeMap<String, Vec<Notification>> = BTreeMap::new();
    for notification in notifications {
        groups
            .entry(notification.quantum_id.to_lowercase())
            .or_default()
            .push(notification);
    }
    groups
}

// Most recent change per detail, ordered by when the detail starts
fn latest_per_detail(group: Vec<Notification>) -> Vec<Notification> {
    let mut latest: BTreeMap<(NaiveDateTime, ParentType), Notification> = BTreeMap::new();
    for notification in group {
        let key = (notification.detail_start, notification.parent_type);
        match latest.get(&key) {
            Some(existing) if existing.shift_modified >= notification.shift_modified => {}
            _ => {
                latest.insert(key, notification);
            }
        }
    }
    latest.into_values().collect()
}

fn summarize(quantum_id: &str, chunk: &[Notification]) -> NotificationSummary {
    // Titled after the oldest change in the chunk
    let title = chunk
        .iter()
        .map(|n| n.shift_modified)
        .min()
        .map(|oldest| format!("Changes since {}", format_day_with_ordinal(oldest.date())))
        .unwrap_or_else(|| "Changes".to_string());

    NotificationSummary {
        quantum_id: quantum_id.to_string(),
        title,
        lines: chunk.iter().map(describe).collect(),
    }
}
