// In-memory stand-ins for the external capabilities, shared by unit tests
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::csr_client::ChangeSource;
use crate::error::{SourceError, StoreError};
use crate::lock::{Lease, LeaseProvider};
use crate::materialize::{NotificationSink, NotificationSummary};
use crate::models::{ActionType, Notification, ParentType, RawChangeEvent, SnoozePreference};
use crate::store::{NotificationStore, SnoozePreferenceStore};

pub fn at(timestamp: &str) -> NaiveDateTime {
    NaiveDateTime::parse_from_str(timestamp, "%Y-%m-%dT%H:%M:%S").unwrap()
}

pub fn day(date: &str) -> NaiveDate {
    NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap()
}

pub fn raw_change(
    id: i64,
    quantum_id: Option<&str>,
    shift_type: &str,
    action_type: &str,
) -> RawChangeEvent {
    RawChangeEvent {
        id,
        quantum_id: quantum_id.map(str::to_string),
        shift_modified: Some(at("2022-03-25T15:00:00")),
        shift_type: Some(shift_type.to_string()),
        detail_start: Some(at("2022-03-31T10:00:00")),
        detail_end: Some(at("2022-03-31T11:00:00")),
        activity: Some("CCTV monitoring".to_string()),
        action_type: Some(action_type.to_string()),
    }
}

pub fn notification(
    quantum_id: &str,
    shift_modified: &str,
    parent_type: ParentType,
    action_type: ActionType,
) -> Notification {
    Notification {
        id: None,
        quantum_id: quantum_id.to_string(),
        shift_modified: at(shift_modified),
        detail_start: at("2022-03-31T10:00:00"),
        detail_end: at("2022-03-31T11:00:00"),
        activity: Some("CCTV monitoring".to_string()),
        parent_type,
        action_type,
        processed: false,
    }
}

// Mirrors the two unique indexes of the notification table
#[derive(Default)]
pub struct MemoryNotificationStore {
    rows: Mutex<Vec<Notification>>,
    failing: StdMutex<bool>,
    // Counts report nothing, as if a concurrent writer committed after the check
    stale_counts: StdMutex<bool>,
}

impl MemoryNotificationStore {
    pub async fn all(&self) -> Vec<Notification> {
        self.rows.lock().await.clone()
    }

    pub fn fail_inserts(&self) {
        *self.failing.lock().unwrap() = true;
    }

    pub fn race_other_writers(&self) {
        *self.stale_counts.lock().unwrap() = true;
    }

    fn counts_are_stale(&self) -> bool {
        *self.stale_counts.lock().unwrap()
    }

    fn same_detail(row: &Notification, quantum_id: &str, detail_start: NaiveDateTime, parent_type: ParentType) -> bool {
        row.quantum_id.eq_ignore_ascii_case(quantum_id)
            && row.detail_start == detail_start
            && row.parent_type == parent_type
    }
}

impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<i64, StoreError> {
        let failing = *self.failing.lock().unwrap();
        if failing {
            return Err(StoreError::Corrupt("insert failed".to_string()));
        }
        let mut rows = self.rows.lock().await;
        let clash = rows.iter().any(|row| {
            Self::same_detail(
                row,
                &notification.quantum_id,
                notification.detail_start,
                notification.parent_type,
            ) && (row.shift_modified == notification.shift_modified
                || row.action_type == notification.action_type)
        });
        if clash {
            return Err(StoreError::Conflict);
        }
        let id = rows.len() as i64 + 1;
        rows.push(Notification {
            id: Some(id),
            ..notification.clone()
        });
        Ok(id)
    }

    async fn count_by_detail_start_key(
        &self,
        quantum_id: &str,
        detail_start: NaiveDateTime,
        parent_type: ParentType,
        shift_modified: NaiveDateTime,
    ) -> Result<i64, StoreError> {
        if self.counts_are_stale() {
            return Ok(0);
        }
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|row| {
                Self::same_detail(row, quantum_id, detail_start, parent_type)
                    && row.shift_modified == shift_modified
            })
            .count() as i64)
    }

    async fn count_by_action_key(
        &self,
        quantum_id: &str,
        detail_start: NaiveDateTime,
        parent_type: ParentType,
        action_type: ActionType,
    ) -> Result<i64, StoreError> {
        if self.counts_are_stale() {
            return Ok(0);
        }
        let rows = self.rows.lock().await;
        Ok(rows
            .iter()
            .filter(|row| {
                Self::same_detail(row, quantum_id, detail_start, parent_type)
                    && row.action_type == action_type
            })
            .count() as i64)
    }

    async fn find_unprocessed(&self) -> Result<Vec<Notification>, StoreError> {
        let rows = self.rows.lock().await;
        Ok(rows.iter().filter(|row| !row.processed).cloned().collect())
    }

    async fn find_for_subject(
        &self,
        quantum_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Notification>, StoreError> {
        let rows = self.rows.lock().await;
        let mut found: Vec<Notification> = rows
            .iter()
            .filter(|row| {
                row.quantum_id.eq_ignore_ascii_case(quantum_id)
                    && row.shift_modified >= from
                    && row.shift_modified <= to
            })
            .cloned()
            .collect();
        found.sort_by_key(|row| (row.shift_modified, row.id));
        Ok(found)
    }

    async fn mark_processed(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let mut updated = 0;
        for row in rows.iter_mut() {
            if row.id.is_some_and(|id| ids.contains(&id)) && !row.processed {
                row.processed = true;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete_older_than(&self, cutoff: NaiveDateTime) -> Result<u64, StoreError> {
        let mut rows = self.rows.lock().await;
        let before = rows.len();
        rows.retain(|row| row.shift_modified >= cutoff);
        Ok((before - rows.len()) as u64)
    }
}

#[derive(Default)]
pub struct MemorySnoozeStore {
    preferences: Mutex<HashMap<String, NaiveDate>>,
    lookups: StdMutex<usize>,
    failing: StdMutex<bool>,
}

impl MemorySnoozeStore {
    pub fn lookups(&self) -> usize {
        *self.lookups.lock().unwrap()
    }

    pub fn fail_lookups(&self) {
        *self.failing.lock().unwrap() = true;
    }
}

impl SnoozePreferenceStore for MemorySnoozeStore {
    async fn find_by_subject(&self, quantum_id: &str) -> Result<Option<SnoozePreference>, StoreError> {
        *self.lookups.lock().unwrap() += 1;
        let failing = *self.failing.lock().unwrap();
        if failing {
            return Err(StoreError::Corrupt("lookup failed".to_string()));
        }
        let preferences = self.preferences.lock().await;
        Ok(preferences
            .get(&quantum_id.to_lowercase())
            .map(|snooze_until| SnoozePreference {
                quantum_id: quantum_id.to_string(),
                snooze_until: *snooze_until,
            }))
    }

    async fn upsert(&self, preference: &SnoozePreference) -> Result<(), StoreError> {
        self.preferences
            .lock()
            .await
            .insert(preference.quantum_id.to_lowercase(), preference.snooze_until);
        Ok(())
    }
}

// Per-region canned responses; regions without a script return nothing
#[derive(Default)]
pub struct ScriptedSource {
    responses: StdMutex<HashMap<u32, Vec<RawChangeEvent>>>,
    failing_regions: StdMutex<Vec<u32>>,
    failing_acknowledgements: StdMutex<bool>,
    fetches: StdMutex<Vec<u32>>,
    acknowledgements: StdMutex<Vec<(u32, Vec<i64>)>>,
}

impl ScriptedSource {
    pub fn respond(&self, region: u32, changes: Vec<RawChangeEvent>) {
        self.responses.lock().unwrap().insert(region, changes);
    }

    pub fn fail_region(&self, region: u32) {
        self.failing_regions.lock().unwrap().push(region);
    }

    pub fn fail_acknowledgements(&self) {
        *self.failing_acknowledgements.lock().unwrap() = true;
    }

    pub fn fetches(&self) -> Vec<u32> {
        self.fetches.lock().unwrap().clone()
    }

    pub fn acknowledgements(&self) -> Vec<(u32, Vec<i64>)> {
        self.acknowledgements.lock().unwrap().clone()
    }

    fn unavailable(region: u32) -> SourceError {
        SourceError::Status {
            url: format!("http://csr.test/updates/{}", region),
            status: reqwest::StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl ChangeSource for ScriptedSource {
    async fn fetch_changes(&self, region: u32) -> Result<Vec<RawChangeEvent>, SourceError> {
        self.fetches.lock().unwrap().push(region);
        if self.failing_regions.lock().unwrap().contains(&region) {
            return Err(Self::unavailable(region));
        }
        Ok(self
            .responses
            .lock()
            .unwrap()
            .get(&region)
            .cloned()
            .unwrap_or_default())
    }

    async fn acknowledge_processed(&self, region: u32, ids: &[i64]) -> Result<(), SourceError> {
        self.acknowledgements.lock().unwrap().push((region, ids.to_vec()));
        if *self.failing_acknowledgements.lock().unwrap() {
            return Err(Self::unavailable(region));
        }
        Ok(())
    }
}

struct MemoryLock {
    locked_by: String,
    locked_at: DateTime<Utc>,
    lock_until: DateTime<Utc>,
    renewals: usize,
}

// Same acquisition rule as the shedlock table, against the wall clock
#[derive(Default)]
pub struct MemoryLeaseProvider {
    locks: StdMutex<HashMap<String, MemoryLock>>,
}

impl MemoryLeaseProvider {
    pub fn locked_by(&self, name: &str) -> Option<String> {
        self.locks.lock().unwrap().get(name).map(|lock| lock.locked_by.clone())
    }

    pub fn renewals(&self, name: &str) -> usize {
        self.locks.lock().unwrap().get(name).map_or(0, |lock| lock.renewals)
    }
}

impl LeaseProvider for MemoryLeaseProvider {
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        lock_at_most: Duration,
    ) -> Result<Option<Lease>, StoreError> {
        let now = Utc::now();
        let mut locks = self.locks.lock().unwrap();
        if locks.get(name).is_some_and(|lock| lock.lock_until > now) {
            return Ok(None);
        }
        let lock_at_most = ChronoDuration::from_std(lock_at_most)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        locks.insert(
            name.to_string(),
            MemoryLock {
                locked_by: owner.to_string(),
                locked_at: now,
                lock_until: now + lock_at_most,
                renewals: 0,
            },
        );
        Ok(Some(Lease {
            name: name.to_string(),
            owner: owner.to_string(),
        }))
    }

    async fn renew(&self, lease: &Lease, lock_at_most: Duration) -> Result<bool, StoreError> {
        let lock_at_most = ChronoDuration::from_std(lock_at_most)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let now = Utc::now();
        let mut locks = self.locks.lock().unwrap();
        match locks.get_mut(&lease.name) {
            Some(lock) if lock.locked_by == lease.owner && lock.lock_until > now => {
                lock.lock_until = now + lock_at_most;
                lock.renewals += 1;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, lease: &Lease, lock_at_least: Duration) -> Result<(), StoreError> {
        let lock_at_least = ChronoDuration::from_std(lock_at_least)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let now = Utc::now();
        let mut locks = self.locks.lock().unwrap();
        if let Some(lock) = locks.get_mut(&lease.name) {
            if lock.locked_by == lease.owner {
                lock.lock_until = now.max(lock.locked_at + lock_at_least);
            }
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingSink {
    delivered: StdMutex<Vec<NotificationSummary>>,
    failing_subjects: StdMutex<Vec<String>>,
    // Deliveries accepted before every further one is refused
    accept_limit: StdMutex<Option<usize>>,
}

impl RecordingSink {
    pub fn delivered(&self) -> Vec<NotificationSummary> {
        self.delivered.lock().unwrap().clone()
    }

    pub fn fail_for(&self, quantum_id: &str) {
        self.failing_subjects.lock().unwrap().push(quantum_id.to_lowercase());
    }

    pub fn fail_after(&self, accepted: usize) {
        *self.accept_limit.lock().unwrap() = Some(self.delivered().len() + accepted);
    }

    pub fn accept_all(&self) {
        *self.accept_limit.lock().unwrap() = None;
    }
}

impl NotificationSink for RecordingSink {
    async fn deliver(&self, summary: &NotificationSummary) -> anyhow::Result<()> {
        if self
            .failing_subjects
            .lock()
            .unwrap()
            .contains(&summary.quantum_id.to_lowercase())
        {
            anyhow::bail!("delivery to {} refused", summary.quantum_id);
        }
        let limit = *self.accept_limit.lock().unwrap();
        let mut delivered = self.delivered.lock().unwrap();
        if limit.is_some_and(|limit| delivered.len() >= limit) {
            anyhow::bail!("sink closed after {} deliveries", delivered.len());
        }
        delivered.push(summary.clone());
        Ok(())
    }
}
