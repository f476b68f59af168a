use chrono::NaiveDateTime;

use crate::error::StoreError;
use crate::models::{ActionType, Notification, ParentType, SnoozePreference};

// Persistence capabilities the pipeline relies on. Postgres implementations
// live in db.rs; subject matching is always case-insensitive.
#[trait_variant::make(NotificationStore: Send)]
pub trait LocalNotificationStore {
    /// Stores a new row and returns its id. Returns `StoreError::Conflict`
    /// when a row with either dedup key already exists.
    async fn insert(&self, notification: &Notification) -> Result<i64, StoreError>;

    async fn count_by_detail_start_key(
        &self,
        quantum_id: &str,
        detail_start: NaiveDateTime,
        parent_type: ParentType,
        shift_modified: NaiveDateTime,
    ) -> Result<i64, StoreError>;

    async fn count_by_action_key(
        &self,
        quantum_id: &str,
        detail_start: NaiveDateTime,
        parent_type: ParentType,
        action_type: ActionType,
    ) -> Result<i64, StoreError>;

    async fn find_unprocessed(&self) -> Result<Vec<Notification>, StoreError>;

    /// Rows for a subject whose `shift_modified` lies within `[from, to]`.
    async fn find_for_subject(
        &self,
        quantum_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Notification>, StoreError>;

    async fn mark_processed(&self, ids: &[i64]) -> Result<u64, StoreError>;

    async fn delete_older_than(&self, cutoff: NaiveDateTime) -> Result<u64, StoreError>;
}

#[trait_variant::make(SnoozePreferenceStore: Send)]
pub trait LocalSnoozePreferenceStore {
    async fn find_by_subject(&self, quantum_id: &str)
        -> Result<Option<SnoozePreference>, StoreError>;

    async fn upsert(&self, preference: &SnoozePreference) -> Result<(), StoreError>;
}
