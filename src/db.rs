use anyhow::Result;
use chrono::{NaiveDate, NaiveDateTime};
use sqlx::{postgres::PgPoolOptions, Pool, Postgres};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::StoreError;
use crate::lock::{Lease, LeaseProvider};
use crate::models::{ActionType, Notification, ParentType, SnoozePreference};
use crate::store::{NotificationStore, SnoozePreferenceStore};

pub async fn init_db_pool(database_url: &str) -> Result<Pool<Postgres>> {
    info!("Initializing database connection pool");
    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await?;

    // Run migrations
    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

// Two writers racing past the dedup check end up here
fn map_insert_error(e: sqlx::Error) -> StoreError {
    match e.as_database_error() {
        Some(db_err) if db_err.is_unique_violation() => StoreError::Conflict,
        _ => StoreError::Database(e),
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: i64,
    quantum_id: String,
    shift_modified: NaiveDateTime,
    detail_start: NaiveDateTime,
    detail_end: NaiveDateTime,
    activity: Option<String>,
    parent_type: String,
    action_type: String,
    processed: bool,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = StoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let parent_type = ParentType::from_token(&row.parent_type)
            .ok_or_else(|| StoreError::Corrupt(format!("parent_type '{}'", row.parent_type)))?;
        let action_type = ActionType::from_token(&row.action_type)
            .ok_or_else(|| StoreError::Corrupt(format!("action_type '{}'", row.action_type)))?;

        Ok(Notification {
            id: Some(row.id),
            quantum_id: row.quantum_id,
            shift_modified: row.shift_modified,
            detail_start: row.detail_start,
            detail_end: row.detail_end,
            activity: row.activity,
            parent_type,
            action_type,
            processed: row.processed,
        })
    }
}

fn into_notifications(rows: Vec<NotificationRow>) -> Result<Vec<Notification>, StoreError> {
    rows.into_iter().map(Notification::try_from).collect()
}

const NOTIFICATION_COLUMNS: &str = "id, quantum_id, shift_modified, detail_start, detail_end, \
                                    activity, parent_type, action_type, processed";

#[derive(Clone)]
pub struct PgNotificationStore {
    pool: Pool<Postgres>,
}

impl PgNotificationStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

impl NotificationStore for PgNotificationStore {
    async fn insert(&self, notification: &Notification) -> Result<i64, StoreError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO notification
                (quantum_id, shift_modified, detail_start, detail_end, activity,
                 parent_type, action_type, processed)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id
            "#,
        )
        .bind(&notification.quantum_id)
        .bind(notification.shift_modified)
        .bind(notification.detail_start)
        .bind(notification.detail_end)
        .bind(&notification.activity)
        .bind(notification.parent_type.as_str())
        .bind(notification.action_type.as_str())
        .bind(notification.processed)
        .fetch_one(&self.pool)
        .await
        .map_err(map_insert_error)?;

        Ok(id)
    }

    async fn count_by_detail_start_key(
        &self,
        quantum_id: &str,
        detail_start: NaiveDateTime,
        parent_type: ParentType,
        shift_modified: NaiveDateTime,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notification
            WHERE lower(quantum_id) = lower($1)
              AND detail_start = $2
              AND parent_type = $3
              AND shift_modified = $4
            "#,
        )
        .bind(quantum_id)
        .bind(detail_start)
        .bind(parent_type.as_str())
        .bind(shift_modified)
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn count_by_action_key(
        &self,
        quantum_id: &str,
        detail_start: NaiveDateTime,
        parent_type: ParentType,
        action_type: ActionType,
    ) -> Result<i64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM notification
            WHERE lower(quantum_id) = lower($1)
              AND detail_start = $2
              AND parent_type = $3
              AND action_type = $4
            "#,
        )
        .bind(quantum_id)
        .bind(detail_start)
        .bind(parent_type.as_str())
        .bind(action_type.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(count)
    }

    async fn find_unprocessed(&self) -> Result<Vec<Notification>, StoreError> {
        let query = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notification WHERE NOT processed ORDER BY id"
        );
        let rows = sqlx::query_as::<_, NotificationRow>(&query)
            .fetch_all(&self.pool)
            .await?;

        into_notifications(rows)
    }

    async fn find_for_subject(
        &self,
        quantum_id: &str,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<Notification>, StoreError> {
        let query = format!(
            "SELECT {NOTIFICATION_COLUMNS} FROM notification \
             WHERE lower(quantum_id) = lower($1) AND shift_modified BETWEEN $2 AND $3 \
             ORDER BY shift_modified, id"
        );
        let rows = sqlx::query_as::<_, NotificationRow>(&query)
            .bind(quantum_id)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;

        into_notifications(rows)
    }

    async fn mark_processed(&self, ids: &[i64]) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE notification SET processed = TRUE
            WHERE id = ANY($1) AND NOT processed
            "#,
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_older_than(&self, cutoff: NaiveDateTime) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM notification WHERE shift_modified < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[derive(Clone)]
pub struct PgSnoozePreferenceStore {
    pool: Pool<Postgres>,
}

impl PgSnoozePreferenceStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

impl SnoozePreferenceStore for PgSnoozePreferenceStore {
    async fn find_by_subject(
        &self,
        quantum_id: &str,
    ) -> Result<Option<SnoozePreference>, StoreError> {
        let row: Option<(String, NaiveDate)> = sqlx::query_as(
            r#"
            SELECT quantum_id, snooze_until FROM snooze_preference
            WHERE lower(quantum_id) = lower($1)
            "#,
        )
        .bind(quantum_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(quantum_id, snooze_until)| SnoozePreference {
            quantum_id,
            snooze_until,
        }))
    }

    async fn upsert(&self, preference: &SnoozePreference) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO snooze_preference (id, quantum_id, snooze_until, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT ((lower(quantum_id)))
            DO UPDATE SET snooze_until = EXCLUDED.snooze_until, updated_at = NOW()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&preference.quantum_id)
        .bind(preference.snooze_until)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Leases in the `shedlock` table. All times come from the database clock so
/// instances with skewed clocks still agree on expiry.
#[derive(Clone)]
pub struct PgLeaseProvider {
    pool: Pool<Postgres>,
}

impl PgLeaseProvider {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

impl LeaseProvider for PgLeaseProvider {
    async fn try_acquire(
        &self,
        name: &str,
        owner: &str,
        lock_at_most: Duration,
    ) -> Result<Option<Lease>, StoreError> {
        // Only an expired row is taken over; a live lease leaves zero rows affected
        let result = sqlx::query(
            r#"
            INSERT INTO shedlock (name, lock_until, locked_at, locked_by)
            VALUES ($1, NOW() + make_interval(secs => $3), NOW(), $2)
            ON CONFLICT (name) DO UPDATE
            SET lock_until = EXCLUDED.lock_until,
                locked_at = EXCLUDED.locked_at,
                locked_by = EXCLUDED.locked_by
            WHERE shedlock.lock_until <= NOW()
            "#,
        )
        .bind(name)
        .bind(owner)
        .bind(lock_at_most.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            debug!(lock = name, "Lock is held");
            return Ok(None);
        }

        Ok(Some(Lease {
            name: name.to_string(),
            owner: owner.to_string(),
        }))
    }

    async fn renew(&self, lease: &Lease, lock_at_most: Duration) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE shedlock
            SET lock_until = NOW() + make_interval(secs => $3)
            WHERE name = $1 AND locked_by = $2 AND lock_until > NOW()
            "#,
        )
        .bind(&lease.name)
        .bind(&lease.owner)
        .bind(lock_at_most.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, lease: &Lease, lock_at_least: Duration) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE shedlock
            SET lock_until = GREATEST(NOW(), locked_at + make_interval(secs => $3))
            WHERE name = $1 AND locked_by = $2
            "#,
        )
        .bind(&lease.name)
        .bind(&lease.owner)
        .bind(lock_at_least.as_secs_f64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
