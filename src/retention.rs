use chrono::{Months, NaiveDate, NaiveDateTime};
use tracing::info;

use crate::error::StoreError;
use crate::metrics;
use crate::store::NotificationStore;

// Start of `today`, `retention_months` back
pub fn retention_cutoff(today: NaiveDate, retention_months: u32) -> NaiveDateTime {
    today
        .checked_sub_months(Months::new(retention_months))
        .unwrap_or(NaiveDate::MIN)
        .and_time(chrono::NaiveTime::MIN)
}

/// Hard-deletes notifications modified before the retention cutoff,
/// processed or not. Returns the number of rows removed.
pub async fn tidy_notifications<S>(
    store: &S,
    today: NaiveDate,
    retention_months: u32,
) -> Result<u64, StoreError>
where
    S: NotificationStore + Sync,
{
    let cutoff = retention_cutoff(today, retention_months);
    info!(%cutoff, "Removing old notifications");

    let removed = store.delete_older_than(cutoff).await?;
    metrics::NOTIFICATIONS_PRUNED.inc_by(removed as f64);

    info!(%cutoff, removed, "Removed old notifications");
    Ok(removed)
}
