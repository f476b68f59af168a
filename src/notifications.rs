use chrono::{Datelike, Months, NaiveDate, NaiveDateTime, NaiveTime};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::description::describe;
use crate::error::StoreError;
use crate::models::NotificationView;
use crate::snooze::SnoozeGate;
use crate::store::{NotificationStore, SnoozePreferenceStore};

#[derive(Debug, Clone)]
pub struct NotificationQuery {
    pub quantum_id: String,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
    pub unprocessed_only: bool,
    pub process_on_read: bool,
}

impl NotificationQuery {
    pub fn for_subject(quantum_id: impl Into<String>) -> Self {
        Self {
            quantum_id: quantum_id.into(),
            from: None,
            to: None,
            unprocessed_only: false,
            process_on_read: true,
        }
    }
}

/// Resolves the listing window. A missing `from` is the first day of the
/// month `month_step` months before `to`, or of the current month. A missing
/// `to` is the last day of the month `month_step` months after `from`.
pub fn calculate_window(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
    month_step: u32,
) -> (NaiveDate, NaiveDate) {
    let from = match (from, to) {
        (Some(from), _) => from,
        (None, Some(to)) => first_of_month(to.checked_sub_months(Months::new(month_step)).unwrap_or(to)),
        (None, None) => first_of_month(today),
    };
    let to = to.unwrap_or_else(|| {
        let shifted = from.checked_add_months(Months::new(month_step)).unwrap_or(from);
        last_of_month(shifted)
    });
    (from, to)
}

pub fn start_of_day(date: NaiveDate) -> NaiveDateTime {
    date.and_time(NaiveTime::MIN)
}

pub fn end_of_day(date: NaiveDate) -> NaiveDateTime {
    // from_hms_micro_opt only fails on out-of-range components
    date.and_time(NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).unwrap_or(NaiveTime::MIN))
}

fn first_of_month(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn last_of_month(date: NaiveDate) -> NaiveDate {
    first_of_month(date)
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(date)
}

/// The user-facing read path: snooze check, window lookup, descriptions.
pub struct NotificationService<S, P> {
    store: Arc<S>,
    snooze: Arc<SnoozeGate<P>>,
    month_step: u32,
}

impl<S, P> NotificationService<S, P>
where
    S: NotificationStore + Sync,
    P: SnoozePreferenceStore + Sync,
{
    pub fn new(store: Arc<S>, snooze: Arc<SnoozeGate<P>>, month_step: u32) -> Self {
        Self {
            store,
            snooze,
            month_step,
        }
    }

    pub async fn list_notifications(
        &self,
        query: &NotificationQuery,
        today: NaiveDate,
    ) -> Result<Vec<NotificationView>, StoreError> {
        let (from, to) = calculate_window(query.from, query.to, today, self.month_step);

        // Snooze is all-or-nothing for the window
        if self.snooze.is_snoozed(&query.quantum_id, to).await {
            debug!(quantum_id = %query.quantum_id, %to, "Subject snoozed for window");
            return Ok(Vec::new());
        }

        let notifications: Vec<_> = self
            .store
            .find_for_subject(&query.quantum_id, start_of_day(from), end_of_day(to))
            .await?
            .into_iter()
            .filter(|n| !query.unprocessed_only || !n.processed)
            .collect();
        info!(
            quantum_id = %query.quantum_id,
            count = notifications.len(),
            unprocessed_only = query.unprocessed_only,
            "Found user notifications"
        );

        let mut seen = HashSet::new();
        let views: Vec<NotificationView> = notifications
            .iter()
            .map(|n| NotificationView {
                description: describe(n),
                shift_modified: n.shift_modified,
                processed: n.processed,
            })
            .filter(|view| seen.insert(view.clone()))
            .collect();

        if query.process_on_read {
            let ids: Vec<i64> = notifications
                .iter()
                .filter(|n| !n.processed)
                .filter_map(|n| n.id)
                .collect();
            if !ids.is_empty() {
                if let Err(e) = self.store.mark_processed(&ids).await {
                    warn!(quantum_id = %query.quantum_id, error = %e, "Failed to mark notifications processed");
                }
            }
        }

        Ok(views)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, Notification, ParentType};
    use crate::testing::{at, day, notification, MemoryNotificationStore, MemorySnoozeStore};

    struct Fixture {
        store: Arc<MemoryNotificationStore>,
        snooze: Arc<SnoozeGate<MemorySnoozeStore>>,
        service: NotificationService<MemoryNotificationStore, MemorySnoozeStore>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryNotificationStore::default());
        let snooze = Arc::new(SnoozeGate::new(Arc::new(MemorySnoozeStore::default())));
        let service = NotificationService::new(store.clone(), snooze.clone(), 3);
        Fixture {
            store,
            snooze,
            service,
        }
    }

    fn modified_on(quantum_id: &str, shift_modified: &str, detail_start: &str) -> Notification {
        let mut n = notification(quantum_id, shift_modified, ParentType::Shift, ActionType::Add);
        n.detail_start = at(detail_start);
        n.activity = None;
        n
    }

    fn query(from: &str, to: &str) -> NotificationQuery {
        NotificationQuery {
            from: Some(day(from)),
            to: Some(day(to)),
            ..NotificationQuery::for_subject("API_TEST_USER")
        }
    }

    #[test]
    fn test_window_defaults() {
        let today = day("2022-03-25");
        assert_eq!(
            calculate_window(None, None, today, 3),
            (day("2022-03-01"), day("2022-06-30"))
        );
        assert_eq!(
            calculate_window(Some(day("2022-01-15")), None, today, 3),
            (day("2022-01-15"), day("2022-04-30"))
        );
        assert_eq!(
            calculate_window(None, Some(day("2022-05-20")), today, 3),
            (day("2022-02-01"), day("2022-05-20"))
        );
        assert_eq!(
            calculate_window(None, Some(day("2024-05-31")), today, 3),
            (day("2024-02-01"), day("2024-05-31"))
        );
    }

    #[test]
    fn test_day_bounds_are_inclusive() {
        assert_eq!(start_of_day(day("2022-03-25")), at("2022-03-25T00:00:00"));
        assert!(end_of_day(day("2022-03-25")) > at("2022-03-25T23:59:59"));
        assert!(end_of_day(day("2022-03-25")) < at("2022-03-26T00:00:00"));
    }

    #[tokio::test]
    async fn test_lists_window_case_insensitively_and_processes_on_read() {
        let f = fixture();
        f.store.insert(&modified_on("api_test_user", "2024-06-01T00:00:00", "2024-07-01T10:00:00")).await.unwrap();
        f.store.insert(&modified_on("API_TEST_USER", "2024-06-15T23:30:00", "2024-07-02T10:00:00")).await.unwrap();
        f.store.insert(&modified_on("API_TEST_USER", "2024-06-16T00:00:00", "2024-07-03T10:00:00")).await.unwrap();
        f.store.insert(&modified_on("someone_else", "2024-06-10T00:00:00", "2024-07-04T10:00:00")).await.unwrap();

        let views = f
            .service
            .list_notifications(&query("2024-06-01", "2024-06-15"), day("2024-06-20"))
            .await
            .unwrap();

        assert_eq!(views.len(), 2);
        assert_eq!(views[0].description, "On Saturday 1 June, your shift has been added.");
        assert!(views.iter().all(|view| !view.processed));
        assert_eq!(f.store.find_unprocessed().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unprocessed_only_without_processing() {
        let f = fixture();
        let mut seen = modified_on("API_TEST_USER", "2024-06-02T09:00:00", "2024-07-01T10:00:00");
        seen.processed = true;
        f.store.insert(&seen).await.unwrap();
        f.store.insert(&modified_on("API_TEST_USER", "2024-06-03T09:00:00", "2024-07-02T10:00:00")).await.unwrap();

        let q = NotificationQuery {
            unprocessed_only: true,
            process_on_read: false,
            ..query("2024-06-01", "2024-06-15")
        };
        let views = f.service.list_notifications(&q, day("2024-06-20")).await.unwrap();

        assert_eq!(views.len(), 1);
        assert_eq!(views[0].shift_modified, at("2024-06-03T09:00:00"));
        assert_eq!(f.store.find_unprocessed().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_identical_descriptions_are_listed_once() {
        let f = fixture();
        f.store.insert(&modified_on("API_TEST_USER", "2024-06-02T09:00:00", "2024-07-01T10:00:00")).await.unwrap();
        f.store.insert(&modified_on("API_TEST_USER", "2024-06-02T09:00:00", "2024-07-02T10:00:00")).await.unwrap();

        let views = f
            .service
            .list_notifications(&query("2024-06-01", "2024-06-15"), day("2024-06-20"))
            .await
            .unwrap();
        assert_eq!(views.len(), 1);
    }

    #[tokio::test]
    async fn test_snooze_covering_window_end_returns_nothing() {
        let f = fixture();
        f.store.insert(&modified_on("API_TEST_USER", "2024-06-03T09:00:00", "2024-07-01T10:00:00")).await.unwrap();
        f.snooze.set_snooze("API_TEST_USER", day("2024-06-10")).await.unwrap();

        let inside = f
            .service
            .list_notifications(&query("2024-06-01", "2024-06-05"), day("2024-06-04"))
            .await
            .unwrap();
        assert!(inside.is_empty());

        let beyond = f
            .service
            .list_notifications(&query("2024-06-01", "2024-06-15"), day("2024-06-04"))
            .await
            .unwrap();
        assert_eq!(beyond.len(), 1);
    }
}
