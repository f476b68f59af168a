use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{debug, error};

use crate::error::StoreError;
use crate::models::SnoozePreference;
use crate::store::SnoozePreferenceStore;

/// Decides whether a subject's notifications are muted for a window.
///
/// Every check reads the preference row. Other instances may have changed
/// it, so nothing is remembered between calls.
pub struct SnoozeGate<P> {
    store: Arc<P>,
}

impl<P> SnoozeGate<P>
where
    P: SnoozePreferenceStore + Sync,
{
    pub fn new(store: Arc<P>) -> Self {
        Self { store }
    }

    /// True when the stored preference covers the whole window, i.e.
    /// `snooze_until >= window_end`. No preference means not snoozed.
    pub async fn is_snoozed(&self, quantum_id: &str, window_end: NaiveDate) -> bool {
        match self.snooze_until(quantum_id).await {
            Ok(Some(snooze_until)) => snooze_until >= window_end,
            Ok(None) => false,
            Err(e) => {
                // The read path never fails on a preference lookup
                error!(quantum_id = %quantum_id, error = %e, "Failed to load snooze preference");
                false
            }
        }
    }

    // The snooze date, only while it is still in force
    pub async fn active_snooze(
        &self,
        quantum_id: &str,
        today: NaiveDate,
    ) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self
            .snooze_until(quantum_id)
            .await?
            .filter(|snooze_until| *snooze_until >= today))
    }

    pub async fn set_snooze(
        &self,
        quantum_id: &str,
        snooze_until: NaiveDate,
    ) -> Result<(), StoreError> {
        self.store
            .upsert(&SnoozePreference {
                quantum_id: quantum_id.to_string(),
                snooze_until,
            })
            .await?;

        debug!(quantum_id = %quantum_id, %snooze_until, "Snooze preference updated");
        Ok(())
    }

    async fn snooze_until(&self, quantum_id: &str) -> Result<Option<NaiveDate>, StoreError> {
        Ok(self
            .store
            .find_by_subject(quantum_id)
            .await?
            .map(|preference| preference.snooze_until))
    }
}
