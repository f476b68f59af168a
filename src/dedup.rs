use std::sync::Arc;
use tracing::debug;

use crate::error::StoreError;
use crate::models::Notification;
use crate::store::NotificationStore;

/// Decides whether a normalized change has already been stored.
///
/// A candidate is a duplicate when EITHER composite key matches a stored row:
///
/// - `(subject, detail_start, parent_type, shift_modified)` catches byte-identical
///   redeliveries of the same change;
/// - `(subject, detail_start, parent_type, action_type)` catches CSR resending a
///   change with a refreshed modification timestamp.
///
/// The OR is intentional. It trades some precision (a genuinely new change that
/// reuses `detail_start` and action for the same subject is suppressed) for
/// robustness against upstream redelivery. Do not collapse it to a single key
/// without confirming CSR's delivery guarantees.
pub struct DeduplicationGate<S> {
    store: Arc<S>,
}

impl<S> DeduplicationGate<S>
where
    S: NotificationStore + Sync,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub async fn exists(&self, candidate: &Notification) -> Result<bool, StoreError> {
        let same_change = self
            .store
            .count_by_detail_start_key(
                &candidate.quantum_id,
                candidate.detail_start,
                candidate.parent_type,
                candidate.shift_modified,
            )
            .await?;
        if same_change > 0 {
            debug!(
                quantum_id = %candidate.quantum_id,
                shift_modified = %candidate.shift_modified,
                "Change already recorded"
            );
            return Ok(true);
        }

        let same_action = self
            .store
            .count_by_action_key(
                &candidate.quantum_id,
                candidate.detail_start,
                candidate.parent_type,
                candidate.action_type,
            )
            .await?;
        if same_action > 0 {
            debug!(
                quantum_id = %candidate.quantum_id,
                action_type = candidate.action_type.as_str(),
                "Same action already recorded for this detail"
            );
            return Ok(true);
        }

        Ok(false)
    }
}
