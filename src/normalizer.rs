use crate::error::MappingError;
use crate::models::{ActionType, Notification, ParentType, RawChangeEvent};

// CSR marks details it re-sends without modification with this token
const UNCHANGED_TOKEN: &str = "UNCHANGED";

// Unchanged details carry nothing to notify about; they are dropped, not rejected
pub fn is_unchanged(raw: &RawChangeEvent) -> bool {
    raw.action_type
        .as_deref()
        .is_some_and(|token| token.trim().eq_ignore_ascii_case(UNCHANGED_TOKEN))
}

/// Maps a raw CSR change onto an unsaved, unprocessed `Notification`.
///
/// The subject is copied verbatim; case folding only happens at query time.
pub fn normalize(raw: &RawChangeEvent) -> Result<Notification, MappingError> {
    let id = raw.id;

    let quantum_id = raw
        .quantum_id
        .as_ref()
        .filter(|quantum_id| !quantum_id.trim().is_empty())
        .ok_or(MappingError::MissingSubject { id })?
        .clone();

    let shift_type = raw.shift_type.as_deref().ok_or(MappingError::MissingField {
        id,
        field: "shiftType",
    })?;
    let parent_type =
        ParentType::from_token(shift_type).ok_or_else(|| MappingError::UnknownParentType {
            id,
            token: shift_type.to_string(),
        })?;

    let action_token = raw.action_type.as_deref().ok_or(MappingError::MissingField {
        id,
        field: "actionType",
    })?;
    let action_type =
        ActionType::from_token(action_token).ok_or_else(|| MappingError::UnknownActionType {
            id,
            token: action_token.to_string(),
        })?;

    let shift_modified = raw.shift_modified.ok_or(MappingError::MissingField {
        id,
        field: "shiftModified",
    })?;
    let detail_start = raw.detail_start.ok_or(MappingError::MissingField {
        id,
        field: "detailStart",
    })?;
    let detail_end = raw.detail_end.ok_or(MappingError::MissingField {
        id,
        field: "detailEnd",
    })?;

    let activity = raw
        .activity
        .as_ref()
        .filter(|activity| !activity.trim().is_empty())
        .cloned();

    Ok(Notification {
        id: None,
        quantum_id,
        shift_modified,
        detail_start,
        detail_end,
        activity,
        parent_type,
        action_type,
        processed: false,
    })
}
