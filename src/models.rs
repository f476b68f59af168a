use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeSet;

// Whether a change touched a regular shift or an overtime shift
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParentType {
    Shift,
    Overtime,
}

impl ParentType {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "SHIFT" => Some(Self::Shift),
            "OVERTIME" => Some(Self::Overtime),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Shift => "SHIFT",
            Self::Overtime => "OVERTIME",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionType {
    Add,
    Edit,
    Delete,
}

impl ActionType {
    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim().to_ascii_uppercase().as_str() {
            "ADD" => Some(Self::Add),
            "EDIT" => Some(Self::Edit),
            "DELETE" => Some(Self::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "ADD",
            Self::Edit => "EDIT",
            Self::Delete => "DELETE",
        }
    }

    // Phrase used in user-facing copy: "has <description>"
    pub fn description(&self) -> &'static str {
        match self {
            Self::Add => "been added",
            Self::Edit => "changed",
            Self::Delete => "been removed",
        }
    }
}

/// A modified shift or detail as delivered by CSR, before any validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawChangeEvent {
    #[serde(deserialize_with = "deserialize_external_id")]
    pub id: i64,
    pub quantum_id: Option<String>,
    pub shift_modified: Option<NaiveDateTime>,
    pub shift_type: Option<String>,
    pub detail_start: Option<NaiveDateTime>,
    pub detail_end: Option<NaiveDateTime>,
    pub activity: Option<String>,
    pub action_type: Option<String>,
}

// CSR sends ids either as numbers or as numeric strings
#[derive(Deserialize)]
#[serde(untagged)]
enum ExternalId {
    Number(i64),
    Text(String),
}

fn deserialize_external_id<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    match ExternalId::deserialize(deserializer)? {
        ExternalId::Number(id) => Ok(id),
        ExternalId::Text(text) => text.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// Canonical notification row. `id` is `None` until the row has been stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Option<i64>,
    pub quantum_id: String,
    pub shift_modified: NaiveDateTime,
    pub detail_start: NaiveDateTime,
    pub detail_end: NaiveDateTime,
    pub activity: Option<String>,
    pub parent_type: ParentType,
    pub action_type: ActionType,
    pub processed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnoozePreference {
    pub quantum_id: String,
    pub snooze_until: NaiveDate,
}

// What the REST layer hands back for each notification
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationView {
    pub description: String,
    pub shift_modified: NaiveDateTime,
    pub processed: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub region: u32,
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub rejected: usize,
    pub dropped: usize,
    pub acknowledged_ids: BTreeSet<i64>,
}

impl PollOutcome {
    pub fn new(region: u32, fetched: usize) -> Self {
        Self {
            region,
            fetched,
            ..Default::default()
        }
    }
}
