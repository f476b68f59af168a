use thiserror::Error;

/// Failures talking to the CSR API, for both fetches and acknowledgements.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} responded with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("could not decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A single raw change that cannot become a notification.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MappingError {
    #[error("change {id} has no subject")]
    MissingSubject { id: i64 },

    #[error("change {id} is missing {field}")]
    MissingField { id: i64, field: &'static str },

    #[error("change {id} has unrecognised parent type '{token}'")]
    UnknownParentType { id: i64, token: String },

    #[error("change {id} has unrecognised action type '{token}'")]
    UnknownActionType { id: i64, token: String },
}

impl MappingError {
    pub fn raw_id(&self) -> i64 {
        match self {
            Self::MissingSubject { id }
            | Self::MissingField { id, .. }
            | Self::UnknownParentType { id, .. }
            | Self::UnknownActionType { id, .. } => *id,
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    // Uniqueness violation: another writer stored the same change first
    #[error("notification already exists")]
    Conflict,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid stored value: {0}")]
    Corrupt(String),
}

/// Aborts the current tick for one region; other regions carry on.
#[derive(Debug, Error)]
pub enum PollError {
    #[error("fetching changes for region {region} failed: {source}")]
    Fetch {
        region: u32,
        #[source]
        source: SourceError,
    },

    #[error("storing changes for region {region} failed: {source}")]
    Store {
        region: u32,
        #[source]
        source: StoreError,
    },
}
