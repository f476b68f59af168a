// csr_client.rs
use anyhow::{Context, Result};
use reqwest::{Client as HttpClient, RequestBuilder, Response};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::SourceError;
use crate::models::RawChangeEvent;

// Source of shift changes, one independent endpoint per region
#[trait_variant::make(ChangeSource: Send)]
pub trait LocalChangeSource {
    async fn fetch_changes(&self, region: u32) -> Result<Vec<RawChangeEvent>, SourceError>;

    /// Tells the source these ids have been handled so they are not redelivered.
    async fn acknowledge_processed(&self, region: u32, ids: &[i64]) -> Result<(), SourceError>;
}

// First attempt plus a single retry
const MAX_ATTEMPTS: u8 = 2;

#[derive(Clone)]
pub struct CsrClient {
    http_client: HttpClient,
    base_url: String,
    api_token: Option<String>,
    retry_backoff: Duration,
}

impl CsrClient {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
        retry_backoff: Duration,
    ) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create CSR HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
            retry_backoff,
        })
    }

    fn updates_url(&self, region: u32) -> String {
        format!("{}/updates/{}", self.base_url, region)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<Response, SourceError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 0;
        let mut backoff = self.retry_backoff;

        loop {
            attempt += 1;
            let error = match self.authorize(build()).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => SourceError::Status {
                    url: url.to_string(),
                    status: response.status(),
                },
                Err(e) if e.is_timeout() => SourceError::Timeout {
                    url: url.to_string(),
                },
                Err(e) => SourceError::Transport {
                    url: url.to_string(),
                    source: e,
                },
            };

            if attempt >= MAX_ATTEMPTS {
                return Err(error);
            }

            warn!(url = %url, attempt, error = %error, "CSR request failed, retrying");
            tokio::time::sleep(backoff).await;
            backoff *= 2;
        }
    }
}

impl ChangeSource for CsrClient {
    async fn fetch_changes(&self, region: u32) -> Result<Vec<RawChangeEvent>, SourceError> {
        let url = self.updates_url(region);
        debug!(region, "Fetching modified details");

        let response = self
            .send_with_retry(&url, || self.http_client.get(&url))
            .await?;
        let body = response.bytes().await.map_err(|source| SourceError::Transport {
            url: url.clone(),
            source,
        })?;

        // An empty body means nothing has changed
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        let changes: Vec<RawChangeEvent> =
            serde_json::from_slice(&body).map_err(|source| SourceError::Decode {
                url: url.clone(),
                source,
            })?;

        info!(region, count = changes.len(), "Found modified details");
        Ok(changes)
    }

    async fn acknowledge_processed(&self, region: u32, ids: &[i64]) -> Result<(), SourceError> {
        let url = self.updates_url(region);

        self.send_with_retry(&url, || self.http_client.put(&url).json(ids))
            .await?;

        debug!(region, count = ids.len(), "Acknowledged processed details");
        Ok(())
    }
}
