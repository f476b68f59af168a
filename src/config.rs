use anyhow::{bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::scheduler::ActiveHours;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub csr_api_url: String,
    pub csr_api_token: Option<String>,
    pub csr_regions: Vec<u32>,
    pub csr_timeout: Duration,
    pub csr_retry_backoff: Duration,
    pub csr_region_concurrency: usize,
    pub poll_interval: Duration,
    pub poll_active_hours: ActiveHours,
    pub poll_lock_at_most: Duration,
    pub tidy_interval: Duration,
    pub retention_months: u32,
    pub default_window_months: u32,
    pub api_bind_address: String,
    pub lock_owner: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            csr_api_url: env::var("CSR_API_URL").context("CSR_API_URL must be set")?,
            csr_api_token: env::var("CSR_API_TOKEN").ok().filter(|t| !t.is_empty()),
            csr_regions: parse_regions(
                &env::var("CSR_REGIONS").unwrap_or_else(|_| "1,2,3,4,5,6".to_string()),
            )?,
            csr_timeout: Duration::from_secs(parse_var("CSR_TIMEOUT_SECS", 30)?),
            csr_retry_backoff: Duration::from_millis(parse_var("CSR_RETRY_BACKOFF_MS", 500)?),
            csr_region_concurrency: parse_var("CSR_REGION_CONCURRENCY", 1)?,
            poll_interval: Duration::from_secs(60 * parse_var::<u64>("POLL_INTERVAL_MINUTES", 10)?),
            poll_active_hours: ActiveHours::parse(
                &env::var("POLL_ACTIVE_HOURS").unwrap_or_else(|_| "6-21".to_string()),
            )
            .context("POLL_ACTIVE_HOURS")?,
            poll_lock_at_most: Duration::from_secs(
                60 * parse_var::<u64>("POLL_LOCK_AT_MOST_MINUTES", 60)?,
            ),
            tidy_interval: Duration::from_secs(3600 * parse_var::<u64>("TIDY_INTERVAL_HOURS", 24)?),
            retention_months: parse_var("RETENTION_MONTHS", 3)?,
            default_window_months: parse_var("DEFAULT_WINDOW_MONTHS", 3)?,
            api_bind_address: env::var("API_BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            lock_owner: env::var("LOCK_OWNER")
                .unwrap_or_else(|_| format!("instance-{}", uuid::Uuid::new_v4())),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval < Duration::from_secs(120) {
            bail!("POLL_INTERVAL_MINUTES must be at least 2");
        }
        // The lease must outlive its minimum hold
        if self.poll_lock_at_most <= self.poll_interval - Duration::from_secs(60) {
            bail!("POLL_LOCK_AT_MOST_MINUTES must exceed POLL_INTERVAL_MINUTES - 1");
        }
        if self.csr_region_concurrency == 0 {
            bail!("CSR_REGION_CONCURRENCY must be at least 1");
        }
        if self.tidy_interval.is_zero() {
            bail!("TIDY_INTERVAL_HOURS must be at least 1");
        }
        Ok(())
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value '{}'", name, value)),
        Err(_) => Ok(default),
    }
}

// Ascending and de-duplicated so polling order is reproducible
fn parse_regions(value: &str) -> Result<Vec<u32>> {
    let mut regions = value
        .split(',')
        .map(str::trim)
        .filter(|region| !region.is_empty())
        .map(|region| {
            region
                .parse::<u32>()
                .with_context(|| format!("invalid region '{}' in CSR_REGIONS", region))
        })
        .collect::<Result<Vec<_>>>()?;

    regions.sort_unstable();
    regions.dedup();
    if regions.is_empty() {
        bail!("CSR_REGIONS must list at least one region");
    }
    Ok(regions)
}
