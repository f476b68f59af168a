use anyhow::{bail, Context, Result};
use chrono::{Local, NaiveDate, Timelike};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::csr_client::ChangeSource;
use crate::error::StoreError;
use crate::lock::{LeaseProvider, LockConfiguration, MutualExclusionScheduler};
use crate::materialize::{MaterializeReport, NotificationMaterializer, NotificationSink};
use crate::metrics;
use crate::poller::{RegionPoller, RegionsReport};
use crate::retention::tidy_notifications;
use crate::store::{NotificationStore, SnoozePreferenceStore};

/// Inclusive range of local hours in which polling runs, e.g. `6-21`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveHours {
    pub first: u32,
    pub last: u32,
}

impl ActiveHours {
    pub const ALL_DAY: ActiveHours = ActiveHours { first: 0, last: 23 };

    pub fn parse(value: &str) -> Result<Self> {
        let (first, last) = value
            .split_once('-')
            .with_context(|| format!("expected an hour range like 6-21, got '{}'", value))?;
        let first: u32 = first.trim().parse().context("invalid first hour")?;
        let last: u32 = last.trim().parse().context("invalid last hour")?;
        if first > last || last > 23 {
            bail!("invalid hour range '{}'", value);
        }
        Ok(Self { first, last })
    }

    pub fn contains(&self, hour: u32) -> bool {
        (self.first..=self.last).contains(&hour)
    }
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub regions: RegionsReport,
    pub materialized: Option<MaterializeReport>,
}

/// One locked polling cycle: every region, then the materialization pass.
pub struct PollCycle<C, S, P, K, L> {
    poller: RegionPoller<C, S>,
    materializer: NotificationMaterializer<S, P, K>,
    scheduler: MutualExclusionScheduler<L>,
    lock: LockConfiguration,
    regions: Vec<u32>,
}

impl<C, S, P, K, L> PollCycle<C, S, P, K, L>
where
    C: ChangeSource + Sync,
    S: NotificationStore + Sync,
    P: SnoozePreferenceStore + Sync,
    K: NotificationSink + Sync,
    L: LeaseProvider + Sync,
{
    pub fn new(
        poller: RegionPoller<C, S>,
        materializer: NotificationMaterializer<S, P, K>,
        scheduler: MutualExclusionScheduler<L>,
        lock: LockConfiguration,
        regions: Vec<u32>,
    ) -> Self {
        Self {
            poller,
            materializer,
            scheduler,
            lock,
            regions,
        }
    }

    /// `Ok(None)` when another instance holds the poll lock.
    pub async fn run_cycle(&self, today: NaiveDate) -> Result<Option<CycleReport>, StoreError> {
        let report = self
            .scheduler
            .run_locked(&self.lock, move || async move {
                let timer = metrics::POLL_DURATION.start_timer();
                let regions = self.poller.poll_all_regions(&self.regions).await;

                let materialized = match self.materializer.materialize_notifications(today).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        error!(error = %e, "Materializing notifications failed");
                        None
                    }
                };
                timer.observe_duration();

                CycleReport {
                    regions,
                    materialized,
                }
            })
            .await?;

        match &report {
            Some(report) => {
                metrics::POLL_CYCLES_RUN.inc();
                info!(
                    regions = report.regions.outcomes.len(),
                    failed_regions = ?report.regions.failed_regions,
                    "Poll cycle complete"
                );
            }
            None => metrics::POLL_CYCLES_SKIPPED.inc(),
        }
        Ok(report)
    }
}

pub async fn run_poll_loop<C, S, P, K, L>(
    cycle: Arc<PollCycle<C, S, P, K, L>>,
    interval: Duration,
    active_hours: ActiveHours,
    mut shutdown: watch::Receiver<bool>,
) where
    C: ChangeSource + Sync,
    S: NotificationStore + Sync,
    P: SnoozePreferenceStore + Sync,
    K: NotificationSink + Sync,
    L: LeaseProvider + Sync,
{
    info!(interval_secs = interval.as_secs(), ?active_hours, "Starting poll loop");
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Local::now();
                if !active_hours.contains(now.hour()) {
                    debug!(hour = now.hour(), "Outside active hours, not polling");
                    continue;
                }
                if let Err(e) = cycle.run_cycle(now.date_naive()).await {
                    error!(error = %e, "Poll cycle failed");
                }
            }
            _ = shutdown.changed() => {
                info!("Received shutdown signal, stopping poll loop");
                break;
            }
        }
    }
}

pub async fn run_tidy_loop<S, L>(
    store: Arc<S>,
    scheduler: Arc<MutualExclusionScheduler<L>>,
    interval: Duration,
    retention_months: u32,
    mut shutdown: watch::Receiver<bool>,
) where
    S: NotificationStore + Sync,
    L: LeaseProvider + Sync,
{
    info!(interval_secs = interval.as_secs(), retention_months, "Starting tidy loop");
    let lock = LockConfiguration::for_tidy();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let today = Local::now().date_naive();
                let result = scheduler
                    .run_locked(&lock, || tidy_notifications(store.as_ref(), today, retention_months))
                    .await;
                match result {
                    Ok(Some(Err(e))) | Err(e) => error!(error = %e, "Tidying notifications failed"),
                    Ok(Some(Ok(_))) => {}
                    Ok(None) => debug!("Tidy already running elsewhere"),
                }
            }
            _ = shutdown.changed() => {
                info!("Received shutdown signal, stopping tidy loop");
                break;
            }
        }
    }
}
