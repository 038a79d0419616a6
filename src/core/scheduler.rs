//! Background polling loop.
//!
//! Each cycle polls the release source, skips locators already in the
//! state store, runs new items through the orchestrator in feed order and
//! records each delivered locator as soon as it succeeds. The loop sleeps
//! `poll_interval` after a good cycle and `retry_interval` after a failed
//! one. The stop token is checked between items and interrupts sleeps.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::adapters::ReleaseSource;

use super::orchestrator::Orchestrator;
use super::state_store::{StateStore, StateStoreError};

/// Loop timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub poll_interval: Duration,
    pub retry_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(3600),
            retry_interval: Duration::from_secs(600),
        }
    }
}

/// Counts for one cycle
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    /// Items returned by the source
    pub discovered: usize,
    /// Already processed
    pub skipped: usize,
    pub delivered: usize,
    pub failed: usize,
}

impl CycleReport {
    fn new(discovered: usize) -> Self {
        Self {
            started_at: Utc::now(),
            discovered,
            skipped: 0,
            delivered: 0,
            failed: 0,
        }
    }
}

/// Owns the dedup state and drives cycles
pub struct Scheduler {
    source: Arc<dyn ReleaseSource>,
    store: StateStore,
    orchestrator: Orchestrator,
    config: SchedulerConfig,
    /// Cancels in-flight item work
    abort: CancellationToken,
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn ReleaseSource>,
        store: StateStore,
        orchestrator: Orchestrator,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            source,
            store,
            orchestrator,
            config,
            abort: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// Token that aborts the item currently being fetched or encoded.
    ///
    /// Separate from the stop signal, which lets the current item finish.
    pub fn abort_token(&self) -> CancellationToken {
        self.abort.clone()
    }

    /// One poll-and-process pass.
    ///
    /// Per-item failures are logged and counted; only a failure to record
    /// a delivered locator escapes.
    #[instrument(skip_all, fields(source = self.source.name()))]
    pub async fn run_cycle(&mut self, stop: &CancellationToken) -> Result<CycleReport, StateStoreError> {
        let items = self.source.poll().await;
        let mut report = CycleReport::new(items.len());
        info!(discovered = items.len(), "Polled release source");

        for item in items {
            if stop.is_cancelled() {
                info!("Stop requested, ending cycle early");
                break;
            }

            if self.store.contains(&item.locator) {
                report.skipped += 1;
                continue;
            }

            match self.orchestrator.process(&item, &self.abort).await {
                Ok(_) => {
                    self.store.insert_and_commit(&item.locator)?;
                    report.delivered += 1;
                }
                Err(e) => {
                    warn!(title = %item.title, error = %e, "Release not delivered, will retry next cycle");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// A single cycle with no stop signal
    pub async fn run_once(&mut self) -> Result<CycleReport, StateStoreError> {
        self.run_cycle(&CancellationToken::new()).await
    }

    /// Run cycles until `stop` is cancelled
    pub async fn run(&mut self, stop: CancellationToken) {
        info!(
            poll_secs = self.config.poll_interval.as_secs(),
            retry_secs = self.config.retry_interval.as_secs(),
            processed = self.store.len(),
            "Scheduler started"
        );

        while !stop.is_cancelled() {
            let outcome = AssertUnwindSafe(self.run_cycle(&stop)).catch_unwind().await;

            let wait = match outcome {
                Ok(Ok(report)) => {
                    info!(
                        discovered = report.discovered,
                        skipped = report.skipped,
                        delivered = report.delivered,
                        failed = report.failed,
                        "Cycle complete"
                    );
                    self.config.poll_interval
                }
                Ok(Err(e)) => {
                    error!(error = %e, "Cycle failed");
                    self.config.retry_interval
                }
                Err(_) => {
                    error!("Cycle panicked");
                    self.config.retry_interval
                }
            };

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }

        info!("Scheduler stopped");
    }
}
