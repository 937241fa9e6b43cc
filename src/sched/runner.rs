//! Background evaluation loop

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};

use super::engine::{CycleReport, Scheduler};
use super::error::CycleError;

/// Shortest interval the loop will run at
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// A pass that ended without publishing anything
#[derive(Debug, Clone)]
pub struct CycleFailure {
    pub at: DateTime<Utc>,
    pub error: CycleError,
}

/// Runs passes on an interval and publishes the latest successful report
pub struct Runner {
    scheduler: Arc<Scheduler>,
    latest: RwLock<Option<Arc<CycleReport>>>,
    last_failure: RwLock<Option<CycleFailure>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Runner {
    pub fn new(scheduler: Arc<Scheduler>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            scheduler,
            latest: RwLock::new(None),
            last_failure: RwLock::new(None),
            shutdown_tx,
        }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Start the background loop. The first pass runs immediately. A zero
    /// interval falls back to [`MIN_INTERVAL`].
    pub fn start(self: Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let shutdown_rx = self.shutdown_tx.subscribe();
        let every = if every.is_zero() {
            tracing::warn!(fallback = ?MIN_INTERVAL, "Zero runner interval");
            MIN_INTERVAL
        } else {
            every
        };

        tokio::spawn(async move {
            tracing::info!(interval = ?every, "Alert runner started");
            let mut ticker = time::interval(every);
            // A pass that overruns pushes the schedule back instead of bursting
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let _ = self.run_pass().await;
                    }
                    _ = stopped(shutdown_rx.clone()) => break,
                }
            }

            tracing::info!("Alert runner stopped");
        })
    }

    /// Stop the loop and cancel any pass in flight
    pub fn stop(&self) {
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Run one pass now, outside the schedule. Waits for a pass already in
    /// progress to finish first.
    pub async fn run_once(&self) -> Result<Arc<CycleReport>, CycleError> {
        self.run_pass().await
    }

    /// Latest successfully completed pass
    pub fn latest(&self) -> Option<Arc<CycleReport>> {
        self.latest.read().clone()
    }

    /// Most recent pass that failed as a whole
    pub fn last_failure(&self) -> Option<CycleFailure> {
        self.last_failure.read().clone()
    }

    async fn run_pass(&self) -> Result<Arc<CycleReport>, CycleError> {
        let shutdown = stopped(self.shutdown_tx.subscribe());

        match self.scheduler.run_cycle_until(shutdown).await {
            Ok(report) => {
                let report = Arc::new(report);
                *self.latest.write() = Some(Arc::clone(&report));
                Ok(report)
            }
            Err(error) => {
                tracing::error!(error = %error, "Pass failed, keeping previous state");
                *self.last_failure.write() = Some(CycleFailure {
                    at: Utc::now(),
                    error: error.clone(),
                });
                Err(error)
            }
        }
    }
}

/// Resolves once shutdown has been requested
async fn stopped(mut rx: watch::Receiver<bool>) {
    loop {
        let stop = *rx.borrow_and_update();
        if stop || rx.changed().await.is_err() {
            return;
        }
    }
}
