//! Periodic driver for [`Monitor::tick`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::{Monitor, TickReport};

/// Runs the monitor on a fixed period until told to stop.
///
/// The first tick runs immediately. A tick that overruns the period delays the
/// next one instead of triggering a burst. Shutdown is observed between ticks;
/// a tick in progress always completes.
#[derive(Debug)]
pub struct Scheduler {
    monitor: Arc<Monitor>,
    period: Duration,
}

impl Scheduler {
    /// Creates a scheduler using the monitor's configured poll interval.
    pub fn new(monitor: Arc<Monitor>) -> Self {
        let period = monitor.config().poll_interval();
        Self { monitor, period }
    }

    /// Overrides the tick period.
    pub fn with_period(mut self, period: Duration) -> Self {
        self.period = period;
        self
    }

    /// Ticks until `shutdown` resolves, calling `after_tick` with each report.
    ///
    /// Returns the number of completed ticks.
    pub async fn run_until<F, H>(&self, shutdown: F, mut after_tick: H) -> u64
    where
        F: Future<Output = ()>,
        H: FnMut(&TickReport),
    {
        let mut interval = tokio::time::interval(self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(period = ?self.period, "Scheduler started");
        let mut ticks = 0;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                _ = interval.tick() => {}
            }
            let report = self.monitor.tick().await;
            ticks += 1;
            after_tick(&report);
        }
        info!(ticks, "Scheduler stopped");
        ticks
    }
}
