//! Periodic scheduling for sync loops.
//!
//! A `PeriodicTicker` fires a loop's action on a fixed period until shutdown.
//! Firings never overlap for the same ticker: the caller awaits each firing
//! before asking for the next tick, and missed ticks are delayed rather than
//! replayed in a burst.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::error::SyncError;

/// Consecutive failures logged at `warn` before escalating to `error`.
const WARN_THRESHOLD: u32 = 3;

/// Wait until shutdown is signalled.
///
/// A dropped sender counts as shutdown.
pub async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Fixed-period scheduler bound to a shutdown signal.
pub struct PeriodicTicker {
    name: &'static str,
    interval: Interval,
    shutdown: watch::Receiver<bool>,
}

impl PeriodicTicker {
    /// Create a ticker. With `run_immediately` the first tick completes at once.
    pub fn new(
        name: &'static str,
        period: Duration,
        run_immediately: bool,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let start = if run_immediately {
            Instant::now()
        } else {
            Instant::now() + period
        };
        let mut interval = tokio::time::interval_at(start, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        Self {
            name,
            interval,
            shutdown,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the next firing. Returns false once shutdown is signalled.
    pub async fn tick(&mut self) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }

        tokio::select! {
            _ = self.interval.tick() => true,
            _ = wait_for_shutdown(&mut self.shutdown) => {
                info!(ticker = self.name, "Periodic loop shutting down");
                false
            }
        }
    }

    /// Drive one firing to completion, abandoning it if shutdown arrives first.
    pub async fn fire<F>(&mut self, firing: F) -> Option<F::Output>
    where
        F: Future,
    {
        tokio::select! {
            out = firing => Some(out),
            _ = wait_for_shutdown(&mut self.shutdown) => None,
        }
    }
}

/// Run `firing` on a fixed period until shutdown, logging failures.
///
/// Each firing is awaited before the next tick. An error only ends that
/// firing; the next tick starts again from scratch.
pub async fn run_periodic<F, Fut>(
    name: &'static str,
    period: Duration,
    run_immediately: bool,
    shutdown: watch::Receiver<bool>,
    mut firing: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), SyncError>>,
{
    info!(
        loop_name = name,
        period_ms = period.as_millis() as u64,
        run_immediately,
        "Starting periodic loop"
    );

    let mut ticker = PeriodicTicker::new(name, period, run_immediately, shutdown);
    let mut failures = FailureStreak::new(name);

    while ticker.tick().await {
        match ticker.fire(firing()).await {
            Some(result) => failures.record(&result),
            None => break,
        }
    }
}

/// Tracks consecutive firing failures for log escalation.
#[derive(Debug)]
pub struct FailureStreak {
    name: &'static str,
    consecutive: u32,
}

impl FailureStreak {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            consecutive: 0,
        }
    }

    pub fn consecutive(&self) -> u32 {
        self.consecutive
    }

    /// Record the outcome of one firing.
    pub fn record<T>(&mut self, result: &Result<T, SyncError>) {
        match result {
            Ok(_) => self.success(),
            Err(e) => self.failure(e),
        }
    }

    pub fn success(&mut self) {
        if self.consecutive > 0 {
            info!(
                loop_name = self.name,
                failures = self.consecutive,
                "Recovered after failed firings"
            );
        }
        self.consecutive = 0;
    }

    pub fn failure(&mut self, err: &SyncError) {
        self.consecutive += 1;
        if self.consecutive <= WARN_THRESHOLD {
            warn!(
                loop_name = self.name,
                error = %err,
                kind = err.kind(),
                consecutive_failures = self.consecutive,
                "Firing aborted"
            );
        } else {
            error!(
                loop_name = self.name,
                error = %err,
                kind = err.kind(),
                consecutive_failures = self.consecutive,
                "Firing aborted repeatedly"
            );
        }
    }
}
