//! Reconciliation sweeper.
//!
//! Each cycle takes one snapshot of every session in a status that can
//! advance without the user, then applies exactly one transition to each.
//! Overlapping cycles are skipped, not queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

use super::models::{Session, SessionStatus};
use super::orchestrator::{SessionOrchestrator, Step, log_transition_error};

/// Per-cycle counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Sessions in the snapshot.
    pub examined: usize,
    pub advanced: usize,
    /// Preconditions held but the wager was not ready.
    pub waiting: usize,
    /// Lost a race with another transition.
    pub skipped: usize,
    pub failed: usize,
}

/// Clears the running flag when a cycle ends, including on panic.
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Sweeper {
    orchestrator: SessionOrchestrator,
    interval: Duration,
    running: AtomicBool,
}

impl Sweeper {
    pub fn new(orchestrator: SessionOrchestrator, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
            running: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one cycle. `None` if a cycle is already in progress.
    pub async fn run_cycle(&self) -> Option<SweepReport> {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::debug!("sweep already in progress, skipping");
            return None;
        }
        let _guard = CycleGuard(&self.running);

        let mut report = SweepReport::default();
        let snapshot = self.snapshot(&mut report).await;
        report.examined = snapshot.len();

        for session in snapshot {
            match self.orchestrator.apply(&session.id, session.status).await {
                Ok(Step::Advanced(_)) => report.advanced += 1,
                Ok(Step::Waiting(_)) => report.waiting += 1,
                Err(e) => {
                    log_transition_error(&session.id, &e);
                    if e.is_benign() {
                        report.skipped += 1;
                    } else {
                        report.failed += 1;
                    }
                }
            }
        }

        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                advanced = report.advanced,
                waiting = report.waiting,
                skipped = report.skipped,
                failed = report.failed,
                "sweep complete"
            );
        }
        Some(report)
    }

    async fn snapshot(&self, report: &mut SweepReport) -> Vec<Session> {
        let mut sessions = Vec::new();
        for status in SessionStatus::SWEEPABLE {
            match self.orchestrator.sessions_with_status(status).await {
                Ok(found) => sessions.extend(found),
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(status = %status, error = %e, "failed to list sessions for sweep");
                }
            }
        }
        sessions
    }

    /// Sweep every `interval` until `shutdown` flips to true or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tracing::info!(interval = ?self.interval, "sweeper started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("sweeper stopped");
    }
}
