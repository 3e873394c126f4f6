//! Stop coordination for in-flight iterations
//!
//! Stopping escalates: `Draining` stops new iterations and lets in-flight
//! ones finish; if they are still running after the grace period the signal
//! moves to `Cancelled` and every tracked task is expected to give up.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Stop signal with escalating urgency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StopSignal {
    Running,
    /// No new iterations; current ones finish
    Draining,
    /// Grace period over; abandon in-flight work
    Cancelled,
}

impl std::fmt::Display for StopSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopSignal::Running => write!(f, "running"),
            StopSignal::Draining => write!(f, "draining"),
            StopSignal::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Result of a drain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every tracked task finished inside the grace period
    Drained,
    /// Grace period elapsed with tasks still running
    Cancelled { remaining: usize },
}

/// Tracks in-flight work and broadcasts stop signals
#[derive(Clone)]
pub struct DrainCoordinator {
    sender: Arc<watch::Sender<StopSignal>>,
    in_flight: Arc<AtomicUsize>,
}

impl DrainCoordinator {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(StopSignal::Running);
        Self {
            sender: Arc::new(sender),
            in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<StopSignal> {
        self.sender.subscribe()
    }

    pub fn signal(&self) -> StopSignal {
        *self.sender.borrow()
    }

    pub fn is_stopping(&self) -> bool {
        self.signal() >= StopSignal::Draining
    }

    /// Register one in-flight task; it is released when the guard drops
    pub fn track(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Stop accepting work without waiting
    pub fn begin_drain(&self) {
        self.escalate(StopSignal::Draining);
    }

    /// Drain for up to `grace`, then cancel whatever is left
    pub async fn drain(&self, grace: Duration) -> DrainOutcome {
        self.begin_drain();
        info!(in_flight = self.in_flight(), grace = ?grace, "Draining in-flight iterations");

        if self.wait_for_tasks(grace).await {
            info!("All in-flight iterations finished");
            return DrainOutcome::Drained;
        }

        let remaining = self.in_flight();
        warn!(remaining, "Grace period elapsed, cancelling in-flight iterations");
        self.escalate(StopSignal::Cancelled);
        DrainOutcome::Cancelled { remaining }
    }

    /// Jump straight to `Cancelled`
    pub fn cancel(&self) {
        self.escalate(StopSignal::Cancelled);
    }

    fn escalate(&self, to: StopSignal) {
        self.sender.send_if_modified(|current| {
            if *current < to {
                *current = to;
                true
            } else {
                false
            }
        });
    }

    async fn wait_for_tasks(&self, timeout: Duration) -> bool {
        let start = tokio::time::Instant::now();

        loop {
            let active = self.in_flight();
            if active == 0 {
                return true;
            }
            if start.elapsed() >= timeout {
                return false;
            }

            let sleep = if active > 10 {
                Duration::from_millis(100)
            } else {
                Duration::from_millis(50)
            };
            tokio::time::sleep(sleep.min(timeout.saturating_sub(start.elapsed()))).await;
        }
    }
}

impl Default for DrainCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count on drop
pub struct InFlightGuard {
    in_flight: Arc<AtomicUsize>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolves once `rx` reports `Cancelled`
pub async fn cancelled(rx: &mut watch::Receiver<StopSignal>) {
    if rx.wait_for(|s| *s == StopSignal::Cancelled).await.is_err() {
        // Sender gone: nothing can cancel us any more
        std::future::pending::<()>().await;
    }
}
