//! Shared state of one run

use crate::plan::TestPlan;
use crate::report::IterationCounts;
use loadrig_core::metrics::{BACKPRESSURE_DROPS, WAITING_SUFFIX};
use loadrig_core::{MetricSample, MetricsSink, Outcome, PhaseDefinition};
use loadrig_http::SessionClient;
use loadrig_resilience::{AbortPolicy, DrainCoordinator};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Everything a virtual user needs, shared behind an `Arc`
///
/// The sink and the abort policy are the only state written concurrently.
pub struct RunContext {
    pub plan: Arc<TestPlan>,
    pub client: Arc<dyn SessionClient>,
    pub sink: MetricsSink,
    pub abort: AbortPolicy,
    pub drain: DrainCoordinator,
    origin: Instant,
    counters: RunCounters,
}

#[derive(Default)]
struct RunCounters {
    started: AtomicU64,
    login_failed: AtomicU64,
    scenario_executed: AtomicU64,
    halted_by_critical_step: AtomicU64,
    cancelled: AtomicU64,
    backpressure_drops: AtomicU64,
    active_vus: AtomicU32,
    vus_peak: AtomicU32,
    busy_slots: AtomicU32,
    busy_slots_peak: AtomicU32,
}

impl RunContext {
    pub fn new(
        plan: Arc<TestPlan>,
        client: Arc<dyn SessionClient>,
        sink: MetricsSink,
        abort: AbortPolicy,
        drain: DrainCoordinator,
    ) -> Self {
        Self {
            plan,
            client,
            sink,
            abort,
            drain,
            origin: Instant::now(),
            counters: RunCounters::default(),
        }
    }

    /// Instant the run clock started
    pub fn origin(&self) -> Instant {
        self.origin
    }

    pub fn elapsed(&self) -> Duration {
        self.origin.elapsed()
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    pub fn phase_at(&self, elapsed_ms: u64) -> &PhaseDefinition {
        self.plan.clock.current_phase(elapsed_ms)
    }

    /// Record a sample; a rejected sample is logged, never fatal
    pub fn record(&self, sample: MetricSample) {
        if let Err(e) = self.sink.record(sample) {
            warn!(error = %e, "Dropped metric sample");
        }
    }

    /// Record one HTTP call under `key` and feed the abort policy.
    /// `at_ms` is when the call was issued; it picks the phase tag.
    pub fn record_request(
        &self,
        key: &str,
        at_ms: u64,
        latency: Duration,
        waiting: Option<Duration>,
        outcome: Outcome,
    ) {
        let phase = self.phase_at(at_ms).name.clone();
        self.record(MetricSample::request(
            key,
            phase.as_str(),
            millis(latency),
            at_ms,
            outcome,
        ));
        if let Some(waiting) = waiting {
            self.record(MetricSample::distribution(
                format!("{}{}", key, WAITING_SUFFIX),
                phase.as_str(),
                millis(waiting),
                at_ms,
            ));
        }

        let now_ms = self.elapsed_ms();
        self.abort
            .observe(now_ms, outcome.is_critical(), self.phase_at(now_ms));
    }

    /// An arrival-rate start found every slot busy
    pub fn record_drop(&self) {
        let at_ms = self.elapsed_ms();
        let drops = self.counters.backpressure_drops.fetch_add(1, Ordering::Relaxed) + 1;
        let phase = self.phase_at(at_ms).name.clone();
        if drops == 1 {
            warn!(phase = %phase, "All virtual users busy, dropping iteration starts");
        } else {
            debug!(phase = %phase, drops, "Iteration start dropped");
        }
        self.record(MetricSample::counter(BACKPRESSURE_DROPS, phase, 1, at_ms));
    }

    /// Mark a virtual user live until the guard drops
    pub fn vu_active(self: &Arc<Self>) -> ActiveVu {
        let active = self.counters.active_vus.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.vus_peak.fetch_max(active, Ordering::SeqCst);
        ActiveVu {
            ctx: Arc::clone(self),
        }
    }

    pub fn active_vus(&self) -> u32 {
        self.counters.active_vus.load(Ordering::SeqCst)
    }

    /// Mark an arrival-rate pool slot busy until the guard drops; the peak
    /// counts slots across every pool of the run
    pub fn slot_busy(self: &Arc<Self>) -> BusySlot {
        let busy = self.counters.busy_slots.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.busy_slots_peak.fetch_max(busy, Ordering::SeqCst);
        BusySlot {
            ctx: Arc::clone(self),
        }
    }

    pub(crate) fn iteration_started(&self) {
        self.counters.started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn login_failed(&self) {
        self.counters.login_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn scenario_executed(&self, halted: bool) {
        self.counters.scenario_executed.fetch_add(1, Ordering::Relaxed);
        if halted {
            self.counters
                .halted_by_critical_step
                .fetch_add(1, Ordering::Relaxed);
        }
    }

    pub(crate) fn iteration_cancelled(&self) {
        self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn iteration_counts(&self) -> IterationCounts {
        IterationCounts {
            started: self.counters.started.load(Ordering::SeqCst),
            login_failed: self.counters.login_failed.load(Ordering::SeqCst),
            scenario_executed: self.counters.scenario_executed.load(Ordering::SeqCst),
            halted_by_critical_step: self.counters.halted_by_critical_step.load(Ordering::SeqCst),
            cancelled: self.counters.cancelled.load(Ordering::SeqCst),
        }
    }

    pub fn backpressure_drops(&self) -> u64 {
        self.counters.backpressure_drops.load(Ordering::SeqCst)
    }

    pub fn vus_peak(&self) -> u32 {
        self.counters.vus_peak.load(Ordering::SeqCst)
    }

    pub fn busy_slots_peak(&self) -> u32 {
        self.counters.busy_slots_peak.load(Ordering::SeqCst)
    }
}

/// Decrements the live VU count on drop
pub struct ActiveVu {
    ctx: Arc<RunContext>,
}

impl Drop for ActiveVu {
    fn drop(&mut self) {
        self.ctx.counters.active_vus.fetch_sub(1, Ordering::SeqCst);
    }
}

pub struct BusySlot {
    ctx: Arc<RunContext>,
}

impl Drop for BusySlot {
    fn drop(&mut self) {
        self.ctx.counters.busy_slots.fetch_sub(1, Ordering::SeqCst);
    }
}

fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
