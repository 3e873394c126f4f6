//! Turns each executor's load shape into running virtual users
//!
//! Executors start together and each waits out its own start delay. Closed
//! shapes (`ConstantVus`, `RampingVus`) keep a set of looping users alive
//! and iteration-count shapes loop until their budget is spent. The
//! arrival-rate shape starts iterations on a schedule and runs each on a
//! slot from a bounded pool; a start that finds the pool empty is dropped
//! and counted, never queued. Once an executor's schedule ends its users
//! start no new iteration.

use crate::context::RunContext;
use crate::iteration::{run_tracked, IterationOutcome};
use crate::shape::{ArrivalRate, Curve, LoadShape};
use loadrig_resilience::StopSignal;
use std::future::{pending, Future};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::{interval, sleep, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// How often a ramping shape re-reads its target
const RAMP_TICK: Duration = Duration::from_millis(100);

/// Drive every executor until its schedule ends or the run starts stopping.
///
/// Returns, per executor, the virtual-user tasks that may still be running;
/// the caller drains and joins them.
pub async fn schedule(ctx: Arc<RunContext>) -> Vec<JoinSet<()>> {
    let mut executors = JoinSet::new();
    for index in 0..ctx.plan.executors.len() {
        executors.spawn(run_executor(Arc::clone(&ctx), index));
    }

    let mut remaining = Vec::with_capacity(ctx.plan.executors.len());
    while let Some(result) = executors.join_next().await {
        match result {
            Ok(tasks) => remaining.push(tasks),
            Err(e) => warn!(error = %e, "Executor task failed"),
        }
    }
    debug!(
        tasks = remaining.iter().map(JoinSet::len).sum::<usize>(),
        "Every executor finished its schedule"
    );
    remaining
}

async fn run_executor(ctx: Arc<RunContext>, executor: usize) -> JoinSet<()> {
    let mut tasks = JoinSet::new();
    let mut stop = ctx.drain.subscribe();
    let current = &ctx.plan.executors[executor];

    if !current.start_delay.is_zero() {
        debug!(executor = %current.name, delay = ?current.start_delay, "Waiting before first iteration");
        if !sleep_or_stop(&mut stop, current.start_delay).await {
            return tasks;
        }
    }

    info!(
        executor = %current.name,
        shape = current.shape.kind(),
        duration = ?current.shape.duration(),
        "Starting load"
    );

    let (ended_tx, ended) = watch::channel(false);
    let vu = Vu {
        executor,
        index: 0,
        desired: None,
        graceful_ramp_down: Duration::ZERO,
        budget: Budget::Unlimited,
        ended,
    };

    match current.shape.clone() {
        LoadShape::ConstantVus { vus, duration } => {
            for index in 0..vus {
                tasks.spawn(vu_loop(Arc::clone(&ctx), vu.at(index)));
            }
            sleep_or_stop(&mut stop, duration).await;
        }
        LoadShape::RampingVus {
            curve,
            graceful_ramp_down,
        } => {
            let vu = Vu {
                graceful_ramp_down,
                ..vu
            };
            ramp_vus(&ctx, &vu, &curve, &mut tasks, &mut stop).await
        }
        LoadShape::ArrivalRate(arrival) => {
            start_arrivals(&ctx, executor, &arrival, &mut tasks, &mut stop).await
        }
        LoadShape::PerVuIterations {
            vus,
            iterations,
            max_duration,
        } => {
            let vu = Vu {
                budget: Budget::PerVu(iterations),
                ..vu
            };
            for index in 0..vus {
                tasks.spawn(vu_loop(Arc::clone(&ctx), vu.at(index)));
            }
            run_out(&mut tasks, &mut stop, max_duration).await;
        }
        LoadShape::SharedIterations {
            vus,
            iterations,
            max_duration,
        } => {
            let vu = Vu {
                budget: Budget::Shared(Arc::new(AtomicU32::new(iterations))),
                ..vu
            };
            for index in 0..vus {
                tasks.spawn(vu_loop(Arc::clone(&ctx), vu.at(index)));
            }
            run_out(&mut tasks, &mut stop, max_duration).await;
        }
    }

    ended_tx.send_replace(true);
    debug!(executor = %current.name, tasks = tasks.len(), "Load shape finished");
    tasks
}

async fn ramp_vus(
    ctx: &Arc<RunContext>,
    vu: &Vu,
    curve: &Curve,
    tasks: &mut JoinSet<()>,
    stop: &mut watch::Receiver<StopSignal>,
) {
    let (desired_tx, desired_rx) = watch::channel(0u32);
    let mut slots: Vec<Option<AbortHandle>> = Vec::new();
    let mut tick = interval(RAMP_TICK);
    tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let start = Instant::now();
    let end = start + curve.duration();

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = stopping(stop) => break,
        }
        let now = Instant::now();
        if now >= end {
            break;
        }

        let target = curve.value_at(now - start).round().max(0.0) as u32;
        desired_tx.send_if_modified(|desired| {
            if *desired != target {
                debug!(from = *desired, to = target, "Virtual user target changed");
                *desired = target;
                true
            } else {
                false
            }
        });

        let wanted = target as usize;
        if slots.len() < wanted {
            slots.resize_with(wanted, || None);
        }
        for (index, slot) in slots.iter_mut().enumerate().take(wanted) {
            let alive = slot.as_ref().is_some_and(|h| !h.is_finished());
            if !alive {
                let vu = Vu {
                    desired: Some(desired_rx.clone()),
                    ..vu.at(index as u32)
                };
                *slot = Some(tasks.spawn(vu_loop(Arc::clone(ctx), vu)));
            }
        }

        reap(tasks);
    }
}

async fn start_arrivals(
    ctx: &Arc<RunContext>,
    executor: usize,
    arrival: &ArrivalRate,
    tasks: &mut JoinSet<()>,
    stop: &mut watch::Receiver<StopSignal>,
) {
    let slots = Arc::new(Semaphore::new(arrival.max_vus as usize));
    let start = Instant::now();
    let mut started: u64 = 0;

    while let Some(offset) = arrival.curve.time_for_integral(started as f64) {
        let at = start + offset;
        tokio::select! {
            _ = sleep_until(at) => {}
            _ = stopping(stop) => break,
        }
        started += 1;
        reap(tasks);

        match Arc::clone(&slots).try_acquire_owned() {
            Ok(permit) => {
                let busy = ctx.slot_busy();
                let ctx = Arc::clone(ctx);
                tasks.spawn(async move {
                    let _permit = permit;
                    let _busy = busy;
                    let _active = ctx.vu_active();
                    let mut rng = fastrand::Rng::new();
                    let scenarios = &ctx.plan.executors[executor].scenarios;
                    run_tracked(&ctx, scenarios, &mut rng, pending()).await;
                });
            }
            Err(_) => ctx.record_drop(),
        }
    }

    debug!(started, drops = ctx.backpressure_drops(), "Arrival schedule finished");
}

/// Join users until every one has spent its iterations; gives up at
/// `max_duration` or when the run starts stopping
async fn run_out(
    tasks: &mut JoinSet<()>,
    stop: &mut watch::Receiver<StopSignal>,
    max_duration: Duration,
) {
    let deadline = sleep(max_duration);
    tokio::pin!(deadline);

    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => {
                    debug!("Iterations spent");
                    return;
                }
                Some(Err(e)) if e.is_panic() => warn!(error = %e, "Virtual user task panicked"),
                Some(_) => {}
            },
            _ = &mut deadline => {
                info!(max_duration = ?max_duration, "Iterations did not finish within max duration");
                return;
            }
            _ = stopping(stop) => return,
        }
    }
}

/// How many iterations a looping user may still start
#[derive(Debug, Clone)]
enum Budget {
    Unlimited,
    PerVu(u32),
    Shared(Arc<AtomicU32>),
}

impl Budget {
    /// Take one iteration; false once none are left
    fn claim(&mut self) -> bool {
        match self {
            Budget::Unlimited => true,
            Budget::PerVu(left) => match left.checked_sub(1) {
                Some(rest) => {
                    *left = rest;
                    true
                }
                None => false,
            },
            Budget::Shared(left) => left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok(),
        }
    }

    fn is_spent(&self) -> bool {
        match self {
            Budget::Unlimited => false,
            Budget::PerVu(left) => *left == 0,
            Budget::Shared(left) => left.load(Ordering::SeqCst) == 0,
        }
    }
}

/// One looping virtual user of an executor
#[derive(Debug, Clone)]
struct Vu {
    executor: usize,
    index: u32,
    /// Target user count of a ramping shape
    desired: Option<watch::Receiver<u32>>,
    graceful_ramp_down: Duration,
    budget: Budget,
    /// Turns true once the executor's schedule ends
    ended: watch::Receiver<bool>,
}

impl Vu {
    fn at(&self, index: u32) -> Vu {
        Vu {
            index,
            ..self.clone()
        }
    }
}

/// With a ramping target, the user retires once the target drops to its
/// index or below, and an iteration still running `graceful_ramp_down`
/// after that is cancelled.
async fn vu_loop(ctx: Arc<RunContext>, vu: Vu) {
    let Vu {
        executor,
        index,
        desired,
        graceful_ramp_down,
        mut budget,
        mut ended,
    } = vu;
    let _active = ctx.vu_active();
    let scenarios = &ctx.plan.executors[executor].scenarios;
    let mut stop = ctx.drain.subscribe();
    let mut rng = fastrand::Rng::new();
    debug!(executor, vu = index, "Virtual user started");

    loop {
        if ctx.drain.is_stopping()
            || *ended.borrow()
            || is_retired(desired.as_ref(), index)
            || !budget.claim()
        {
            break;
        }

        let deadline = retirement(desired.clone(), index, graceful_ramp_down);
        let iteration = run_tracked(&ctx, scenarios, &mut rng, deadline).await;
        if iteration.outcome == IterationOutcome::Cancelled {
            break;
        }

        if !iteration.pacing.is_zero()
            && !budget.is_spent()
            && !pause(&mut stop, &mut ended, iteration.pacing).await
        {
            break;
        }
    }

    debug!(executor, vu = index, "Virtual user stopped");
}

fn is_retired(desired: Option<&watch::Receiver<u32>>, index: u32) -> bool {
    desired.is_some_and(|rx| *rx.borrow() <= index)
}

/// Resolves `grace` after the user at `index` is retired and still not
/// wanted back; never for a fixed pool
fn retirement(
    desired: Option<watch::Receiver<u32>>,
    index: u32,
    grace: Duration,
) -> impl Future<Output = ()> {
    async move {
        let Some(mut rx) = desired else {
            return pending().await;
        };
        loop {
            if rx.wait_for(|d| *d <= index).await.is_err() {
                return pending().await;
            }
            sleep(grace).await;
            if *rx.borrow_and_update() <= index {
                break;
            }
            debug!(vu = index, "Target recovered during ramp-down grace");
        }
        debug!(vu = index, "Ramp-down grace elapsed");
    }
}

async fn stopping(stop: &mut watch::Receiver<StopSignal>) {
    if stop.wait_for(|s| *s >= StopSignal::Draining).await.is_err() {
        pending::<()>().await;
    }
}

/// Sleep unless the run starts stopping first; true if the sleep completed
async fn sleep_or_stop(stop: &mut watch::Receiver<StopSignal>, duration: Duration) -> bool {
    tokio::select! {
        _ = sleep(duration) => true,
        _ = stopping(stop) => false,
    }
}

/// Pacing pause; false if the run or the executor stopped first
async fn pause(
    stop: &mut watch::Receiver<StopSignal>,
    ended: &mut watch::Receiver<bool>,
    duration: Duration,
) -> bool {
    tokio::select! {
        _ = sleep(duration) => true,
        _ = stopping(stop) => false,
        _ = ended.wait_for(|ended| *ended) => false,
    }
}

fn reap(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.try_join_next() {
        if let Err(e) = result {
            if e.is_panic() {
                warn!(error = %e, "Virtual user task panicked");
            }
        }
    }
}
