//! Arrival-rate scheduler.
//!
//! Starts scenario iterations at the rate the load model asks for,
//! independent of how long each iteration takes. At most `max_vus`
//! iterations run at once; an iteration that comes due while every virtual
//! user is busy is dropped and counted.

use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio::time::{self, Duration, Instant};
use tracing::{debug, info, warn};

use crate::load_models::LoadModel;
use crate::metrics::ACTIVE_VUS;
use crate::scenario::Scenario;

/// Longest the dispatcher sleeps between rate evaluations.
const MAX_TICK: Duration = Duration::from_millis(100);

/// Shortest dispatcher tick, bounding the wake-up rate at high arrival rates.
const MIN_TICK: Duration = Duration::from_millis(1);

/// Configuration for the driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    pub load_model: LoadModel,
    pub max_vus: usize,
    pub graceful_stop: Duration,
}

/// What happened during the run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverSummary {
    pub started: u64,
    pub dropped: u64,
    /// In-flight iterations cancelled at the end (abort or graceful stop expiry)
    pub interrupted: u64,
    pub aborted: bool,
    pub elapsed: Duration,
}

/// Holds a VU slot for the lifetime of one iteration.
struct VuSlot {
    _permit: OwnedSemaphorePermit,
}

impl VuSlot {
    fn new(permit: OwnedSemaphorePermit) -> Self {
        ACTIVE_VUS.inc();
        Self { _permit: permit }
    }
}

impl Drop for VuSlot {
    fn drop(&mut self) {
        ACTIVE_VUS.dec();
    }
}

/// Accumulates fractional iterations from the rate curve between ticks.
#[derive(Debug, Default)]
struct ArrivalBudget {
    pending: f64,
}

impl ArrivalBudget {
    /// Adds the iterations due between `from_secs` and `to_secs` (midpoint
    /// rate) and returns how many whole iterations should start now.
    fn advance(&mut self, model: &LoadModel, from_secs: f64, to_secs: f64) -> u64 {
        let span = (to_secs - from_secs).max(0.0);
        let rps = model.calculate_current_rps(from_secs + span / 2.0);
        if rps.is_finite() && rps > 0.0 {
            self.pending += rps * span;
        }
        let due = self.pending.floor();
        self.pending -= due;
        due as u64
    }
}

fn next_tick(model: &LoadModel, elapsed_secs: f64) -> Duration {
    let rps = model.calculate_current_rps(elapsed_secs);
    if rps.is_finite() && rps > 0.0 {
        Duration::from_secs_f64(1.0 / rps).clamp(MIN_TICK, MAX_TICK)
    } else {
        MAX_TICK
    }
}

/// Runs `scenario.slam()` on the load model's schedule until the schedule
/// ends or `abort_rx` turns true.
pub async fn run(
    scenario: Arc<Scenario>,
    config: DriverConfig,
    mut abort_rx: watch::Receiver<bool>,
) -> DriverSummary {
    let total_duration = config.load_model.total_duration();
    let vus = Arc::new(Semaphore::new(config.max_vus));
    let mut in_flight: JoinSet<()> = JoinSet::new();
    let mut budget = ArrivalBudget::default();
    let mut summary = DriverSummary::default();
    let mut abort_open = true;

    info!(
        load_model = ?config.load_model,
        max_vus = config.max_vus,
        duration_secs = total_duration.as_secs_f64(),
        "Driver starting"
    );

    let start_time = Instant::now();
    let mut last_secs = 0.0;
    // Absolute deadlines so timer overshoot is absorbed by the next tick.
    let mut next_fire = start_time;

    loop {
        if *abort_rx.borrow() {
            summary.aborted = true;
            break;
        }

        tokio::select! {
            _ = time::sleep_until(next_fire) => {}
            changed = abort_rx.changed(), if abort_open => {
                if changed.is_err() {
                    abort_open = false;
                }
                continue;
            }
            Some(_) = in_flight.join_next(), if !in_flight.is_empty() => continue,
        }

        let elapsed = start_time.elapsed();
        if elapsed >= total_duration {
            break;
        }

        let elapsed_secs = elapsed.as_secs_f64();
        let due = budget.advance(&config.load_model, last_secs, elapsed_secs);
        last_secs = elapsed_secs;

        for _ in 0..due {
            match vus.clone().try_acquire_owned() {
                Ok(permit) => {
                    summary.started += 1;
                    let scenario = scenario.clone();
                    in_flight.spawn(async move {
                        let _slot = VuSlot::new(permit);
                        scenario.slam().await;
                    });
                }
                Err(_) => {
                    summary.dropped += 1;
                    scenario.walker().aggregator().record_dropped_iteration();
                    warn!(
                        max_vus = config.max_vus,
                        elapsed_secs = elapsed_secs,
                        "Insufficient VUs, dropping iteration"
                    );
                }
            }
        }

        next_fire += next_tick(&config.load_model, elapsed_secs);
        if next_fire < Instant::now() {
            next_fire = Instant::now();
        }
    }

    if summary.aborted {
        warn!(in_flight = in_flight.len(), "Run aborted, cancelling in-flight iterations");
    } else {
        info!(
            in_flight = in_flight.len(),
            graceful_stop_secs = config.graceful_stop.as_secs_f64(),
            "Schedule complete, waiting for in-flight iterations"
        );
        let drain = async {
            while in_flight.join_next().await.is_some() {}
        };
        tokio::select! {
            _ = time::timeout(config.graceful_stop, drain) => {}
            _ = wait_for_abort(&mut abort_rx) => {
                summary.aborted = true;
                warn!("Run aborted during graceful stop");
            }
        }
    }

    summary.interrupted = in_flight.len() as u64;
    in_flight.abort_all();
    while in_flight.join_next().await.is_some() {}

    summary.elapsed = start_time.elapsed();
    debug!(?summary, "Driver finished");
    summary
}

/// Resolves once the abort flag is true; never resolves if the sender is gone.
async fn wait_for_abort(abort_rx: &mut watch::Receiver<bool>) {
    loop {
        if *abort_rx.borrow() {
            return;
        }
        if abort_rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
