use std::time::Duration;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::pool::WorkerPool;

/// Deterministic ramp: every tick adds `spawn_rate` users until `users` is
/// reached, using integer math only.
#[derive(Debug, Clone)]
pub struct RampPlanner {
    users: u64,
    spawn_rate: u64,
    queued: u64,
}

impl RampPlanner {
    pub fn new(users: u64, spawn_rate: u64) -> Self {
        Self {
            users,
            spawn_rate,
            queued: 0,
        }
    }

    /// Aggregate target after the ticks applied so far.
    pub fn queued(&self) -> u64 {
        self.queued
    }

    pub fn is_full(&self) -> bool {
        self.queued >= self.users
    }

    /// Apply one tick and return the new aggregate target.
    pub fn advance(&mut self) -> u64 {
        self.queued = self.queued.saturating_add(self.spawn_rate).min(self.users);
        self.queued
    }

    /// `ceil(queued / workers)`. Every worker receives this rate, so the
    /// aggregate may exceed `users` by up to `workers - 1`.
    pub fn per_worker_rate(&self, workers: usize) -> u64 {
        if workers == 0 {
            return 0;
        }
        self.queued.div_ceil(workers as u64)
    }

    /// Ticks needed to reach the full user count.
    pub fn ticks_to_full(&self) -> u64 {
        self.users.div_ceil(self.spawn_rate.max(1))
    }
}

/// Drives a timed run: ramps the pool once per tick and samples throughput.
pub struct RampScheduler {
    planner: RampPlanner,
    duration: Duration,
    tick: Duration,
}

impl RampScheduler {
    pub fn new(planner: RampPlanner, duration: Duration) -> Self {
        Self {
            planner,
            duration,
            tick: Duration::from_secs(1),
        }
    }

    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick;
        self
    }

    /// Run until `duration` has elapsed or `shutdown` fires. Returns one
    /// dispatch-rate sample per elapsed tick. Workers are left running; the
    /// caller stops the pool.
    pub async fn run(mut self, pool: &WorkerPool, shutdown: &CancellationToken) -> Vec<u64> {
        let mut ticker = interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let start: Instant = ticker.tick().await;

        let mut rps_series = Vec::new();
        let mut last_total = 0u64;
        let mut reported_full = false;

        info!("Starting up...");

        loop {
            if !reported_full {
                let queued = self.planner.advance();
                pool.broadcast_rate(self.planner.per_worker_rate(pool.len()));
                info!("Spawned {} out of {} users", queued, self.planner.users);

                if self.planner.is_full() {
                    info!("Finished spawning {} users", self.planner.users);
                    reported_full = true;
                }
            }

            if !pool.is_launched() && self.planner.per_worker_rate(pool.len()) > 0 {
                pool.launch();
            }

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Run cancelled");
                    break;
                }
                _ = ticker.tick() => {}
            }

            let total = pool.dispatched_total();
            let delta = total.saturating_sub(last_total);
            last_total = total;
            rps_series.push(delta);
            info!(
                "Executed {} Requests | {} RPS | Target {} RPS",
                total,
                delta,
                self.planner.queued()
            );

            if start.elapsed() >= self.duration {
                break;
            }
        }

        rps_series
    }
}
