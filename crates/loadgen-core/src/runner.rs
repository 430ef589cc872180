use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::client::HttpClient;
use crate::config::RunConfig;
use crate::definition::{LoadTest, TestRegistry};
use crate::error::RunError;
use crate::perf_hint::PerfHint;
use crate::pool::WorkerPool;
use crate::ramp::{RampPlanner, RampScheduler};
use crate::statistic::Statistic;
use crate::stats::{endpoint_summaries, EndpointSummary, StatsSummary};
use crate::worker::{WorkerContext, WorkerState, WorkerTimings};

/// Everything a run produced, handed to the reporters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub test: String,
    pub config: RunConfig,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Attempts dispatched, including the ones that produced no statistic
    pub dispatched: u64,
    pub statistics: Vec<Statistic>,
    /// Dispatched attempts per elapsed second
    pub rps_series: Vec<u64>,
}

impl RunResult {
    pub fn summary(&self) -> StatsSummary {
        StatsSummary::new(&self.statistics, &self.rps_series)
    }

    pub fn endpoints(&self) -> Vec<EndpointSummary> {
        endpoint_summaries(&self.statistics)
    }
}

/// Wires registry, client, pool and scheduler together for one run.
pub struct Runner {
    config: RunConfig,
    registry: TestRegistry,
    timings: WorkerTimings,
    tick: Duration,
    shutdown: CancellationToken,
}

impl Runner {
    pub fn new(config: RunConfig, registry: TestRegistry) -> Self {
        Self {
            config,
            registry,
            timings: WorkerTimings::default(),
            tick: Duration::from_secs(1),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_timings(mut self, timings: WorkerTimings) -> Self {
        self.tick = timings.tick_period;
        self.timings = timings;
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Cancelling this token ends the run early; results gathered so far are
    /// still drained and returned.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn resolve(&self, name: &str) -> Result<Arc<dyn LoadTest>, RunError> {
        self.registry
            .resolve(name)
            .ok_or_else(|| RunError::TestNotFound {
                name: name.to_string(),
                available: self.registry.names(),
            })
    }

    pub async fn run(&self, test_name: &str) -> Result<RunResult, RunError> {
        let test = self.resolve(test_name)?;
        self.config.validate()?;
        let client = HttpClient::from_config(&self.config)?;

        let wait_for_body = test.wait_for_body().unwrap_or(self.config.wait_for_body);
        if let Some((min, max)) = test.wait_time_ms() {
            debug!(
                min_ms = min,
                max_ms = max,
                "Test declares think time; pacing follows the ramp instead"
            );
        }

        info!(
            "Running {} against {} with {} users (+{}/s) for {}s on {} workers",
            test.name(),
            self.config.host,
            self.config.users,
            self.config.spawn_rate,
            self.config.duration_secs,
            self.config.workers
        );

        let mut hint = PerfHint::apply();
        let started_at = Utc::now();

        let pool = WorkerPool::new(
            self.config.workers,
            WorkerContext {
                client,
                test: test.clone(),
                wait_for_body,
            },
            self.shutdown.child_token(),
            self.timings,
        );

        let planner = RampPlanner::new(self.config.users, self.config.spawn_rate);
        let rps_series = RampScheduler::new(planner, Duration::from_secs(self.config.duration_secs))
            .with_tick(self.tick)
            .run(&pool, &self.shutdown)
            .await;

        info!("Shutting down...");
        let statistics = pool.stop().await;
        let stopped = pool
            .workers()
            .iter()
            .filter(|w| w.state() == WorkerState::Stopped)
            .count();
        info!("{} out of {} workers shut down", stopped, pool.len());

        let finished_at = Utc::now();
        hint.revert();

        Ok(RunResult {
            test: test.name().to_string(),
            config: self.config.clone(),
            started_at,
            finished_at,
            dispatched: pool.dispatched_total(),
            statistics,
            rps_series,
        })
    }
}
