use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::PercentileError;
use crate::percentile::percentile_sorted;
use crate::statistic::Statistic;

/// Append-only, lock-free sink for [`Statistic`] records.
///
/// Backed by an unbounded MPMC channel so any number of producers can push
/// concurrently without a global lock. Clones share the same storage.
#[derive(Clone)]
pub struct StatsCollector {
    tx: Sender<Statistic>,
    rx: Receiver<Statistic>,
    pushed: Arc<AtomicU64>,
}

impl StatsCollector {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self {
            tx,
            rx,
            pushed: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn push(&self, statistic: Statistic) {
        // The receiver lives in `self`, so the channel can never be disconnected here.
        if self.tx.send(statistic).is_ok() {
            self.pushed.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records currently buffered and not yet drained.
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    /// Total records ever pushed, drained or not.
    pub fn pushed(&self) -> u64 {
        self.pushed.load(Ordering::Relaxed)
    }

    /// Take everything buffered so far. Records pushed concurrently with the
    /// drain land in this batch or the next one, never both.
    pub fn drain(&self) -> Vec<Statistic> {
        self.rx.try_iter().collect()
    }
}

impl Default for StatsCollector {
    fn default() -> Self {
        Self::new()
    }
}

/// Response-time distribution of a non-empty set of statistics, in ms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencySummary {
    pub min_ms: f64,
    pub avg_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

impl LatencySummary {
    pub fn from_statistics<'a>(
        stats: impl IntoIterator<Item = &'a Statistic>,
    ) -> Result<Self, PercentileError> {
        let mut samples: Vec<f64> = stats
            .into_iter()
            .map(|s| s.time_taken_ms as f64)
            .collect();
        samples.sort_by(f64::total_cmp);

        let p90_ms = percentile_sorted(&samples, 0.90)?;
        let p95_ms = percentile_sorted(&samples, 0.95)?;
        let p99_ms = percentile_sorted(&samples, 0.99)?;
        let sum: f64 = samples.iter().sum();

        Ok(Self {
            min_ms: samples[0],
            avg_ms: sum / samples.len() as f64,
            p90_ms,
            p95_ms,
            p99_ms,
            max_ms: samples[samples.len() - 1],
        })
    }
}

/// Aggregate view of a run used by the console and JSON reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsSummary {
    pub requests: u64,
    pub successful: u64,
    pub failed: u64,
    /// `None` when no attempt completed
    pub latency: Option<LatencySummary>,
    pub average_rps: f64,
}

impl StatsSummary {
    pub fn new(statistics: &[Statistic], rps_series: &[u64]) -> Self {
        let successful = statistics.iter().filter(|s| s.success).count() as u64;
        let requests = statistics.len() as u64;

        let latency = match LatencySummary::from_statistics(statistics) {
            Ok(latency) => Some(latency),
            Err(PercentileError::Empty) => None,
            Err(e) => {
                tracing::warn!("Latency summary unavailable: {}", e);
                None
            }
        };

        Self {
            requests,
            successful,
            failed: requests - successful,
            latency,
            average_rps: average_rps(rps_series),
        }
    }
}

/// Mean of the per-second samples; 0 for an empty series.
pub fn average_rps(rps_series: &[u64]) -> f64 {
    if rps_series.is_empty() {
        return 0.0;
    }
    rps_series.iter().sum::<u64>() as f64 / rps_series.len() as f64
}

/// Per-endpoint (`METHOD:URI`) breakdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointSummary {
    pub method: String,
    pub uri: String,
    pub requests: u64,
    pub failed: u64,
    pub latency: LatencySummary,
}

pub fn endpoint_summaries(statistics: &[Statistic]) -> Vec<EndpointSummary> {
    let mut groups: BTreeMap<(&str, &str), Vec<&Statistic>> = BTreeMap::new();
    for stat in statistics {
        groups
            .entry((stat.request_method.as_str(), stat.request_uri.as_str()))
            .or_default()
            .push(stat);
    }

    groups
        .into_iter()
        .filter_map(|((method, uri), stats)| {
            let failed = stats.iter().filter(|s| !s.success).count() as u64;
            let requests = stats.len() as u64;
            // groups are never empty, so this only skips on a programming error
            let latency = LatencySummary::from_statistics(stats).ok()?;
            Some(EndpointSummary {
                method: method.to_string(),
                uri: uri.to_string(),
                requests,
                failed,
                latency,
            })
        })
        .collect()
}
