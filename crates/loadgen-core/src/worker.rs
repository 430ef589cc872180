use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::client::HttpClient;
use crate::definition::LoadTest;
use crate::statistic::Statistic;
use crate::stats::StatsCollector;

/// Pacing constants of the dispatch loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerTimings {
    /// Length of one dispatch tick
    pub tick_period: Duration,
    /// How long a tick waits for its attempts before sleeping out the rest
    pub settle_timeout: Duration,
    /// How long `stop` waits for in-flight attempts
    pub drain_timeout: Duration,
}

impl Default for WorkerTimings {
    fn default() -> Self {
        Self {
            tick_period: Duration::from_secs(1),
            settle_timeout: Duration::from_secs(1),
            drain_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

/// Everything an attempt needs; shared by all workers of a run.
#[derive(Clone)]
pub struct WorkerContext {
    pub client: HttpClient,
    pub test: Arc<dyn LoadTest>,
    pub wait_for_body: bool,
}

/// Count of attempts not yet finished, with a wake-up when it reaches zero.
#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn begin(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::AcqRel);
        InFlightGuard(self.clone())
    }

    fn get(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.get() == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Released on completion and on abort alike.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

/// Dispatches its share of the target rate once per tick.
///
/// The scheduler is the only writer of the target rate; the loop reads it at
/// each tick boundary. Attempts from one tick may still be in flight when the
/// next tick dispatches, so a slow target builds up a backlog instead of
/// throttling the generator.
pub struct Worker {
    id: usize,
    target_rate: AtomicU64,
    dispatched: AtomicU64,
    context: WorkerContext,
    timings: WorkerTimings,
    cancel: CancellationToken,
    state: watch::Sender<WorkerState>,
    pending: Mutex<JoinSet<()>>,
    in_flight: Arc<InFlight>,
    stats: StatsCollector,
    stop_lock: tokio::sync::Mutex<()>,
}

impl Worker {
    /// `shutdown` is the run-wide signal; the worker listens on a child of it
    /// so stopping one worker leaves the others running.
    pub fn new(
        id: usize,
        context: WorkerContext,
        shutdown: &CancellationToken,
        timings: WorkerTimings,
    ) -> Self {
        let (state, _) = watch::channel(WorkerState::Idle);
        Self {
            id,
            target_rate: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
            context,
            timings,
            cancel: shutdown.child_token(),
            state,
            pending: Mutex::new(JoinSet::new()),
            in_flight: Arc::new(InFlight::default()),
            stats: StatsCollector::new(),
            stop_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    /// Applies from the next tick boundary on.
    pub fn set_target_rate(&self, rate: u64) {
        self.target_rate.store(rate, Ordering::Release);
    }

    pub fn target_rate(&self) -> u64 {
        self.target_rate.load(Ordering::Acquire)
    }

    /// Attempts dispatched so far, finished or not.
    pub fn dispatched_count(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    /// Attempts dispatched but not yet finished.
    pub fn in_flight(&self) -> usize {
        self.in_flight.get()
    }

    /// Run the dispatch loop until stopped. A worker only runs once; calling
    /// this on a worker that already left `Idle` returns immediately.
    pub async fn launch(&self) {
        let started = self.state.send_if_modified(|state| {
            if *state == WorkerState::Idle {
                *state = WorkerState::Running;
                true
            } else {
                false
            }
        });
        if !started {
            debug!(worker = self.id, state = ?self.state(), "Worker not idle, ignoring launch");
            return;
        }

        debug!(worker = self.id, "Worker running");
        self.run_loop().await;
        self.state.send_replace(WorkerState::Draining);
        debug!(worker = self.id, dispatched = self.dispatched_count(), "Worker loop exited");
    }

    async fn run_loop(&self) {
        while !self.cancel.is_cancelled() {
            let tick_start = Instant::now();
            let rate = self.target_rate();
            self.dispatch(rate);

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = timeout(self.timings.settle_timeout, self.in_flight.wait_idle()) => {}
            }

            let elapsed = tick_start.elapsed();
            if let Some(remaining) = self.timings.tick_period.checked_sub(elapsed) {
                tokio::select! {
                    _ = self.cancel.cancelled() => break,
                    _ = sleep(remaining) => {}
                }
            }
        }
    }

    fn dispatch(&self, rate: u64) {
        let mut pending = self.lock_pending();
        while pending.try_join_next().is_some() {}

        for _ in 0..rate {
            let guard = self.in_flight.begin();
            let context = self.context.clone();
            let stats = self.stats.clone();

            pending.spawn(async move {
                let _guard = guard;
                match context
                    .client
                    .execute(context.test.as_ref(), context.wait_for_body)
                    .await
                {
                    Ok(statistic) => stats.push(statistic),
                    Err(e) => trace!("Dropped attempt: {:#}", e),
                }
            });
        }

        self.dispatched.fetch_add(rate, Ordering::Relaxed);
        trace!(worker = self.id, rate, in_flight = self.in_flight(), "Tick dispatched");
    }

    /// Stop the loop, wait (bounded) for in-flight attempts and hand back every
    /// statistic gathered so far. Attempts still running after the drain
    /// timeout are abandoned. Calling `stop` again returns an empty batch.
    pub async fn stop(&self) -> Vec<Statistic> {
        let _stopping = self.stop_lock.lock().await;
        self.cancel.cancel();

        let was_idle = self.state.send_if_modified(|state| {
            if *state == WorkerState::Idle {
                *state = WorkerState::Stopped;
                true
            } else {
                false
            }
        });

        if !was_idle && self.state() != WorkerState::Stopped {
            let mut state = self.state.subscribe();
            let loop_exit = self.timings.tick_period + self.timings.settle_timeout;
            let exited = timeout(loop_exit, async {
                state.wait_for(|s| *s != WorkerState::Running).await.is_ok()
            })
            .await
            .unwrap_or(false);
            if !exited {
                warn!(worker = self.id, "Worker loop did not exit in time, draining anyway");
            }
            self.state.send_replace(WorkerState::Draining);
            self.drain_pending().await;
            self.state.send_replace(WorkerState::Stopped);
        }

        self.stats.drain()
    }

    async fn drain_pending(&self) {
        let mut pending = std::mem::take(&mut *self.lock_pending());
        let drained = timeout(self.timings.drain_timeout, async {
            while pending.join_next().await.is_some() {}
        })
        .await;

        if drained.is_err() {
            debug!(
                worker = self.id,
                abandoned = pending.len(),
                "Drain timed out, abandoning in-flight attempts"
            );
            pending.abort_all();
            // aborted tasks resolve at once; reaping them releases their guards
            while pending.join_next().await.is_some() {}
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, JoinSet<()>> {
        // A panic while holding the lock leaves the set itself intact.
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}
