//! Two-lane request pipeline.
//!
//! Every remote request runs as a job on one of two FIFO lanes:
//!
//! - **Deferred**: searches, pull request and issue fetches, user lists.
//!   Jobs run one at a time with `api_interval` between them.
//! - **Immediate**: one-shot validation calls such as the login lookup.
//!   Jobs run back to back.
//!
//! Both lanes wait out an exhausted rate limit before starting a job.
//!
//! Each lane loop is a spawned task bound to a generation number. Stopping a
//! lane bumps the generation and drops its queued jobs; the loop exits after
//! the job it is currently running.

use crate::config::SharedConfig;
use crate::error::{Result, SyncError};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Notify, oneshot};
use tokio::time::{Instant, sleep, sleep_until};
use tracing::{debug, trace};

/// Which lane a request runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
    Deferred,
    Immediate,
}

impl Lane {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Deferred => "deferred",
            Self::Immediate => "immediate",
        }
    }
}

/// Rate-limit headers of one response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub limit: u64,
    pub remaining: u64,
    pub reset: DateTime<Utc>,
}

/// Holds jobs back while the remote rate limit is exhausted.
#[derive(Debug, Default)]
pub struct RateLimitGate {
    blocked_until: Mutex<Option<Instant>>,
}

impl RateLimitGate {
    /// Record the rate-limit state reported by a response.
    pub fn observe(&self, rate_limit: Option<RateLimit>) {
        let Some(rate_limit) = rate_limit else {
            return;
        };
        debug!(
            limit = rate_limit.limit,
            remaining = rate_limit.remaining,
            reset = %rate_limit.reset,
            "Rate limit"
        );
        if rate_limit.remaining > 0 {
            return;
        }
        let wait = (rate_limit.reset - Utc::now()).to_std().unwrap_or_default();
        *self.blocked_until.lock() = Some(Instant::now() + wait);
    }

    /// Deadline before which no job may start, if any.
    #[must_use]
    pub fn blocked_until(&self) -> Option<Instant> {
        *self.blocked_until.lock()
    }

    /// Sleep until the recorded reset time, then clear it. A deadline
    /// observed while sleeping is waited out as well.
    pub async fn wait(&self) {
        loop {
            let Some(deadline) = self.blocked_until() else {
                return;
            };
            if deadline > Instant::now() {
                debug!(
                    wait_ms = (deadline - Instant::now()).as_millis(),
                    "Rate limit exhausted, waiting for reset"
                );
                sleep_until(deadline).await;
            }
            let mut blocked = self.blocked_until.lock();
            if *blocked == Some(deadline) {
                *blocked = None;
                return;
            }
        }
    }
}

struct Job {
    owner: String,
    run: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct LaneState {
    queue: Mutex<VecDeque<Job>>,
    notify: Notify,
    generation: AtomicU64,
}

impl LaneState {
    fn wake(&self) {
        self.notify.notify_one();
    }
}

struct PipelineInner {
    config: SharedConfig,
    gate: RateLimitGate,
    deferred: LaneState,
    immediate: LaneState,
}

impl PipelineInner {
    const fn lane(&self, lane: Lane) -> &LaneState {
        match lane {
            Lane::Deferred => &self.deferred,
            Lane::Immediate => &self.immediate,
        }
    }
}

/// Cheaply cloneable handle to the shared request lanes.
#[derive(Clone)]
pub struct RequestPipeline {
    inner: Arc<PipelineInner>,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("deferred", &self.pending(Lane::Deferred))
            .field("immediate", &self.pending(Lane::Immediate))
            .finish()
    }
}

impl RequestPipeline {
    #[must_use]
    pub fn new(config: SharedConfig) -> Self {
        Self {
            inner: Arc::new(PipelineInner {
                config,
                gate: RateLimitGate::default(),
                deferred: LaneState::default(),
                immediate: LaneState::default(),
            }),
        }
    }

    #[must_use]
    pub fn gate(&self) -> &RateLimitGate {
        &self.inner.gate
    }

    #[must_use]
    pub fn config(&self) -> &SharedConfig {
        &self.inner.config
    }

    /// Start both lanes. Must be called from within a tokio runtime.
    pub fn start(&self) {
        self.start_lane(Lane::Deferred);
        self.start_lane(Lane::Immediate);
    }

    /// Stop both lanes and drop their queued jobs.
    pub fn stop(&self) {
        self.stop_lane(Lane::Deferred);
        self.stop_lane(Lane::Immediate);
    }

    /// Start (or restart) one lane loop.
    pub fn start_lane(&self, lane: Lane) {
        let state = self.inner.lane(lane);
        let generation = state.generation.fetch_add(1, Ordering::SeqCst) + 1;
        debug!(lane = lane.as_str(), generation, "Starting lane");
        // Parked loops of older generations exit on wake-up.
        state.notify.notify_waiters();
        let inner = Arc::clone(&self.inner);
        tokio::spawn(run_lane(inner, lane, generation));
        if !state.queue.lock().is_empty() {
            state.wake();
        }
    }

    /// Stop one lane. The job currently running on it completes; queued
    /// jobs resolve as cancelled.
    pub fn stop_lane(&self, lane: Lane) {
        let state = self.inner.lane(lane);
        state.generation.fetch_add(1, Ordering::SeqCst);
        let dropped = state.queue.lock().drain(..).count();
        debug!(lane = lane.as_str(), dropped, "Stopped lane");
        state.wake();
    }

    /// Drop every queued job tagged with `owner`. Returns how many were dropped.
    pub fn cancel(&self, owner: &str) -> usize {
        let mut dropped = 0;
        for lane in [Lane::Deferred, Lane::Immediate] {
            let mut queue = self.inner.lane(lane).queue.lock();
            let before = queue.len();
            queue.retain(|job| job.owner != owner);
            dropped += before - queue.len();
        }
        if dropped > 0 {
            debug!(owner, dropped, "Cancelled queued requests");
        }
        dropped
    }

    /// Number of jobs waiting on a lane.
    #[must_use]
    pub fn pending(&self, lane: Lane) -> usize {
        self.inner.lane(lane).queue.lock().len()
    }

    /// Queue `fut` on the deferred lane and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns the job's own error, or `Cancelled` if the job was dropped.
    pub async fn push<T, F>(&self, owner: &str, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.push_to(Lane::Deferred, owner, fut).await
    }

    /// Queue `fut` on the immediate lane and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns the job's own error, or `Cancelled` if the job was dropped.
    pub async fn push_immediate<T, F>(&self, owner: &str, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        self.push_to(Lane::Immediate, owner, fut).await
    }

    /// # Errors
    ///
    /// Returns the job's own error, or `Cancelled` if the job was dropped.
    pub async fn push_to<T, F>(&self, lane: Lane, owner: &str, fut: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let run = async move {
            let _ = tx.send(fut.await);
        }
        .boxed();

        let state = self.inner.lane(lane);
        state.queue.lock().push_back(Job {
            owner: owner.to_string(),
            run,
        });
        trace!(lane = lane.as_str(), owner, "Queued request");
        state.wake();

        rx.await.unwrap_or_else(|_| {
            Err(SyncError::Cancelled {
                owner: owner.to_string(),
            })
        })
    }
}

async fn run_lane(inner: Arc<PipelineInner>, lane: Lane, generation: u64) {
    let state = inner.lane(lane);
    let current = || state.generation.load(Ordering::SeqCst) == generation;

    while current() {
        let job = state.queue.lock().pop_front();
        let Some(job) = job else {
            state.notify.notified().await;
            continue;
        };

        inner.gate.wait().await;
        trace!(lane = lane.as_str(), owner = %job.owner, "Running request");
        job.run.await;

        if lane == Lane::Deferred {
            let interval = inner.config.load().api_interval;
            if !interval.is_zero() && current() {
                sleep(interval).await;
            }
        }
    }
    // Pass on a wake-up this loop may have consumed on behalf of a newer one.
    state.wake();
    debug!(lane = lane.as_str(), generation, "Lane loop exited");
}
