//! Rate-limited scheduler
//!
//! Two independent constraints:
//! - a process-wide concurrency ceiling on in-flight probe requests
//!   (semaphore)
//! - per designated slow source, a minimum wall-clock spacing between
//!   consecutive requests ([`RateGate`]), shared by every worker
//!
//! A gate is held only while sleeping out the remaining delay and stamping
//! the dispatch time, so workers talking to other sources never wait on it.

use cvsync_common::time::epoch_seconds;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Minimum spacing between consecutive requests to one source
pub struct RateGate {
    source: String,
    min_interval: Duration,
    last_dispatch: Mutex<Option<Dispatch>>,
}

#[derive(Debug, Clone, Copy)]
struct Dispatch {
    at: Instant,
    epoch: f64,
}

impl RateGate {
    pub fn new(source: impl Into<String>, min_interval: Duration) -> Self {
        Self {
            source: source.into(),
            min_interval,
            last_dispatch: Mutex::new(None),
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a request may be dispatched, then record the dispatch.
    ///
    /// The lock is held across the sleep so concurrent callers queue up and
    /// each observes the previous caller's stamp.
    pub async fn acquire(&self) {
        let mut last = self.last_dispatch.lock().await;

        if let Some(prev) = *last {
            let elapsed = prev.at.elapsed();
            if elapsed < self.min_interval {
                let wait = self.min_interval - elapsed;
                debug!(
                    source = %self.source,
                    wait_ms = wait.as_millis() as u64,
                    "Rate limiting: waiting before request"
                );
                sleep(wait).await;
            }
        }

        *last = Some(Dispatch {
            at: Instant::now(),
            epoch: epoch_seconds(),
        });
    }

    /// Seed the gate from a persisted epoch timestamp (resumed runs).
    ///
    /// Only moves the stamp forward; timestamps in the future are clamped to
    /// now.
    pub async fn seed_from_epoch(&self, last_request_ts: f64) {
        if !last_request_ts.is_finite() || last_request_ts <= 0.0 {
            return;
        }

        let now_epoch = epoch_seconds();
        let age = Duration::from_secs_f64((now_epoch - last_request_ts).max(0.0));
        if age >= self.min_interval {
            return;
        }

        let at = Instant::now().checked_sub(age).unwrap_or_else(Instant::now);
        let mut last = self.last_dispatch.lock().await;
        let newer = match *last {
            Some(prev) => prev.epoch < last_request_ts,
            None => true,
        };
        if newer {
            *last = Some(Dispatch {
                at,
                epoch: last_request_ts.min(now_epoch),
            });
        }
    }

    /// Epoch seconds of the last dispatch through this gate (0.0 if none)
    pub async fn last_request_ts(&self) -> f64 {
        self.last_dispatch.lock().await.map_or(0.0, |d| d.epoch)
    }
}

/// Concurrency ceiling plus per-source rate gates
pub struct Scheduler {
    permits: Arc<Semaphore>,
    ceiling: usize,
    gates: HashMap<String, Arc<RateGate>>,
}

impl Scheduler {
    /// Scheduler with the given ceiling (clamped to at least 1) and no gates
    pub fn new(ceiling: usize) -> Self {
        let ceiling = ceiling.max(1);
        Self {
            permits: Arc::new(Semaphore::new(ceiling)),
            ceiling,
            gates: HashMap::new(),
        }
    }

    /// Designate `source` as rate-limited with the given minimum spacing
    pub fn with_gate(mut self, source: impl Into<String>, min_interval: Duration) -> Self {
        let source = source.into();
        self.gates
            .insert(source.clone(), Arc::new(RateGate::new(source, min_interval)));
        self
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// Gate for `source`, if it is rate-limited
    pub fn gate(&self, source: &str) -> Option<&Arc<RateGate>> {
        self.gates.get(source)
    }

    pub fn has_gate(&self, source: &str) -> bool {
        self.gates.contains_key(source)
    }

    /// Wait for a free slot under the concurrency ceiling
    pub async fn slot(&self) -> OwnedSemaphorePermit {
        // The semaphore is owned by the scheduler and never closed
        self.permits
            .clone()
            .acquire_owned()
            .await
            .expect("scheduler semaphore is never closed")
    }

    /// Seed every gate from a persisted timestamp
    pub async fn seed_gates(&self, last_request_ts: f64) {
        for gate in self.gates.values() {
            gate.seed_from_epoch(last_request_ts).await;
        }
    }

    /// Latest dispatch across all gates (epoch seconds, 0.0 if none)
    pub async fn last_request_ts(&self) -> f64 {
        let mut latest = 0.0_f64;
        for gate in self.gates.values() {
            latest = latest.max(gate.last_request_ts().await);
        }
        latest
    }
}
