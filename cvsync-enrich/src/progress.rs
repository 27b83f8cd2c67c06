//! Progress reporting
//!
//! The pipeline reports `(done, total)` through a [`ProgressReporter`], which
//! forwards to any number of [`ProgressSink`]s at a bounded rate: always at
//! start and finish, and in between every N units or when the minimum
//! interval has passed. Sink failures are logged and otherwise ignored.

use crate::checkpoint::percent;
use async_trait::async_trait;
use cvsync_common::events::{EventBus, SyncEvent};
use cvsync_common::time::format_eta;
use governor::clock::DefaultClock;
use governor::state::direct::NotKeyed;
use governor::state::InMemoryState;
use governor::{Quota, RateLimiter};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::{debug, info};

/// Deadline for an external notifier command
const COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Placeholder replaced by the progress message in notifier arguments
pub const MESSAGE_PLACEHOLDER: &str = "{message}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    Started,
    Running,
    Finished,
}

/// Snapshot passed to sinks
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub job: String,
    pub phase: ProgressPhase,
    /// Units covered by the checkpoint cursor
    pub done: usize,
    pub total: usize,
    /// Units completed by this process
    pub processed_this_run: usize,
    pub elapsed: Duration,
}

impl ProgressUpdate {
    pub fn percent(&self) -> f64 {
        percent(self.done, self.total)
    }

    /// Remaining time extrapolated from this run's throughput
    pub fn eta_seconds(&self) -> Option<f64> {
        if self.processed_this_run == 0 {
            return None;
        }
        let per_unit = self.elapsed.as_secs_f64() / self.processed_this_run as f64;
        Some(per_unit * self.total.saturating_sub(self.done) as f64)
    }

    /// `"{done} of {total} ({pct:.2}%) has been processed."`
    pub fn message(&self) -> String {
        format!(
            "{} of {} ({:.2}%) has been processed.",
            self.done,
            self.total,
            self.percent()
        )
    }
}

/// Receives progress updates; failures never affect the run
#[async_trait]
pub trait ProgressSink: Send + Sync {
    fn name(&self) -> &str;

    async fn emit(&self, update: &ProgressUpdate) -> Result<(), String>;
}

/// Writes progress lines to the log
pub struct LogSink;

#[async_trait]
impl ProgressSink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn emit(&self, update: &ProgressUpdate) -> Result<(), String> {
        match update.eta_seconds() {
            Some(eta) if update.phase == ProgressPhase::Running => {
                info!(job = %update.job, eta = %format_eta(eta), "{}", update.message())
            }
            _ => info!(job = %update.job, "{}", update.message()),
        }
        Ok(())
    }
}

/// Runs an external notifier command per update
///
/// Arguments equal to `{message}` are replaced by `"<job> progress: done/total"`.
pub struct CommandSink {
    program: String,
    args: Vec<String>,
}

impl CommandSink {
    /// `command[0]` is the program, the rest its arguments; `None` if empty
    pub fn from_command(command: &[String]) -> Option<Self> {
        let (program, args) = command.split_first()?;
        Some(Self {
            program: program.clone(),
            args: args.to_vec(),
        })
    }

    fn render_args(&self, update: &ProgressUpdate) -> Vec<String> {
        let message = format!("{} progress: {}/{}", update.job, update.done, update.total);
        self.args
            .iter()
            .map(|arg| arg.replace(MESSAGE_PLACEHOLDER, &message))
            .collect()
    }
}

#[async_trait]
impl ProgressSink for CommandSink {
    fn name(&self) -> &str {
        &self.program
    }

    async fn emit(&self, update: &ProgressUpdate) -> Result<(), String> {
        let run = Command::new(&self.program)
            .args(self.render_args(update))
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(COMMAND_TIMEOUT, run)
            .await
            .map_err(|_| "notifier timed out".to_string())?
            .map_err(|e| format!("failed to run notifier: {}", e))?;

        if output.status.success() {
            Ok(())
        } else {
            Err(format!("notifier exited with {}", output.status))
        }
    }
}

/// Publishes `SyncEvent::Progress` on the event bus
pub struct EventBusSink {
    bus: EventBus,
}

impl EventBusSink {
    pub fn new(bus: EventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl ProgressSink for EventBusSink {
    fn name(&self) -> &str {
        "event_bus"
    }

    async fn emit(&self, update: &ProgressUpdate) -> Result<(), String> {
        self.bus.emit_lossy(SyncEvent::Progress {
            job: update.job.clone(),
            done: update.done,
            total: update.total,
            timestamp: chrono::Utc::now(),
        });
        Ok(())
    }
}

type DirectLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Rate-bounded fan-out to progress sinks
pub struct ProgressReporter {
    job: String,
    total: usize,
    started: Instant,
    every_n: usize,
    limiter: Option<DirectLimiter>,
    sinks: Vec<Arc<dyn ProgressSink>>,
}

impl ProgressReporter {
    /// `every_n == 0` disables count-based updates; a zero `min_interval`
    /// disables time-based ones.
    pub fn new(job: impl Into<String>, total: usize, every_n: usize, min_interval: Duration) -> Self {
        let limiter = Quota::with_period(min_interval).map(RateLimiter::direct);
        Self {
            job: job.into(),
            total,
            started: Instant::now(),
            every_n,
            limiter,
            sinks: Vec::new(),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub async fn started(&self, done: usize) {
        // Consume the initial burst so the next time-based update waits a period
        if let Some(limiter) = &self.limiter {
            let _ = limiter.check();
        }
        self.emit(ProgressPhase::Started, done, 0).await;
    }

    /// Report after a unit completed; emits only when due
    pub async fn tick(&self, done: usize, processed_this_run: usize) {
        let count_due = self.every_n > 0 && processed_this_run % self.every_n == 0;
        let time_due = self
            .limiter
            .as_ref()
            .is_some_and(|limiter| limiter.check().is_ok());

        if count_due || time_due {
            self.emit(ProgressPhase::Running, done, processed_this_run).await;
        }
    }

    pub async fn finished(&self, done: usize, processed_this_run: usize) {
        self.emit(ProgressPhase::Finished, done, processed_this_run).await;
    }

    async fn emit(&self, phase: ProgressPhase, done: usize, processed_this_run: usize) {
        let update = ProgressUpdate {
            job: self.job.clone(),
            phase,
            done,
            total: self.total,
            processed_this_run,
            elapsed: self.started.elapsed(),
        };

        for sink in &self.sinks {
            if let Err(e) = sink.emit(&update).await {
                debug!(sink = sink.name(), error = %e, "Progress sink failed (ignored)");
            }
        }
    }
}
