//! Aggregator: drives a work list through a strategy chain
//!
//! **Run sequence:**
//! 1. De-duplicate units by cache key
//! 2. Load (resume) or reset the store; seed rate gates from the checkpoint
//! 3. From the cursor: cached units complete immediately, the rest run the
//!    chain with up to `ceiling` units in flight
//! 4. Each completion is persisted before the next is accepted: cache entry,
//!    log line, then the checkpoint (cursor moves over a contiguous prefix).
//!    Store I/O runs on the blocking pool.
//! 5. Aggregate the final cache into a [`RunReport`]
//!
//! Store failures abort the run. Cancellation stops dispatch; in-flight units
//! finish and are recorded.

use crate::checkpoint::{Checkpoint, CursorTracker};
use crate::error::{EnrichError, EnrichResult};
use crate::progress::{ProgressReporter, ProgressSink};
use crate::report::RunReport;
use crate::store::{Cache, LogEntry, ProgressStore};
use crate::strategy::StrategyChain;
use crate::types::{dedupe_units, CacheKeying, Outcome, OutcomeStatus, WorkUnit};
use cvsync_common::events::{EventBus, SyncEvent};
use futures::stream::{self, StreamExt};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-run switches
#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Continue from the stored checkpoint and cache instead of resetting
    pub resume: bool,
    /// Stop after this many units
    pub max_units: Option<usize>,
    /// Drop cached Error outcomes and walk the list from the start
    pub retry_errors: bool,
}

pub struct Aggregator<S: ProgressStore> {
    job: String,
    keying: CacheKeying,
    chain: Arc<StrategyChain>,
    store: Arc<StdMutex<S>>,
    options: RunOptions,
    progress_every: usize,
    progress_interval: Duration,
    sinks: Vec<Arc<dyn ProgressSink>>,
    events: Option<EventBus>,
    cancel: CancellationToken,
}

/// Run `f` against the store on the blocking pool
async fn with_store<S, T, F>(store: &Arc<StdMutex<S>>, f: F) -> EnrichResult<T>
where
    S: ProgressStore + 'static,
    T: Send + 'static,
    F: FnOnce(&mut S) -> EnrichResult<T> + Send + 'static,
{
    let store = Arc::clone(store);
    tokio::task::spawn_blocking(move || {
        let mut guard = store.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut *guard)
    })
    .await
    .map_err(|e| EnrichError::Store(format!("store task failed: {}", e)))?
}

/// Mutable run state, guarded by one lock so completions persist in order
struct RunState<S> {
    store: Arc<StdMutex<S>>,
    checkpoint: Checkpoint,
    tracker: CursorTracker,
    processed: usize,
    cache_hits: usize,
    fresh: Cache,
}

impl<S: ProgressStore + 'static> RunState<S> {
    /// Persist one completion; returns `(cursor, processed_this_run)`
    async fn record(
        &mut self,
        index: usize,
        key: &str,
        outcome: &Outcome,
        from_cache: bool,
        last_request_ts: f64,
    ) -> EnrichResult<(usize, usize)> {
        let mut checkpoint = self.checkpoint.clone();
        if let Some(next) = self.tracker.complete(index) {
            checkpoint.advance_to(next);
        }
        checkpoint.last_request_ts = checkpoint.last_request_ts.max(last_request_ts);
        checkpoint.touch();

        let entry = LogEntry::new(index, checkpoint.total_units, key, outcome, from_cache);
        let fresh = (!from_cache).then(|| (key.to_string(), outcome.clone()));
        let saved = checkpoint.clone();
        let put = fresh.clone();
        with_store(&self.store, move |store| {
            if let Some((key, outcome)) = &put {
                store.put(key, outcome)?;
            }
            store.append_log(&entry)?;
            store.save(&saved)
        })
        .await?;

        match fresh {
            Some((key, outcome)) => {
                self.fresh.insert(key, outcome);
            }
            None => self.cache_hits += 1,
        }
        self.checkpoint = checkpoint;
        self.processed += 1;
        Ok((self.checkpoint.next_index, self.processed))
    }
}

impl<S: ProgressStore + 'static> Aggregator<S> {
    pub fn new(job: impl Into<String>, keying: CacheKeying, chain: Arc<StrategyChain>, store: S) -> Self {
        Self {
            job: job.into(),
            keying,
            chain,
            store: Arc::new(StdMutex::new(store)),
            options: RunOptions::default(),
            progress_every: 0,
            progress_interval: Duration::ZERO,
            sinks: Vec::new(),
            events: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Progress cadence: every `every_n` units, or once `interval` has passed
    pub fn with_progress(mut self, every_n: usize, interval: Duration) -> Self {
        self.progress_every = every_n;
        self.progress_interval = interval;
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn emit(&self, event: SyncEvent) {
        if let Some(events) = &self.events {
            events.emit_lossy(event);
        }
    }

    /// Process the work list; returns the report over all units
    pub async fn run(&mut self, units: Vec<WorkUnit>) -> EnrichResult<RunReport> {
        let units = dedupe_units(units, self.keying);
        let total = units.len();

        let (mut checkpoint, mut cache) = if self.options.resume {
            with_store(&self.store, move |store| store.load(total)).await?
        } else {
            let fresh = with_store(&self.store, move |store| store.reset(total)).await?;
            (fresh, Cache::new())
        };

        let mut start = checkpoint.next_index;
        if self.options.retry_errors {
            let before = cache.len();
            cache.retain(|_, outcome| outcome.status != OutcomeStatus::Error);
            info!(dropped = before - cache.len(), "Retrying cached errors");
            start = 0;
        }
        checkpoint.total_units = total;

        let scheduler = self.chain.scheduler().clone();
        scheduler.seed_gates(checkpoint.last_request_ts).await;

        let end = match self.options.max_units {
            Some(max) => start.saturating_add(max).min(total),
            None => total,
        };

        info!(
            job = %self.job,
            start,
            end,
            total,
            cached = cache.len(),
            concurrency = scheduler.ceiling(),
            "Run starting"
        );
        self.emit(SyncEvent::RunStarted {
            job: self.job.clone(),
            start_index: start,
            total,
            timestamp: chrono::Utc::now(),
        });

        let reporter = self
            .sinks
            .iter()
            .cloned()
            .fold(
                ProgressReporter::new(self.job.clone(), total, self.progress_every, self.progress_interval),
                ProgressReporter::with_sink,
            );
        reporter.started(checkpoint.next_index).await;

        let keying = self.keying;
        let job = self.job.clone();
        let events = self.events.clone();
        let chain = self.chain.as_ref();
        let cancel = &self.cancel;
        let cache_ref = &cache;
        let reporter_ref = &reporter;
        let scheduler_ref = scheduler.as_ref();

        let state = Mutex::new(RunState {
            store: Arc::clone(&self.store),
            checkpoint,
            tracker: CursorTracker::new(start),
            processed: 0,
            cache_hits: 0,
            fresh: Cache::new(),
        });
        let state_ref = &state;

        let work: Vec<(usize, &WorkUnit)> = units[start..end]
            .iter()
            .enumerate()
            .map(|(offset, unit)| (start + offset, unit))
            .collect();

        let mut completions = stream::iter(work)
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|(index, unit)| {
                let job = job.clone();
                let events = events.clone();
                async move {
                    let key = unit.cache_key(keying);
                    let (outcome, from_cache) = match cache_ref.get(&key) {
                        Some(outcome) => (outcome.clone(), true),
                        None => (chain.run(unit).await, false),
                    };

                    let last_request_ts = scheduler_ref.last_request_ts().await;
                    let (cursor, processed) = state_ref
                        .lock()
                        .await
                        .record(index, &key, &outcome, from_cache, last_request_ts)
                        .await?;

                    if from_cache {
                        debug!(index, unit = %unit.id, status = %outcome.status, "Cached outcome");
                    } else {
                        info!(
                            index,
                            unit = %unit.id,
                            status = %outcome.status,
                            source = outcome.source_tag.as_deref().unwrap_or("-"),
                            "Unit completed"
                        );
                    }
                    if let Some(events) = &events {
                        events.emit_lossy(SyncEvent::UnitCompleted {
                            job,
                            unit_id: outcome.unit_id.clone(),
                            status: outcome.status.to_string(),
                            source_tag: outcome.source_tag.clone(),
                            from_cache,
                            timestamp: chrono::Utc::now(),
                        });
                    }

                    reporter_ref.tick(cursor, processed).await;
                    EnrichResult::Ok(())
                }
            })
            .buffer_unordered(scheduler.ceiling());

        let mut failure = None;
        while let Some(result) = completions.next().await {
            if let Err(e) = result {
                error!(job = %self.job, error = %e, "Aborting run: progress could not be persisted");
                failure = Some(e);
                break;
            }
        }
        drop(completions);

        let RunState {
            checkpoint,
            processed,
            cache_hits,
            fresh,
            ..
        } = state.into_inner();

        if let Some(e) = failure {
            return Err(e);
        }

        let interrupted = self.cancel.is_cancelled() && checkpoint.next_index < end;
        if interrupted {
            warn!(job = %self.job, next_index = checkpoint.next_index, "Run interrupted");
        }
        reporter.finished(checkpoint.next_index, processed).await;

        cache.extend(fresh);
        let mut report = RunReport::from_cache(&self.job, &units, self.keying, &cache);
        report.start_index = start;
        report.next_index = checkpoint.next_index;
        report.processed_this_run = processed;
        report.cache_hits = cache_hits;
        report.interrupted = interrupted;

        info!(
            job = %self.job,
            next_index = report.next_index,
            total,
            processed,
            cache_hits,
            found = report.counts.found,
            ambiguous = report.counts.ambiguous,
            missing = report.counts.missing,
            errors = report.counts.error,
            "Run finished"
        );
        self.emit(SyncEvent::RunCompleted {
            job: self.job.clone(),
            next_index: report.next_index,
            total,
            interrupted,
            timestamp: chrono::Utc::now(),
        });

        Ok(report)
    }
}
