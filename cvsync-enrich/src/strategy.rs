//! Source strategy chain
//!
//! An ordered list of strategies, each mapping a unit to a [`ProbeResult`].
//! The chain stops at the first Found or Ambiguous result; NotFound and
//! Error fall through to the next strategy.

use crate::error::{EnrichError, EnrichResult, ProbeError};
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};
use crate::scheduler::Scheduler;
use crate::types::{Outcome, OutcomeStatus, ProbeResult, ProbeStatus, WorkUnit};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Static properties of a strategy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategyDescriptor {
    /// Unique tag recorded as the outcome's `source_tag`
    pub tag: String,
    /// Remote source; rate gates are keyed by source
    pub source: String,
    /// Requests go through the source's rate gate
    pub rate_limited: bool,
    /// Deadline per request
    pub timeout: Duration,
    /// Consults a preloaded reference cache before any request
    pub short_circuit: bool,
}

impl StrategyDescriptor {
    pub fn new(tag: impl Into<String>, source: impl Into<String>, timeout: Duration) -> Self {
        Self {
            tag: tag.into(),
            source: source.into(),
            rate_limited: false,
            timeout,
            short_circuit: false,
        }
    }

    pub fn rate_limited(mut self) -> Self {
        self.rate_limited = true;
        self
    }

    pub fn short_circuit(mut self) -> Self {
        self.short_circuit = true;
        self
    }
}

/// One source probe
#[async_trait]
pub trait Strategy: Send + Sync {
    fn descriptor(&self) -> &StrategyDescriptor;

    /// Answer from the reference cache, consulted when the descriptor sets
    /// `short_circuit`. `None` means "not cached, go to the network".
    fn cached(&self, _unit: &WorkUnit) -> Option<ProbeResult> {
        None
    }

    /// Probe the source. Failures are reported as `ProbeStatus::Error`.
    async fn probe(&self, unit: &WorkUnit, ctx: &ProbeContext<'_>) -> ProbeResult;
}

/// Network access for one strategy invocation
///
/// Every request holds a concurrency slot, passes the source's rate gate when
/// the strategy is rate-limited, and is bounded by the strategy's timeout.
pub struct ProbeContext<'a> {
    scheduler: &'a Scheduler,
    fetcher: &'a dyn Fetcher,
    descriptor: &'a StrategyDescriptor,
}

impl<'a> ProbeContext<'a> {
    pub fn new(
        scheduler: &'a Scheduler,
        fetcher: &'a dyn Fetcher,
        descriptor: &'a StrategyDescriptor,
    ) -> Self {
        Self {
            scheduler,
            fetcher,
            descriptor,
        }
    }

    pub fn tag(&self) -> &str {
        &self.descriptor.tag
    }

    /// Issue one request under the scheduler's constraints
    pub async fn fetch(&self, request: FetchRequest) -> Result<FetchResponse, ProbeError> {
        let _slot = self.scheduler.slot().await;

        if self.descriptor.rate_limited {
            if let Some(gate) = self.scheduler.gate(&self.descriptor.source) {
                gate.acquire().await;
            }
        }

        let start = Instant::now();
        let result =
            match tokio::time::timeout(self.descriptor.timeout, self.fetcher.fetch(&request)).await {
                Ok(result) => result,
                Err(_) => Err(ProbeError::Timeout),
            };

        debug!(
            source = %self.descriptor.tag,
            url = %request.url,
            status = ?result.as_ref().map(|r| r.status).ok(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Request finished"
        );

        result
    }
}

/// Ordered strategies sharing one scheduler and fetcher
pub struct StrategyChain {
    strategies: Vec<Arc<dyn Strategy>>,
    scheduler: Arc<Scheduler>,
    fetcher: Arc<dyn Fetcher>,
}

impl std::fmt::Debug for StrategyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyChain")
            .field("tags", &self.tags())
            .finish()
    }
}

impl StrategyChain {
    /// Build a chain
    ///
    /// Fails when two strategies share a tag, or when a rate-limited
    /// strategy's source has no gate in the scheduler.
    pub fn new(
        strategies: Vec<Arc<dyn Strategy>>,
        scheduler: Arc<Scheduler>,
        fetcher: Arc<dyn Fetcher>,
    ) -> EnrichResult<Self> {
        let mut tags = HashSet::new();
        for strategy in &strategies {
            let descriptor = strategy.descriptor();
            if !tags.insert(descriptor.tag.clone()) {
                return Err(EnrichError::Config(format!(
                    "duplicate strategy tag '{}'",
                    descriptor.tag
                )));
            }
            if descriptor.rate_limited && !scheduler.has_gate(&descriptor.source) {
                return Err(EnrichError::Config(format!(
                    "strategy '{}' is rate-limited but source '{}' has no rate gate",
                    descriptor.tag, descriptor.source
                )));
            }
        }

        Ok(Self {
            strategies,
            scheduler,
            fetcher,
        })
    }

    pub fn tags(&self) -> Vec<&str> {
        self.strategies
            .iter()
            .map(|s| s.descriptor().tag.as_str())
            .collect()
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    /// Run the unit through the strategies in order
    ///
    /// Final status: Found or Ambiguous from the deciding strategy; Missing if
    /// any strategy returned NotFound (or the chain is empty); Error only when
    /// every strategy errored.
    pub async fn run(&self, unit: &WorkUnit) -> Outcome {
        let mut not_found: Option<ProbeResult> = None;
        let mut errors: Vec<ProbeResult> = Vec::new();
        let mut queries_tried: Vec<String> = Vec::new();

        for strategy in &self.strategies {
            let descriptor = strategy.descriptor();

            let cached = if descriptor.short_circuit {
                strategy.cached(unit)
            } else {
                None
            };

            let result = match cached {
                Some(result) => {
                    debug!(unit = %unit.id, source = %descriptor.tag, "Reference cache hit");
                    result
                }
                None => {
                    let ctx = ProbeContext::new(&self.scheduler, self.fetcher.as_ref(), descriptor);
                    strategy.probe(unit, &ctx).await
                }
            };

            for query in &result.queries_tried {
                if !queries_tried.contains(query) {
                    queries_tried.push(query.clone());
                }
            }

            match result.status {
                ProbeStatus::Found | ProbeStatus::Ambiguous => {
                    let status = if result.status == ProbeStatus::Found {
                        OutcomeStatus::Found
                    } else {
                        OutcomeStatus::Ambiguous
                    };
                    let mut outcome = Outcome::from_probe(&unit.id, status, result);
                    outcome.queries_tried = queries_tried;
                    return outcome;
                }
                ProbeStatus::NotFound => {
                    // Keep the most informative miss: one with candidates wins
                    let replace = not_found
                        .as_ref()
                        .map_or(true, |prev| prev.candidates.is_empty());
                    if replace {
                        not_found = Some(result);
                    }
                }
                ProbeStatus::Error => {
                    warn!(
                        unit = %unit.id,
                        source = %descriptor.tag,
                        error = %result.error.as_ref().map(ToString::to_string).unwrap_or_default(),
                        "Strategy failed, falling through"
                    );
                    errors.push(result);
                }
            }
        }

        let mut outcome = match not_found {
            Some(miss) => {
                let mut outcome = Outcome::from_probe(&unit.id, OutcomeStatus::Missing, miss);
                outcome.source_tag = None;
                outcome.value = None;
                outcome
            }
            None if !errors.is_empty() => {
                let mut outcome = Outcome::unresolved(&unit.id, OutcomeStatus::Error);
                outcome.http_status = errors.iter().rev().find_map(|e| e.http_status);
                outcome.error = Some(
                    errors
                        .iter()
                        .map(|e| {
                            let detail = e.error.as_ref().map(ToString::to_string).unwrap_or_default();
                            format!("{}: {}", e.source_tag, detail)
                        })
                        .collect::<Vec<_>>()
                        .join("; "),
                );
                outcome
            }
            None => Outcome::unresolved(&unit.id, OutcomeStatus::Missing),
        };
        outcome.queries_tried = queries_tried;
        outcome
    }
}
