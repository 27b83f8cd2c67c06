//! End-to-end aggregator runs over scripted strategies and an in-memory store

use async_trait::async_trait;
use cvsync_common::events::{EventBus, SyncEvent};
use cvsync_enrich::error::{EnrichError, ProbeError};
use cvsync_enrich::fetch::{FetchRequest, FetchResponse, Fetcher};
use cvsync_enrich::pipeline::{Aggregator, RunOptions};
use cvsync_enrich::report::RunReport;
use cvsync_enrich::scheduler::Scheduler;
use cvsync_enrich::scoring::{MatchDecision, MatchPolicy};
use cvsync_enrich::store::MemoryStore;
use cvsync_enrich::strategy::{ProbeContext, Strategy, StrategyChain, StrategyDescriptor};
use cvsync_enrich::types::{
    CacheKeying, Candidate, MatchTier, Outcome, OutcomeStatus, ProbeResult, WorkUnit,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

struct NoNetwork;

#[async_trait]
impl Fetcher for NoNetwork {
    async fn fetch(&self, _request: &FetchRequest) -> Result<FetchResponse, ProbeError> {
        Err(ProbeError::Transport("no network in tests".into()))
    }
}

/// Answers from a table keyed by unit id; NotFound otherwise
struct Table {
    descriptor: StrategyDescriptor,
    answers: HashMap<String, ProbeResult>,
    delay: Duration,
    calls: Mutex<Vec<String>>,
    cancel_at: Option<(String, CancellationToken)>,
}

impl Table {
    fn new(tag: &str) -> Self {
        Self {
            descriptor: StrategyDescriptor::new(tag, tag, Duration::from_secs(1)),
            answers: HashMap::new(),
            delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
            cancel_at: None,
        }
    }

    fn answer(mut self, unit: &str, result: ProbeResult) -> Self {
        self.answers.insert(unit.to_string(), result);
        self
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Cancel `token` when `unit` is probed, as a signal arriving mid-run would
    fn cancel_at(mut self, unit: &str, token: CancellationToken) -> Self {
        self.cancel_at = Some((unit.to_string(), token));
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Strategy for Table {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn probe(&self, unit: &WorkUnit, _ctx: &ProbeContext<'_>) -> ProbeResult {
        self.calls.lock().unwrap().push(unit.id.clone());
        if let Some((at, token)) = &self.cancel_at {
            if *at == unit.id {
                token.cancel();
            }
        }
        if !self.delay.is_zero() {
            // Later units finish first
            let factor = 1 + (unit.id.len() % 3) as u32;
            tokio::time::sleep(self.delay * factor).await;
        }
        self.answers
            .get(&unit.id)
            .cloned()
            .unwrap_or_else(|| ProbeResult::not_found(&self.descriptor.tag))
    }
}

fn chain(strategies: Vec<Arc<dyn Strategy>>, ceiling: usize) -> Arc<StrategyChain> {
    Arc::new(
        StrategyChain::new(strategies, Arc::new(Scheduler::new(ceiling)), Arc::new(NoNetwork))
            .unwrap(),
    )
}

fn units(names: &[&str]) -> Vec<WorkUnit> {
    names.iter().map(|n| WorkUnit::new(*n)).collect()
}

/// Scores a per-unit candidate list with the default match policy
struct Ranked {
    descriptor: StrategyDescriptor,
    policy: MatchPolicy,
    candidates: HashMap<String, Result<Vec<Candidate>, ProbeError>>,
}

impl Ranked {
    fn new(tag: &str) -> Self {
        Self {
            descriptor: StrategyDescriptor::new(tag, tag, Duration::from_secs(1)),
            policy: MatchPolicy::default(),
            candidates: HashMap::new(),
        }
    }

    fn candidates(mut self, unit: &str, scored: &[(&str, f64)]) -> Self {
        let list = scored
            .iter()
            .map(|(label, score)| {
                Candidate::new(*label, *score).with_value(format!("https://{}/{}", self.descriptor.tag, label))
            })
            .collect();
        self.candidates.insert(unit.to_string(), Ok(list));
        self
    }

    fn fails(mut self, unit: &str, error: ProbeError) -> Self {
        self.candidates.insert(unit.to_string(), Err(error));
        self
    }
}

#[async_trait]
impl Strategy for Ranked {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn probe(&self, unit: &WorkUnit, ctx: &ProbeContext<'_>) -> ProbeResult {
        let mut candidates = match self.candidates.get(&unit.id) {
            Some(Ok(list)) => list.clone(),
            Some(Err(e)) => return ProbeResult::error(ctx.tag(), e.clone()),
            None => Vec::new(),
        };
        let result = match self.policy.rank_and_classify(&mut candidates) {
            MatchDecision::Found { tier, score } => {
                let value = candidates[0].value.clone().unwrap_or_default();
                ProbeResult::found(ctx.tag(), value, score, tier)
            }
            MatchDecision::Ambiguous { score } => ProbeResult::ambiguous(ctx.tag(), score),
            MatchDecision::NotFound { .. } => ProbeResult::not_found(ctx.tag()),
        };
        result.with_candidates(candidates)
    }
}

/// The comparable part of every outcome, in input order
fn outcome_set(report: &RunReport) -> Vec<(String, OutcomeStatus, Option<String>, Option<String>, f64)> {
    report
        .outcomes
        .iter()
        .map(|o| {
            (
                o.unit_id.clone(),
                o.status,
                o.value.clone(),
                o.source_tag.clone(),
                o.confidence,
            )
        })
        .collect()
}

fn two_sources() -> (Arc<Table>, Arc<Table>) {
    let s1 = Arc::new(
        Table::new("s1").answer("Alpha", ProbeResult::found_exact("s1", "https://s1/alpha.jpg")),
    );
    let s2 = Arc::new(Table::new("s2").answer(
        "Beta",
        ProbeResult::found("s2", "https://s2/beta.jpg", 0.8, MatchTier::Fuzzy),
    ));
    (s1, s2)
}

#[tokio::test]
async fn test_fallthrough_end_to_end() {
    let (s1, s2) = two_sources();
    let store = MemoryStore::new();
    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![s1.clone(), s2.clone()], 2),
        store.clone(),
    );

    let report = aggregator.run(units(&["Alpha", "Beta", "Gamma"])).await.unwrap();

    let alpha = report.outcome("Alpha").unwrap();
    assert_eq!(alpha.status, OutcomeStatus::Found);
    assert_eq!(alpha.tier, Some(MatchTier::Exact));
    assert_eq!(alpha.source_tag.as_deref(), Some("s1"));

    let beta = report.outcome("Beta").unwrap();
    assert_eq!(beta.status, OutcomeStatus::Found);
    assert_eq!(beta.tier, Some(MatchTier::Fuzzy));
    assert_eq!(beta.source_tag.as_deref(), Some("s2"));

    let gamma = report.outcome("Gamma").unwrap();
    assert_eq!(gamma.status, OutcomeStatus::Missing);
    assert_eq!(gamma.source_tag, None);

    // s2 never sees a unit s1 already found
    assert!(!s2.calls().contains(&"Alpha".to_string()));
    assert_eq!(report.counts.found, 2);
    assert_eq!(report.counts.missing, 1);
    assert_eq!(report.found_by_source.get("s1"), Some(&1));
    assert_eq!(report.next_index, 3);
    assert!(report.is_complete());
    assert_eq!(store.checkpoint().unwrap().next_index, 3);
    assert_eq!(store.cache().len(), 3);
    assert_eq!(store.log().len(), 3);
}

#[tokio::test]
async fn test_scored_sources_with_erroring_first_source() {
    let s1 = Arc::new(
        Ranked::new("s1")
            .candidates("Alpha", &[("Alpha", 0.99)])
            .fails("Beta", ProbeError::Timeout)
            .fails("Gamma", ProbeError::HttpStatus(503)),
    );
    let s2 = Arc::new(Ranked::new("s2").candidates("Beta", &[("Beta", 0.7), ("Betula", 0.3)]));
    let store = MemoryStore::new();

    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![s1, s2], 2),
        store.clone(),
    );
    let report = aggregator.run(units(&["Alpha", "Beta", "Gamma"])).await.unwrap();

    let alpha = report.outcome("Alpha").unwrap();
    assert_eq!(alpha.status, OutcomeStatus::Found);
    assert_eq!(alpha.tier, Some(MatchTier::Exact));
    assert_eq!(alpha.source_tag.as_deref(), Some("s1"));

    let beta = report.outcome("Beta").unwrap();
    assert_eq!(beta.status, OutcomeStatus::Found);
    assert_eq!(beta.tier, Some(MatchTier::Fuzzy));
    assert_eq!(beta.source_tag.as_deref(), Some("s2"));
    assert_eq!(beta.value.as_deref(), Some("https://s2/Beta"));
    assert!((beta.confidence - 0.7).abs() < 1e-9);

    // s1 failed, s2 answered with a confirmed absence
    let gamma = report.outcome("Gamma").unwrap();
    assert_eq!(gamma.status, OutcomeStatus::Missing);
    assert_eq!(gamma.source_tag, None);

    assert_eq!(report.counts.found, 2);
    assert_eq!(report.counts.missing, 1);
    assert_eq!(report.counts.error, 0);
    assert_eq!(store.checkpoint().unwrap().next_index, 3);
}

#[tokio::test]
async fn test_outcomes_follow_input_order() {
    let (s1, s2) = two_sources();
    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![s1, s2], 4),
        MemoryStore::new(),
    );
    let report = aggregator
        .run(units(&["Gamma", "Beta", "Alpha", "Delta"]))
        .await
        .unwrap();
    let ids: Vec<&str> = report.outcomes.iter().map(|o| o.unit_id.as_str()).collect();
    assert_eq!(ids, vec!["Gamma", "Beta", "Alpha", "Delta"]);
}

#[tokio::test]
async fn test_resume_processes_each_unit_once() {
    let (s1, s2) = two_sources();
    let chain = chain(vec![s1.clone(), s2], 1);
    let store = MemoryStore::new();
    let names = ["Alpha", "Beta", "Gamma"];

    let mut first = Aggregator::new("images", CacheKeying::StrictName, chain.clone(), store.clone())
        .with_options(RunOptions {
            max_units: Some(2),
            ..RunOptions::default()
        });
    let partial = first.run(units(&names)).await.unwrap();
    assert_eq!(partial.next_index, 2);
    assert_eq!(partial.counts.pending, 1);
    assert!(!partial.is_complete());

    let mut second = Aggregator::new("images", CacheKeying::StrictName, chain, store.clone())
        .with_options(RunOptions {
            resume: true,
            ..RunOptions::default()
        });
    let report = second.run(units(&names)).await.unwrap();

    assert_eq!(report.start_index, 2);
    assert_eq!(report.processed_this_run, 1);
    assert_eq!(report.next_index, 3);
    assert_eq!(report.counts.found, 2);
    assert_eq!(report.counts.missing, 1);
    assert_eq!(report.counts.pending, 0);
    assert_eq!(s1.calls(), vec!["Alpha", "Beta", "Gamma"]);
}

#[tokio::test]
async fn test_cancelled_then_resumed_matches_single_pass() {
    let names: Vec<String> = (0..10).map(|i| format!("{}{}", "c".repeat(i % 4 + 1), i)).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();
    let table = |tag: &str| {
        Table::new(tag)
            .with_delay(Duration::from_millis(5))
            .answer(names[1], ProbeResult::found_exact(tag, "https://s/1.jpg"))
            .answer(names[4], ProbeResult::found(tag, "https://s/4.jpg", 0.82, MatchTier::Fuzzy))
            .answer(names[8], ProbeResult::ambiguous(tag, 0.91))
    };

    let single = Arc::new(table("s1"));
    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![single], 3),
        MemoryStore::new(),
    );
    let expected = aggregator.run(units(&names)).await.unwrap();
    assert!(expected.is_complete());

    let cancel = CancellationToken::new();
    let interrupted_source = Arc::new(table("s1").cancel_at(names[3], cancel.clone()));
    let store = MemoryStore::new();
    let mut first = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![interrupted_source.clone()], 3),
        store.clone(),
    )
    .with_cancel(cancel);
    let partial = first.run(units(&names)).await.unwrap();
    assert!(partial.interrupted);
    assert!(partial.next_index < names.len());

    let resumed_source = Arc::new(table("s1"));
    let mut second = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![resumed_source.clone()], 3),
        store.clone(),
    )
    .with_options(RunOptions {
        resume: true,
        ..RunOptions::default()
    });
    let resumed = second.run(units(&names)).await.unwrap();

    assert!(resumed.is_complete());
    assert_eq!(outcome_set(&resumed), outcome_set(&expected));

    // Units finished before the interruption are not probed again
    let mut probed = interrupted_source.calls();
    probed.extend(resumed_source.calls());
    probed.sort();
    let mut all: Vec<String> = names.iter().map(|n| n.to_string()).collect();
    all.sort();
    assert_eq!(probed, all);
}

#[tokio::test]
async fn test_cached_outcome_skips_strategies() {
    let (s1, s2) = two_sources();
    let cached = Outcome::from_probe(
        "Alpha",
        OutcomeStatus::Found,
        ProbeResult::found_exact("earlier", "https://cached/alpha.jpg"),
    );
    let store = MemoryStore::new().with_cached("alpha", cached);

    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![s1.clone(), s2], 2),
        store.clone(),
    )
    .with_options(RunOptions {
        resume: true,
        ..RunOptions::default()
    });
    let report = aggregator.run(units(&["Alpha", "Beta"])).await.unwrap();

    assert!(!s1.calls().contains(&"Alpha".to_string()));
    assert_eq!(report.cache_hits, 1);
    assert_eq!(
        report.outcome("Alpha").unwrap().value.as_deref(),
        Some("https://cached/alpha.jpg")
    );
    let log = store.log();
    assert!(log.iter().any(|e| e.unit_id == "Alpha" && e.from_cache));
}

#[tokio::test]
async fn test_fresh_run_discards_previous_cache() {
    let (s1, s2) = two_sources();
    let stale = Outcome::unresolved("Alpha", OutcomeStatus::Missing);
    let store = MemoryStore::new().with_cached("alpha", stale);

    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![s1.clone(), s2], 2),
        store,
    );
    let report = aggregator.run(units(&["Alpha"])).await.unwrap();
    assert_eq!(report.outcome("Alpha").unwrap().status, OutcomeStatus::Found);
    assert_eq!(s1.calls(), vec!["Alpha"]);
}

#[tokio::test]
async fn test_retry_errors_reprobes_failed_units() {
    let (s1, s2) = two_sources();
    let mut failed = Outcome::unresolved("Alpha", OutcomeStatus::Error);
    failed.error = Some("s1: timeout".into());
    let missing = Outcome::unresolved("Gamma", OutcomeStatus::Missing);
    let store = MemoryStore::new()
        .with_cached("alpha", failed)
        .with_cached("gamma", missing);

    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![s1.clone(), s2], 1),
        store,
    )
    .with_options(RunOptions {
        resume: true,
        retry_errors: true,
        ..RunOptions::default()
    });
    let report = aggregator.run(units(&["Alpha", "Gamma"])).await.unwrap();

    assert_eq!(s1.calls(), vec!["Alpha"]);
    assert_eq!(report.outcome("Alpha").unwrap().status, OutcomeStatus::Found);
    assert_eq!(report.cache_hits, 1);
}

#[tokio::test]
async fn test_duplicate_units_processed_once() {
    let (s1, s2) = two_sources();
    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![s1.clone(), s2], 2),
        MemoryStore::new(),
    );
    let report = aggregator
        .run(units(&["Alpha", "alpha", " Alpha "]))
        .await
        .unwrap();
    assert_eq!(report.total_units, 1);
    assert_eq!(s1.calls().len(), 1);
}

#[tokio::test]
async fn test_checkpoint_is_monotonic_under_concurrency() {
    let slow = Arc::new(Table::new("slow").with_delay(Duration::from_millis(5)));
    let store = MemoryStore::new();
    let names: Vec<String> = (0..20).map(|i| format!("{}{}", "u".repeat(i % 5 + 1), i)).collect();
    let names: Vec<&str> = names.iter().map(String::as_str).collect();

    let mut aggregator = Aggregator::new(
        "link-audit",
        CacheKeying::StrictName,
        chain(vec![slow], 4),
        store.clone(),
    );
    let report = aggregator.run(units(&names)).await.unwrap();

    let history = store.checkpoint_history();
    assert!(history.windows(2).all(|w| w[0] <= w[1]), "{:?}", history);
    assert_eq!(history.last(), Some(&20));
    assert_eq!(report.next_index, 20);
    assert_eq!(report.counts.missing, 20);
}

#[tokio::test]
async fn test_store_failure_aborts_run() {
    let (s1, s2) = two_sources();
    let store = MemoryStore::new();
    store.fail_writes();

    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![s1, s2], 2),
        store,
    )
    .with_options(RunOptions {
        resume: true,
        ..RunOptions::default()
    });
    let result = aggregator.run(units(&["Alpha", "Beta"])).await;
    assert!(matches!(result, Err(EnrichError::Store(_))));
}

#[tokio::test]
async fn test_cancelled_run_dispatches_nothing() {
    let (s1, s2) = two_sources();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![s1.clone(), s2], 2),
        MemoryStore::new(),
    )
    .with_cancel(cancel);
    let report = aggregator.run(units(&["Alpha", "Beta"])).await.unwrap();

    assert!(report.interrupted);
    assert_eq!(report.next_index, 0);
    assert_eq!(report.counts.pending, 2);
    assert!(s1.calls().is_empty());
}

#[tokio::test]
async fn test_lifecycle_events() {
    let (s1, s2) = two_sources();
    let bus = EventBus::new(32);
    let mut rx = bus.subscribe();

    let mut aggregator = Aggregator::new(
        "images",
        CacheKeying::StrictName,
        chain(vec![s1, s2], 1),
        MemoryStore::new(),
    )
    .with_events(bus);
    aggregator.run(units(&["Alpha", "Gamma"])).await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(matches!(events.first(), Some(SyncEvent::RunStarted { total: 2, .. })));
    assert!(matches!(
        events.last(),
        Some(SyncEvent::RunCompleted {
            next_index: 2,
            interrupted: false,
            ..
        })
    ));
    let completed = events
        .iter()
        .filter(|e| matches!(e, SyncEvent::UnitCompleted { .. }))
        .count();
    assert_eq!(completed, 2);
}

#[tokio::test]
async fn test_url_keyed_job_uses_url_as_key() {
    struct Echo {
        descriptor: StrategyDescriptor,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Strategy for Echo {
        fn descriptor(&self) -> &StrategyDescriptor {
            &self.descriptor
        }

        async fn probe(&self, unit: &WorkUnit, _ctx: &ProbeContext<'_>) -> ProbeResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            ProbeResult::found_exact("echo", format!("names for {}", unit.id))
        }
    }

    let echo = Arc::new(Echo {
        descriptor: StrategyDescriptor::new("echo", "echo", Duration::from_secs(1)),
        calls: AtomicUsize::new(0),
    });
    let store = MemoryStore::new();
    let mut aggregator = Aggregator::new(
        "chinese-names",
        CacheKeying::Url,
        chain(vec![echo.clone()], 2),
        store.clone(),
    );
    aggregator
        .run(units(&["https://camellia.iflora.cn/a", "https://camellia.iflora.cn/A"]))
        .await
        .unwrap();

    // URLs are case-sensitive keys
    assert_eq!(echo.calls.load(Ordering::SeqCst), 2);
    assert!(store.cache().contains_key("https://camellia.iflora.cn/A"));
}
