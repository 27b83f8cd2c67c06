//! Core data types for the enrichment pipeline
//!
//! - [`WorkUnit`]: one record to enrich or audit (immutable for a run)
//! - [`ProbeResult`]: transient result of one strategy attempt
//! - [`Outcome`]: final per-unit result, persisted in the cache

use crate::error::ProbeError;
use crate::normalize::strict_key;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

// ============================================================================
// Work units
// ============================================================================

/// One record undergoing enrichment/audit in a run
///
/// Identity is `id`; ids are unique within a run (see [`dedupe_units`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkUnit {
    /// Record name or unique key (a URL for URL-keyed jobs)
    pub id: String,
    /// Ordered query variants, tried in order by strategies that search
    pub query_variants: Vec<String>,
    /// Known URL fields of the record (e.g. `acs_url`, `icr_url`)
    pub external_refs: BTreeMap<String, String>,
}

impl WorkUnit {
    /// Unit whose only query variant is the id itself
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            query_variants: vec![id.clone()],
            id,
            external_refs: BTreeMap::new(),
        }
    }

    /// Unit with explicit query variants (empty variants fall back to the id)
    pub fn with_variants(id: impl Into<String>, variants: Vec<String>) -> Self {
        let mut unit = Self::new(id);
        if !variants.is_empty() {
            unit.query_variants = variants;
        }
        unit
    }

    /// Attach a known URL field
    pub fn with_ref(mut self, field: impl Into<String>, url: impl Into<String>) -> Self {
        self.external_refs.insert(field.into(), url.into());
        self
    }

    /// Look up a known URL field
    pub fn external_ref(&self, field: &str) -> Option<&str> {
        self.external_refs.get(field).map(String::as_str)
    }

    /// Stable cache key for this unit
    pub fn cache_key(&self, keying: CacheKeying) -> String {
        match keying {
            CacheKeying::StrictName => strict_key(&self.id),
            CacheKeying::Url => self.id.trim().to_string(),
        }
    }
}

/// How a job derives cache keys from units
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheKeying {
    /// Strict-key of the record name
    StrictName,
    /// Canonical (trimmed) URL; the unit id is the URL
    Url,
}

/// Drop units whose cache key repeats an earlier unit (first occurrence wins)
pub fn dedupe_units(units: Vec<WorkUnit>, keying: CacheKeying) -> Vec<WorkUnit> {
    let mut seen = HashSet::new();
    units
        .into_iter()
        .filter(|u| seen.insert(u.cache_key(keying)))
        .collect()
}

// ============================================================================
// Probe results
// ============================================================================

/// Match quality for Found results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchTier {
    Exact,
    Fuzzy,
}

/// Status of one strategy attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeStatus {
    Found,
    Ambiguous,
    NotFound,
    Error,
}

impl ProbeStatus {
    /// Found and Ambiguous stop the chain
    pub fn is_definitive(self) -> bool {
        matches!(self, ProbeStatus::Found | ProbeStatus::Ambiguous)
    }
}

/// Scored candidate returned by a search-style source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Name as it appears in the reference source
    pub label: String,
    /// Payload if this candidate were chosen (URL, etc.)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Similarity to the unit's name, 0.0-1.0
    pub score: f64,
    /// Source-specific fields (accepted name, status, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Candidate {
    pub fn new(label: impl Into<String>, score: f64) -> Self {
        Self {
            label: label.into(),
            value: None,
            score,
            extra: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// Outcome of one strategy attempt
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub status: ProbeStatus,
    /// Primary payload (URL, name, ...)
    pub value: Option<String>,
    /// Multi-valued payload (e.g. several localized names)
    pub values: Vec<String>,
    /// Confidence, 0.0 when not applicable
    pub score: f64,
    pub tier: Option<MatchTier>,
    pub error: Option<ProbeError>,
    /// Strategy that produced this result
    pub source_tag: String,
    pub http_status: Option<u16>,
    /// Ranked candidates (search-style sources only)
    pub candidates: Vec<Candidate>,
    /// Query variants actually sent
    pub queries_tried: Vec<String>,
}

impl ProbeResult {
    fn with_status(source_tag: &str, status: ProbeStatus) -> Self {
        Self {
            status,
            value: None,
            values: Vec::new(),
            score: 0.0,
            tier: None,
            error: None,
            source_tag: source_tag.to_string(),
            http_status: None,
            candidates: Vec::new(),
            queries_tried: Vec::new(),
        }
    }

    /// Found with the given tier and confidence
    pub fn found(source_tag: &str, value: impl Into<String>, score: f64, tier: MatchTier) -> Self {
        let mut result = Self::with_status(source_tag, ProbeStatus::Found);
        result.value = Some(value.into());
        result.score = score.clamp(0.0, 1.0);
        result.tier = Some(tier);
        result
    }

    /// Exact match (confidence 1.0)
    pub fn found_exact(source_tag: &str, value: impl Into<String>) -> Self {
        Self::found(source_tag, value, 1.0, MatchTier::Exact)
    }

    /// Several candidates too close to call
    pub fn ambiguous(source_tag: &str, score: f64) -> Self {
        let mut result = Self::with_status(source_tag, ProbeStatus::Ambiguous);
        result.score = score.clamp(0.0, 1.0);
        result
    }

    /// Confirmed absence after a valid response
    pub fn not_found(source_tag: &str) -> Self {
        Self::with_status(source_tag, ProbeStatus::NotFound)
    }

    /// Transport/parse failure converted at the probe boundary
    pub fn error(source_tag: &str, error: ProbeError) -> Self {
        let mut result = Self::with_status(source_tag, ProbeStatus::Error);
        result.http_status = error.http_status();
        result.error = Some(error);
        result
    }

    pub fn with_values(mut self, values: Vec<String>) -> Self {
        self.values = values;
        self
    }

    pub fn with_http_status(mut self, status: u16) -> Self {
        self.http_status = Some(status);
        self
    }

    pub fn with_candidates(mut self, candidates: Vec<Candidate>) -> Self {
        self.candidates = candidates;
        self
    }

    pub fn with_queries(mut self, queries: Vec<String>) -> Self {
        self.queries_tried = queries;
        self
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }
}

// ============================================================================
// Outcomes
// ============================================================================

/// Final per-unit status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Found,
    Ambiguous,
    Missing,
    Error,
}

impl OutcomeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            OutcomeStatus::Found => "found",
            OutcomeStatus::Ambiguous => "ambiguous",
            OutcomeStatus::Missing => "missing",
            OutcomeStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Final result for one unit; immutable once written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Outcome {
    pub unit_id: String,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    /// Strategy that decided the outcome
    #[serde(default)]
    pub source_tag: Option<String>,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub tier: Option<MatchTier>,
    pub fetched_at: DateTime<Utc>,
    #[serde(default)]
    pub http_status: Option<u16>,
    /// Error details for `Error` outcomes (one entry per failed strategy)
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub queries_tried: Vec<String>,
}

impl Outcome {
    /// Build an outcome from the probe result that decided it
    pub fn from_probe(unit_id: &str, status: OutcomeStatus, probe: ProbeResult) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            status,
            value: probe.value,
            values: probe.values,
            source_tag: Some(probe.source_tag),
            confidence: probe.score,
            tier: probe.tier,
            fetched_at: Utc::now(),
            http_status: probe.http_status,
            error: probe.error.map(|e| e.to_string()),
            candidates: probe.candidates,
            queries_tried: probe.queries_tried,
        }
    }

    /// Outcome with no deciding strategy (empty chain, every strategy errored, ...)
    pub fn unresolved(unit_id: &str, status: OutcomeStatus) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            status,
            value: None,
            values: Vec::new(),
            source_tag: None,
            confidence: 0.0,
            tier: None,
            fetched_at: Utc::now(),
            http_status: None,
            error: None,
            candidates: Vec::new(),
            queries_tried: Vec::new(),
        }
    }
}
