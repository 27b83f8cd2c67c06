//! ICR name search probe (NameSearchList)
//!
//! Queries every variant, merges the returned names, then scores each
//! candidate's scientific name against the input and its separator-stripped
//! form. Classification is left to the [`MatchPolicy`].

use super::parsers::normalize_text;
use super::BROWSER_USER_AGENT;
use crate::fetch::FetchRequest;
use crate::normalize::strip_separators;
use crate::scoring::{MatchDecision, MatchPolicy};
use crate::strategy::{ProbeContext, Strategy, StrategyDescriptor};
use crate::types::{Candidate, ProbeResult, WorkUnit};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

pub const ICR_NAME_SEARCH_URL: &str = "https://camellia.iflora.cn/Cutivars/NameSearchList";

pub const ICR_DETAIL_BASE: &str = "https://camellia.iflora.cn/Cutivars/Detail?latin=";

/// Candidates kept on the outcome, best first
const MAX_CANDIDATES: usize = 10;

#[derive(Debug, Deserialize)]
struct NameSearchResponse {
    #[serde(default)]
    code: serde_json::Value,
    #[serde(default)]
    data: Option<Vec<NameEntry>>,
}

impl NameSearchResponse {
    fn is_ok(&self) -> bool {
        match &self.code {
            serde_json::Value::String(s) => s == "0",
            serde_json::Value::Number(n) => n.as_i64() == Some(0),
            _ => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct NameEntry {
    #[serde(rename = "ScientificName", default)]
    scientific_name: String,
    #[serde(rename = "AcceptedName", default)]
    accepted_name: String,
    #[serde(rename = "Status", default)]
    status: String,
}

pub struct IcrNameSearchStrategy {
    descriptor: StrategyDescriptor,
    api_url: String,
    detail_base: String,
    policy: MatchPolicy,
}

impl IcrNameSearchStrategy {
    pub fn new(timeout: Duration, policy: MatchPolicy) -> Self {
        Self {
            descriptor: StrategyDescriptor::new("icr_name_search", "icr", timeout).rate_limited(),
            api_url: ICR_NAME_SEARCH_URL.to_string(),
            detail_base: ICR_DETAIL_BASE.to_string(),
            policy,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn detail_url(&self, accepted_name: &str) -> Option<String> {
        (!accepted_name.is_empty())
            .then(|| format!("{}{}", self.detail_base, urlencoding::encode(accepted_name)))
    }

    fn score(&self, name: &str, plain: &str, scientific_name: &str) -> f64 {
        let direct = self.policy.score(name, scientific_name);
        if plain == name {
            return direct;
        }
        direct.max(self.policy.score(plain, scientific_name))
    }
}

#[async_trait]
impl Strategy for IcrNameSearchStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn probe(&self, unit: &WorkUnit, ctx: &ProbeContext<'_>) -> ProbeResult {
        let mut entries: Vec<NameEntry> = Vec::new();
        let mut queries: Vec<String> = Vec::new();

        for variant in &unit.query_variants {
            queries.push(variant.clone());
            let request = FetchRequest::post_form(
                self.api_url.clone(),
                vec![
                    ("latin".to_string(), variant.clone()),
                    ("page".to_string(), "1".to_string()),
                    ("limit".to_string(), "50".to_string()),
                ],
            )
            .with_header("User-Agent", BROWSER_USER_AGENT)
            .with_header("X-Requested-With", "XMLHttpRequest")
            .with_header("Accept", "application/json, text/javascript, */*; q=0.01");

            // A failed query leaves the candidate set incomplete
            let parsed = ctx
                .fetch(request)
                .await
                .and_then(|r| r.require_success())
                .and_then(|r| r.json::<NameSearchResponse>());
            let body = match parsed {
                Ok(body) => body,
                Err(e) => return ProbeResult::error(ctx.tag(), e).with_queries(queries),
            };

            if !body.is_ok() {
                continue;
            }
            for entry in body.data.unwrap_or_default() {
                let duplicate = entries.iter().any(|e| {
                    e.scientific_name == entry.scientific_name
                        && e.accepted_name == entry.accepted_name
                });
                if !duplicate {
                    entries.push(entry);
                }
            }
        }

        let name = unit.id.trim();
        let plain = strip_separators(name);
        let mut candidates: Vec<Candidate> = entries
            .iter()
            .map(|entry| {
                let score = self.score(name, &plain, &entry.scientific_name);
                let mut candidate = Candidate::new(entry.scientific_name.clone(), round4(score))
                    .with_extra("accepted_name", entry.accepted_name.clone())
                    .with_extra("status", normalize_text(&entry.status));
                if let Some(url) = self.detail_url(&entry.accepted_name) {
                    candidate = candidate.with_value(url);
                }
                candidate
            })
            .collect();

        let decision = self.policy.rank_and_classify(&mut candidates);
        candidates.truncate(MAX_CANDIDATES);
        // Entries without an accepted name have no detail page; report the label
        let top_value = candidates
            .first()
            .map(|c| c.value.clone().unwrap_or_else(|| c.label.clone()));

        let result = match decision {
            MatchDecision::Found { tier, score } => {
                ProbeResult::found(ctx.tag(), top_value.unwrap_or_default(), score, tier)
            }
            MatchDecision::Ambiguous { score } => {
                let result = ProbeResult::ambiguous(ctx.tag(), score);
                match top_value {
                    Some(url) => result.with_value(url),
                    None => result,
                }
            }
            MatchDecision::NotFound { best } => {
                let mut result = ProbeResult::not_found(ctx.tag());
                result.score = best.unwrap_or(0.0);
                result
            }
        };

        result.with_candidates(candidates).with_queries(queries)
    }
}

fn round4(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}
