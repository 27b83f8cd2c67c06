//! Search-form probe (ACCS Camelliae Floris Bibliotheca search)
//!
//! Posts the name to the search form and reads the result thumbnails. Only an
//! alt text equal to the query (strict-key) is accepted; results without such
//! a thumbnail make the unit ambiguous.

use super::parsers::{AltTextImageParser, PageParser};
use super::{Attempts, BROWSER_USER_AGENT};
use crate::fetch::FetchRequest;
use crate::normalize::strict_key;
use crate::scoring::MatchPolicy;
use crate::strategy::{ProbeContext, Strategy, StrategyDescriptor};
use crate::types::{Candidate, ProbeResult, WorkUnit};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

pub const ACCS_SEARCH_URL: &str =
    "https://www.atlanticcoastcamelliasociety.org/Camelliae%20Floris%20Bibliotheca/ACS%20CFB-search.php?go";

pub const ACCS_IMAGE_BASE: &str =
    "https://www.atlanticcoastcamelliasociety.org/Camelliae%20Floris%20Bibliotheca/";

pub struct SearchFormStrategy {
    descriptor: StrategyDescriptor,
    search_url: String,
    image_base: String,
    policy: MatchPolicy,
}

impl SearchFormStrategy {
    pub fn new(timeout: Duration, policy: MatchPolicy) -> Self {
        Self {
            descriptor: StrategyDescriptor::new("accs", "accs", timeout),
            search_url: ACCS_SEARCH_URL.to_string(),
            image_base: ACCS_IMAGE_BASE.to_string(),
            policy,
        }
    }

    pub fn with_urls(mut self, search_url: impl Into<String>, image_base: impl Into<String>) -> Self {
        self.search_url = search_url.into();
        self.image_base = image_base.into();
        self
    }

    fn image_url(&self, src: &str) -> String {
        format!("{}{}", self.image_base, src.replace(' ', "%20"))
    }
}

#[async_trait]
impl Strategy for SearchFormStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn probe(&self, unit: &WorkUnit, ctx: &ProbeContext<'_>) -> ProbeResult {
        let mut attempts = Attempts::default();

        for variant in &unit.query_variants {
            attempts.query(variant);
            let request = FetchRequest::post_form(
                self.search_url.clone(),
                vec![
                    ("name".to_string(), variant.clone()),
                    ("submit".to_string(), "Search".to_string()),
                ],
            )
            .with_header("User-Agent", BROWSER_USER_AGENT);

            let response = match ctx.fetch(request).await.and_then(|r| r.require_success()) {
                Ok(response) => response,
                Err(e) => {
                    attempts.failed(e);
                    continue;
                }
            };
            attempts.answered();

            let Some(images) = AltTextImageParser.parse(&response.body) else {
                debug!(unit = %unit.id, query = %variant, "No search results");
                continue;
            };

            let wanted = strict_key(variant);
            if let Some(hit) = images.iter().find(|img| strict_key(&img.alt) == wanted) {
                return ProbeResult::found_exact(ctx.tag(), self.image_url(&hit.src))
                    .with_http_status(response.status)
                    .with_queries(attempts.queries());
            }

            let mut candidates: Vec<Candidate> = images
                .iter()
                .map(|img| {
                    Candidate::new(img.alt.clone(), self.policy.score(&unit.id, &img.alt))
                        .with_value(self.image_url(&img.src))
                })
                .collect();
            self.policy.rank_and_classify(&mut candidates);
            let top = candidates.first().map_or(0.0, |c| c.score);

            return ProbeResult::ambiguous(ctx.tag(), top)
                .with_http_status(response.status)
                .with_candidates(candidates)
                .with_queries(attempts.queries());
        }

        attempts.miss(ctx.tag())
    }
}
