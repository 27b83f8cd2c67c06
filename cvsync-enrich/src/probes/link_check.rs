//! Encyclopedia link check and recovery (ACS)
//!
//! A link is valid when it answers 200 with a non-empty body. Broken links
//! are recovered by trying the deterministic slug URL, then a few slug
//! variations. The recovery method is recorded in the result's `values`.

use super::Attempts;
use crate::fetch::FetchRequest;
use crate::normalize::{fold_diacritics, slugify, without_parenthetical};
use crate::strategy::{ProbeContext, Strategy, StrategyDescriptor};
use crate::types::{MatchTier, ProbeResult, WorkUnit};
use async_trait::async_trait;
use std::time::Duration;

pub const ACS_ENCYCLOPEDIA_BASE: &str =
    "https://www.americancamellias.com/education-and-camellia-care/acs-camellia-encyclopedia";

/// Record field holding the link under audit
pub const ACS_URL_FIELD: &str = "acs_url";

pub const METHOD_ORIGINAL: &str = "original";
pub const METHOD_DETERMINISTIC: &str = "deterministic_slug";

pub struct LinkCheckStrategy {
    descriptor: StrategyDescriptor,
    base_url: String,
}

impl LinkCheckStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            descriptor: StrategyDescriptor::new("acs_link", "acs", timeout),
            base_url: ACS_ENCYCLOPEDIA_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn letter_base(&self, name: &str) -> String {
        let letter = name
            .chars()
            .find(|c| c.is_alphanumeric())
            .map(|c| c.to_lowercase().to_string())
            .unwrap_or_default();
        format!("{}/camellias-beginning-with-{}", self.base_url, letter)
    }

    /// Deterministic encyclopedia URL for a name
    pub fn deterministic_url(&self, name: &str) -> String {
        format!("{}/{}", self.letter_base(name), slugify(name))
    }

    /// Recovery candidates after the deterministic URL, as `(method, url)`
    fn variation_urls(&self, name: &str, original_url: Option<&str>) -> Vec<(String, String)> {
        let slug = slugify(name);
        let mut slugs: Vec<String> = Vec::new();

        let no_paren = without_parenthetical(name);
        if no_paren != name {
            slugs.push(slugify(&no_paren));
        }
        if slug.contains("variegated") {
            slugs.push(slug.replace("variegated", "var"));
        }
        slugs.push(format!("{}-", slug));
        slugs.push(slugify(&fold_diacritics(name)));

        let original_slug = original_url.and_then(|u| u.trim_end_matches('/').rsplit('/').next());
        let base = self.letter_base(name);

        let mut out: Vec<(String, String)> = Vec::new();
        for candidate in slugs {
            if candidate.is_empty()
                || candidate == slug
                || Some(candidate.as_str()) == original_slug
                || out.iter().any(|(m, _)| m.ends_with(&format!(":{}", candidate)))
            {
                continue;
            }
            out.push((format!("variation:{}", candidate), format!("{}/{}", base, candidate)));
        }
        out
    }
}

enum Check {
    Valid(u16),
    Invalid,
}

async fn check(
    ctx: &ProbeContext<'_>,
    url: &str,
    attempts: &mut Attempts,
) -> Check {
    attempts.query(url);
    match ctx.fetch(FetchRequest::get(url)).await {
        Ok(response) => {
            attempts.answered();
            if response.status == 200 && !response.body.is_empty() {
                Check::Valid(response.status)
            } else {
                Check::Invalid
            }
        }
        Err(e) => {
            attempts.failed(e);
            Check::Invalid
        }
    }
}

#[async_trait]
impl Strategy for LinkCheckStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn probe(&self, unit: &WorkUnit, ctx: &ProbeContext<'_>) -> ProbeResult {
        let mut attempts = Attempts::default();
        let name = unit.id.trim();
        let original = unit
            .external_ref(ACS_URL_FIELD)
            .map(str::trim)
            .filter(|u| !u.is_empty());

        if let Some(url) = original {
            if let Check::Valid(status) = check(ctx, url, &mut attempts).await {
                return ProbeResult::found_exact(ctx.tag(), url)
                    .with_http_status(status)
                    .with_values(vec![METHOD_ORIGINAL.to_string()])
                    .with_queries(attempts.queries());
            }
        }

        let mut candidates = Vec::new();
        let deterministic = self.deterministic_url(name);
        if Some(deterministic.as_str()) != original {
            candidates.push((METHOD_DETERMINISTIC.to_string(), deterministic));
        }
        candidates.extend(self.variation_urls(name, original));

        for (method, url) in candidates {
            if let Check::Valid(status) = check(ctx, &url, &mut attempts).await {
                return ProbeResult::found(ctx.tag(), url, 1.0, MatchTier::Fuzzy)
                    .with_http_status(status)
                    .with_values(vec![method])
                    .with_queries(attempts.queries());
            }
        }

        attempts.miss(ctx.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::probes::testing::ScriptedFetcher;
    use crate::scheduler::Scheduler;
    use crate::types::ProbeStatus;

    const BASE: &str = "https://acs.test/enc";

    fn strategy() -> LinkCheckStrategy {
        LinkCheckStrategy::new(Duration::from_secs(1)).with_base_url(BASE)
    }

    #[test]
    fn test_deterministic_url() {
        assert_eq!(
            strategy().deterministic_url("Aaron's Ruby"),
            "https://acs.test/enc/camellias-beginning-with-a/aarons-ruby"
        );
    }

    #[test]
    fn test_variation_urls() {
        let variations = strategy().variation_urls("Alba Plena (Variegated)", None);
        let methods: Vec<&str> = variations.iter().map(|(m, _)| m.as_str()).collect();
        assert_eq!(
            methods,
            vec![
                "variation:alba-plena",
                "variation:alba-plena-var",
                "variation:alba-plena-variegated-",
            ]
        );

        let variations = strategy().variation_urls("Rosé", None);
        assert_eq!(
            variations.last().map(|(_, u)| u.as_str()),
            Some("https://acs.test/enc/camellias-beginning-with-r/rose")
        );
    }

    #[tokio::test]
    async fn test_valid_original_link() {
        let fetcher = ScriptedFetcher::new().route("/orig", 200, "<html>page</html>");
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let unit = WorkUnit::new("Debutante").with_ref(ACS_URL_FIELD, "https://acs.test/orig");
        let result = strategy.probe(&unit, &ctx).await;
        assert_eq!(result.status, ProbeStatus::Found);
        assert_eq!(result.tier, Some(MatchTier::Exact));
        assert_eq!(result.values, vec![METHOD_ORIGINAL.to_string()]);
        assert_eq!(fetcher.request_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_body_is_broken_and_slug_recovers() {
        let fetcher = ScriptedFetcher::new()
            .route("/orig", 200, "")
            .route("with-d/debutante", 200, "<html>page</html>");
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let unit = WorkUnit::new("Debutante").with_ref(ACS_URL_FIELD, "https://acs.test/orig");
        let result = strategy.probe(&unit, &ctx).await;
        assert_eq!(result.status, ProbeStatus::Found);
        assert_eq!(result.tier, Some(MatchTier::Fuzzy));
        assert_eq!(
            result.value.as_deref(),
            Some("https://acs.test/enc/camellias-beginning-with-d/debutante")
        );
        assert_eq!(result.values, vec![METHOD_DETERMINISTIC.to_string()]);
    }

    #[tokio::test]
    async fn test_unrecoverable_link_is_not_found() {
        let fetcher = ScriptedFetcher::new();
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let unit = WorkUnit::new("Ghost").with_ref(ACS_URL_FIELD, "https://acs.test/orig");
        let result = strategy.probe(&unit, &ctx).await;
        assert_eq!(result.status, ProbeStatus::NotFound);
        // original, deterministic, trailing-hyphen variation
        assert_eq!(result.queries_tried.len(), 3);
    }

    #[tokio::test]
    async fn test_all_transport_failures_is_error() {
        let fetcher = ScriptedFetcher::new().fail("acs.test", ProbeError::Timeout);
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let result = strategy.probe(&WorkUnit::new("Ghost"), &ctx).await;
        assert_eq!(result.status, ProbeStatus::Error);
    }
}
