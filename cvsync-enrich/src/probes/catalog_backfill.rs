//! ACS link backfill from the encyclopedia catalog
//!
//! Records are matched to catalog entries by strict key only. The catalog
//! URL is validated before it is reported, unless the record already links
//! to it. The classification is the first entry of the result's `values`:
//!
//! | Class              | Status   | Meaning                                   |
//! |--------------------|----------|-------------------------------------------|
//! | `kept`             | Found    | record already holds the catalog URL      |
//! | `added`            | Found    | record had no link, catalog URL is live   |
//! | `replaced`         | Found    | record link differs, catalog URL is live  |
//! | `added_invalid`    | NotFound | catalog URL did not validate              |
//! | `replaced_invalid` | NotFound | catalog URL did not validate              |
//! | `unmatched`        | NotFound | no catalog entry with the same key        |

use super::link_check::ACS_URL_FIELD;
use super::ReferenceCache;
use crate::fetch::FetchRequest;
use crate::strategy::{ProbeContext, Strategy, StrategyDescriptor};
use crate::types::{ProbeResult, WorkUnit};
use async_trait::async_trait;
use std::time::Duration;

pub const CLASS_KEPT: &str = "kept";
pub const CLASS_ADDED: &str = "added";
pub const CLASS_REPLACED: &str = "replaced";
pub const CLASS_UNMATCHED: &str = "unmatched";

/// Live encyclopedia pages are substantial; anything shorter is a stub
pub const MIN_PAGE_BYTES: usize = 500;

pub struct CatalogBackfillStrategy {
    descriptor: StrategyDescriptor,
    catalog: ReferenceCache,
}

impl CatalogBackfillStrategy {
    pub fn new(timeout: Duration, catalog: ReferenceCache) -> Self {
        Self {
            descriptor: StrategyDescriptor::new("acs_catalog", "acs", timeout).short_circuit(),
            catalog,
        }
    }

    fn current_url(unit: &WorkUnit) -> Option<&str> {
        unit.external_ref(ACS_URL_FIELD)
            .map(str::trim)
            .filter(|u| !u.is_empty())
    }
}

#[async_trait]
impl Strategy for CatalogBackfillStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    /// Answers without a request when there is nothing to validate
    fn cached(&self, unit: &WorkUnit) -> Option<ProbeResult> {
        let tag = &self.descriptor.tag;
        match self.catalog.get(&unit.id) {
            None => Some(ProbeResult::not_found(tag).with_values(vec![CLASS_UNMATCHED.to_string()])),
            Some(url) if Self::current_url(unit) == Some(url) => {
                Some(ProbeResult::found_exact(tag, url).with_values(vec![CLASS_KEPT.to_string()]))
            }
            Some(_) => None,
        }
    }

    async fn probe(&self, unit: &WorkUnit, ctx: &ProbeContext<'_>) -> ProbeResult {
        let Some(url) = self.catalog.get(&unit.id) else {
            return ProbeResult::not_found(ctx.tag()).with_values(vec![CLASS_UNMATCHED.to_string()]);
        };

        let current = Self::current_url(unit);
        if current == Some(url) {
            return ProbeResult::found_exact(ctx.tag(), url).with_values(vec![CLASS_KEPT.to_string()]);
        }

        let mut values = match current {
            Some(old) => vec![CLASS_REPLACED.to_string(), old.to_string()],
            None => vec![CLASS_ADDED.to_string()],
        };

        match ctx.fetch(FetchRequest::get(url)).await {
            Ok(response) if response.status == 200 && response.body.len() > MIN_PAGE_BYTES => {
                ProbeResult::found_exact(ctx.tag(), url)
                    .with_http_status(response.status)
                    .with_values(values)
                    .with_queries(vec![url.to_string()])
            }
            Ok(response) => {
                values[0].push_str("_invalid");
                values.push(url.to_string());
                ProbeResult::not_found(ctx.tag())
                    .with_http_status(response.status)
                    .with_values(values)
                    .with_queries(vec![url.to_string()])
            }
            Err(e) => ProbeResult::error(ctx.tag(), e).with_queries(vec![url.to_string()]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProbeError;
    use crate::probes::testing::ScriptedFetcher;
    use crate::scheduler::Scheduler;
    use crate::types::{MatchTier, ProbeStatus};

    fn page() -> String {
        format!("<html>{}</html>", "x".repeat(MIN_PAGE_BYTES))
    }

    fn strategy() -> CatalogBackfillStrategy {
        CatalogBackfillStrategy::new(
            Duration::from_secs(1),
            ReferenceCache::from_records(vec![
                ("Debutante", "https://acs.test/debutante"),
                ("Alba Plena", "https://acs.test/alba-plena"),
            ]),
        )
    }

    #[test]
    fn test_cached_answers_kept_and_unmatched() {
        let strategy = strategy();

        let kept = WorkUnit::new("debutante").with_ref(ACS_URL_FIELD, "https://acs.test/debutante");
        let result = strategy.cached(&kept).unwrap();
        assert_eq!(result.status, ProbeStatus::Found);
        assert_eq!(result.values, vec![CLASS_KEPT.to_string()]);

        let result = strategy.cached(&WorkUnit::new("Ghost")).unwrap();
        assert_eq!(result.status, ProbeStatus::NotFound);
        assert_eq!(result.values, vec![CLASS_UNMATCHED.to_string()]);

        assert!(strategy.cached(&WorkUnit::new("Alba Plena")).is_none());
    }

    #[tokio::test]
    async fn test_missing_link_is_added_when_page_is_live() {
        let fetcher = ScriptedFetcher::new().route("/alba-plena", 200, &page());
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let result = strategy.probe(&WorkUnit::new("Alba Plena"), &ctx).await;
        assert_eq!(result.status, ProbeStatus::Found);
        assert_eq!(result.tier, Some(MatchTier::Exact));
        assert_eq!(result.value.as_deref(), Some("https://acs.test/alba-plena"));
        assert_eq!(result.values, vec![CLASS_ADDED.to_string()]);
    }

    #[tokio::test]
    async fn test_stale_link_is_replaced() {
        let fetcher = ScriptedFetcher::new().route("/debutante", 200, &page());
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let unit = WorkUnit::new("Debutante").with_ref(ACS_URL_FIELD, "https://acs.test/old");
        let result = strategy.probe(&unit, &ctx).await;
        assert_eq!(result.status, ProbeStatus::Found);
        assert_eq!(
            result.values,
            vec![CLASS_REPLACED.to_string(), "https://acs.test/old".to_string()]
        );
    }

    #[tokio::test]
    async fn test_stub_page_is_not_accepted() {
        let fetcher = ScriptedFetcher::new().route("/alba-plena", 200, "<html></html>");
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let result = strategy.probe(&WorkUnit::new("Alba Plena"), &ctx).await;
        assert_eq!(result.status, ProbeStatus::NotFound);
        assert_eq!(result.value, None);
        assert_eq!(
            result.values,
            vec!["added_invalid".to_string(), "https://acs.test/alba-plena".to_string()]
        );
    }

    #[tokio::test]
    async fn test_transport_failure_is_error() {
        let fetcher = ScriptedFetcher::new().fail("acs.test", ProbeError::Timeout);
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let result = strategy.probe(&WorkUnit::new("Alba Plena"), &ctx).await;
        assert_eq!(result.status, ProbeStatus::Error);
    }
}
