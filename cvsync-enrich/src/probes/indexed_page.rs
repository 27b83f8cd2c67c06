//! Indexed page probe (ACS Camellia Encyclopedia)
//!
//! A preloaded index maps cultivar names to encyclopedia pages. Names absent
//! from the index are a miss without any request; indexed pages are fetched
//! and their first content image taken.

use super::parsers::{ContentImageParser, PageParser};
use super::{ReferenceCache, BROWSER_USER_AGENT};
use crate::fetch::FetchRequest;
use crate::strategy::{ProbeContext, Strategy, StrategyDescriptor};
use crate::types::{ProbeResult, WorkUnit};
use async_trait::async_trait;
use std::time::Duration;

pub struct IndexedPageStrategy {
    descriptor: StrategyDescriptor,
    index: ReferenceCache,
}

impl IndexedPageStrategy {
    pub fn new(timeout: Duration, index: ReferenceCache) -> Self {
        Self {
            descriptor: StrategyDescriptor::new("acs", "acs", timeout),
            index,
        }
    }
}

#[async_trait]
impl Strategy for IndexedPageStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn probe(&self, unit: &WorkUnit, ctx: &ProbeContext<'_>) -> ProbeResult {
        let Some(page_url) = self.index.lookup(&unit.query_variants) else {
            return ProbeResult::not_found(ctx.tag());
        };

        let request = FetchRequest::get(page_url).with_header("User-Agent", BROWSER_USER_AGENT);
        let response = match ctx.fetch(request).await.and_then(|r| r.require_success()) {
            Ok(response) => response,
            Err(e) => return ProbeResult::error(ctx.tag(), e),
        };

        match ContentImageParser::for_page(page_url).parse(&response.body) {
            Some(image_url) => {
                ProbeResult::found_exact(ctx.tag(), image_url).with_http_status(response.status)
            }
            None => ProbeResult::not_found(ctx.tag()).with_http_status(response.status),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probes::testing::ScriptedFetcher;
    use crate::scheduler::Scheduler;
    use crate::types::ProbeStatus;

    fn strategy() -> IndexedPageStrategy {
        IndexedPageStrategy::new(
            Duration::from_secs(1),
            ReferenceCache::from_pairs(vec![("Debutante", "https://acs.test/enc/d/debutante")]),
        )
    }

    #[tokio::test]
    async fn test_unindexed_name_makes_no_request() {
        let fetcher = ScriptedFetcher::new();
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let result = strategy.probe(&WorkUnit::new("Nobody"), &ctx).await;
        assert_eq!(result.status, ProbeStatus::NotFound);
        assert_eq!(fetcher.request_count(), 0);
    }

    #[tokio::test]
    async fn test_indexed_page_image_is_found() {
        let fetcher = ScriptedFetcher::new().route(
            "/enc/d/debutante",
            200,
            r#"<img src="/logo.png"><img src="/files/Debutante.jpg">"#,
        );
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let result = strategy.probe(&WorkUnit::new("debutante"), &ctx).await;
        assert_eq!(result.status, ProbeStatus::Found);
        assert_eq!(result.value.as_deref(), Some("https://acs.test/files/Debutante.jpg"));
    }

    #[tokio::test]
    async fn test_page_error_status_is_error() {
        let fetcher = ScriptedFetcher::new().route("/enc/d/debutante", 500, "");
        let scheduler = Scheduler::new(1);
        let strategy = strategy();
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let result = strategy.probe(&WorkUnit::new("Debutante"), &ctx).await;
        assert_eq!(result.status, ProbeStatus::Error);
        assert_eq!(result.http_status, Some(500));
    }
}
