//! Chinese name lookup on ICR detail pages
//!
//! Units are keyed by detail-page URL: several records may share one page,
//! and each page is fetched once.

use super::parsers::{ChineseNameParser, PageParser};
use super::BROWSER_USER_AGENT;
use crate::error::ProbeError;
use crate::fetch::FetchRequest;
use crate::strategy::{ProbeContext, Strategy, StrategyDescriptor};
use crate::types::{ProbeResult, WorkUnit};
use async_trait::async_trait;
use std::time::Duration;

/// Separator used when several names are joined into one field
pub const NAME_JOINER: &str = "、";

pub struct ChineseNameStrategy {
    descriptor: StrategyDescriptor,
}

impl ChineseNameStrategy {
    pub fn new(timeout: Duration) -> Self {
        Self {
            descriptor: StrategyDescriptor::new("icr_chinese_name", "icr", timeout).rate_limited(),
        }
    }
}

#[async_trait]
impl Strategy for ChineseNameStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    async fn probe(&self, unit: &WorkUnit, ctx: &ProbeContext<'_>) -> ProbeResult {
        let url = unit.id.trim();
        let request = FetchRequest::get(url).with_header("User-Agent", BROWSER_USER_AGENT);

        let response = match ctx.fetch(request).await {
            Ok(response) if response.status == 200 => response,
            Ok(response) => {
                return ProbeResult::error(ctx.tag(), ProbeError::HttpStatus(response.status))
            }
            Err(e) => return ProbeResult::error(ctx.tag(), e),
        };

        match ChineseNameParser.parse(&response.body) {
            Some(names) => ProbeResult::found_exact(ctx.tag(), names.join(NAME_JOINER))
                .with_values(names)
                .with_http_status(response.status),
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

    fn scheduler() -> Scheduler {
        Scheduler::new(1).with_gate("icr", Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_names_joined() {
        let fetcher = ScriptedFetcher::new().route(
            "latin=Chidan",
            200,
            "<p><b>Chinese Name</b>：赤丹；紫袍</p>",
        );
        let scheduler = scheduler();
        let strategy = ChineseNameStrategy::new(Duration::from_secs(1));
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let unit = WorkUnit::new("https://camellia.iflora.cn/Cutivars/Detail?latin=Chidan");
        let result = strategy.probe(&unit, &ctx).await;
        assert_eq!(result.status, ProbeStatus::Found);
        assert_eq!(result.value.as_deref(), Some("赤丹、紫袍"));
        assert_eq!(result.values.len(), 2);
    }

    #[tokio::test]
    async fn test_page_without_names_is_not_found() {
        let fetcher = ScriptedFetcher::new().route("latin=X", 200, "<p>Scientific Name: X</p>");
        let scheduler = scheduler();
        let strategy = ChineseNameStrategy::new(Duration::from_secs(1));
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let unit = WorkUnit::new("https://camellia.iflora.cn/Cutivars/Detail?latin=X");
        let result = strategy.probe(&unit, &ctx).await;
        assert_eq!(result.status, ProbeStatus::NotFound);
        assert_eq!(result.http_status, Some(200));
    }

    #[tokio::test]
    async fn test_non_200_is_http_error() {
        let fetcher = ScriptedFetcher::new().route("latin=X", 502, "");
        let scheduler = scheduler();
        let strategy = ChineseNameStrategy::new(Duration::from_secs(1));
        let ctx = ProbeContext::new(&scheduler, &fetcher, strategy.descriptor());

        let unit = WorkUnit::new("https://camellia.iflora.cn/Cutivars/Detail?latin=X");
        let result = strategy.probe(&unit, &ctx).await;
        assert_eq!(result.status, ProbeStatus::Error);
        assert_eq!(result.error, Some(ProbeError::HttpStatus(502)));
    }
}
