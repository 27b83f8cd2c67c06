//! Job definitions
//!
//! A job is a strategy chain composition, a cache keying and a run namespace.
//! The namespace names every state and report file of the job.

use crate::config::{resolve_path, EnrichConfig};
use crate::dataset::{unique_icr_urls, Record};
use crate::error::EnrichResult;
use crate::fetch::Fetcher;
use crate::normalize::{search_variants, spelling_variants};
use crate::probes::link_check::ACS_URL_FIELD;
use crate::probes::{
    CatalogBackfillStrategy, ChineseNameStrategy, DirectImageStrategy, IcrNameSearchStrategy, IcrPhotosStrategy,
    IndexedPageStrategy, LinkCheckStrategy, ReferenceCache, SearchFormStrategy,
};
use crate::scheduler::Scheduler;
use crate::strategy::{Strategy, StrategyChain};
use crate::types::{CacheKeying, WorkUnit};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Job {
    /// Find an image URL for records without one
    Images,
    /// Score record names against the ICR name search
    MatchAudit,
    /// Validate and recover ACS encyclopedia links
    LinkAudit,
    /// Fill or correct ACS links from the catalog by exact name
    Backfill,
    /// Scrape Chinese names from ICR detail pages
    ChineseNames,
}

impl Job {
    pub fn name(self) -> &'static str {
        match self {
            Job::Images => "images",
            Job::MatchAudit => "match-audit",
            Job::LinkAudit => "link-audit",
            Job::Backfill => "backfill",
            Job::ChineseNames => "chinese-names",
        }
    }

    /// Prefix of the job's state and report files
    pub fn namespace(self) -> &'static str {
        match self {
            Job::Images => "image_enrichment",
            Job::MatchAudit => "icr_match_audit",
            Job::LinkAudit => "acs_link_audit",
            Job::Backfill => "acs_backfill",
            Job::ChineseNames => "icr_chinese_name",
        }
    }

    pub fn keying(self) -> CacheKeying {
        match self {
            Job::ChineseNames => CacheKeying::Url,
            _ => CacheKeying::StrictName,
        }
    }

    /// Work units for this job, in dataset order (not yet de-duplicated)
    pub fn units(self, records: &[Record]) -> Vec<WorkUnit> {
        match self {
            Job::Images => records
                .iter()
                .filter(|r| !r.has_image())
                .map(|r| WorkUnit::with_variants(r.name.trim(), spelling_variants(&r.name)))
                .collect(),
            Job::MatchAudit => records
                .iter()
                .map(|r| WorkUnit::with_variants(r.name.trim(), search_variants(&r.name)))
                .collect(),
            Job::LinkAudit => records
                .iter()
                .filter_map(|r| {
                    r.acs_url()
                        .map(|url| WorkUnit::new(r.name.trim()).with_ref(ACS_URL_FIELD, url))
                })
                .collect(),
            Job::Backfill => records
                .iter()
                .map(|r| {
                    let unit = WorkUnit::new(r.name.trim());
                    match r.acs_url() {
                        Some(url) => unit.with_ref(ACS_URL_FIELD, url),
                        None => unit,
                    }
                })
                .collect(),
            Job::ChineseNames => unique_icr_urls(records)
                .into_iter()
                .map(WorkUnit::new)
                .collect(),
        }
    }

    /// Strategies in chain order
    pub fn strategies(self, config: &EnrichConfig, root: &Path) -> EnrichResult<Vec<Arc<dyn Strategy>>> {
        let timeouts = &config.timeouts;
        let strategies: Vec<Arc<dyn Strategy>> = match self {
            Job::Images => {
                let refs = &config.references;
                let socal = ReferenceCache::load(&resolve_path(root, &refs.socal_images))?;
                let icr = ReferenceCache::load(&resolve_path(root, &refs.icr_images))?;
                let acs_index = ReferenceCache::load(&resolve_path(root, &refs.acs_index))?;
                vec![
                    Arc::new(DirectImageStrategy::new(timeouts.for_source("socal"), socal)),
                    Arc::new(SearchFormStrategy::new(
                        timeouts.for_source("accs"),
                        config.matching,
                    )),
                    Arc::new(IndexedPageStrategy::new(timeouts.for_source("acs"), acs_index)),
                    Arc::new(IcrPhotosStrategy::new(timeouts.for_source("icr"), icr)),
                ]
            }
            Job::MatchAudit => vec![Arc::new(IcrNameSearchStrategy::new(
                timeouts.for_source("icr"),
                config.matching,
            ))],
            Job::LinkAudit => vec![Arc::new(LinkCheckStrategy::new(timeouts.for_source("acs")))],
            Job::Backfill => {
                let catalog = ReferenceCache::load_catalog(&resolve_path(root, &config.references.acs_catalog))?;
                vec![Arc::new(CatalogBackfillStrategy::new(timeouts.for_source("acs"), catalog))]
            }
            Job::ChineseNames => vec![Arc::new(ChineseNameStrategy::new(timeouts.for_source("icr")))],
        };
        Ok(strategies)
    }

    /// Chain for this job over a shared scheduler and fetcher
    pub fn chain(
        self,
        config: &EnrichConfig,
        root: &Path,
        scheduler: Arc<Scheduler>,
        fetcher: Arc<dyn Fetcher>,
    ) -> EnrichResult<StrategyChain> {
        let chain = StrategyChain::new(self.strategies(config, root)?, scheduler, fetcher)?;
        info!(job = self.name(), strategies = ?chain.tags(), "Strategy chain ready");
        Ok(chain)
    }
}

impl std::fmt::Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Scheduler with the configured concurrency ceiling and one gate per
/// rate-limited source
pub fn build_scheduler(config: &EnrichConfig) -> Scheduler {
    config
        .rate_limits
        .keys()
        .fold(Scheduler::new(config.concurrency), |scheduler, source| {
            match config.rate_limit(source) {
                Some(interval) => scheduler.with_gate(source.clone(), interval),
                None => scheduler,
            }
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::{FetchRequest, FetchResponse};
    use crate::error::ProbeError;
    use async_trait::async_trait;

    struct Offline;

    #[async_trait]
    impl Fetcher for Offline {
        async fn fetch(&self, _request: &FetchRequest) -> Result<FetchResponse, ProbeError> {
            Err(ProbeError::Transport("offline".into()))
        }
    }

    fn records() -> Vec<Record> {
        let mut with_image = Record::named("Debutante");
        with_image.image = Some("https://img/debutante.jpg".into());
        with_image.acs_url = Some("https://acs/debutante".into());
        with_image.icr_url = Some("https://camellia.iflora.cn/Cutivars/Detail?latin=Debutante".into());

        let mut plain = Record::named("Alba Plena");
        plain.icr_url = Some("https://camellia.iflora.cn/Cutivars/Detail?latin=Debutante".into());
        vec![with_image, plain]
    }

    #[test]
    fn test_units_per_job() {
        let records = records();

        let images = Job::Images.units(&records);
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].id, "Alba Plena");

        // Only records that carry a link are audited
        let links = Job::LinkAudit.units(&records);
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].id, "Debutante");
        assert_eq!(links[0].external_ref(ACS_URL_FIELD), Some("https://acs/debutante"));

        let backfill = Job::Backfill.units(&records);
        assert_eq!(backfill.len(), 2);
        assert_eq!(backfill[1].external_ref(ACS_URL_FIELD), None);

        let pages = Job::ChineseNames.units(&records);
        assert_eq!(pages.len(), 1);
        assert_eq!(Job::ChineseNames.keying(), CacheKeying::Url);
    }

    #[test]
    fn test_scheduler_gates_from_config() {
        let scheduler = build_scheduler(&EnrichConfig::default());
        assert!(scheduler.has_gate("icr"));
        assert!(!scheduler.has_gate("acs"));
        assert_eq!(scheduler.ceiling(), 8);
    }

    #[test]
    fn test_every_job_chain_builds_with_default_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = EnrichConfig::default();
        let scheduler = Arc::new(build_scheduler(&config));
        for job in [
            Job::Images,
            Job::MatchAudit,
            Job::LinkAudit,
            Job::Backfill,
            Job::ChineseNames,
        ] {
            let chain = job
                .chain(&config, dir.path(), scheduler.clone(), Arc::new(Offline))
                .unwrap();
            assert!(!chain.tags().is_empty(), "{} has no strategies", job);
        }
    }

    #[test]
    fn test_rate_limited_job_without_gate_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EnrichConfig::default();
        config.rate_limits.clear();
        let scheduler = Arc::new(build_scheduler(&config));
        assert!(Job::ChineseNames
            .chain(&config, dir.path(), scheduler, Arc::new(Offline))
            .is_err());
    }
}
