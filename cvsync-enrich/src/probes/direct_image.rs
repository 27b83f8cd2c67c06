//! Direct image URL check (SoCal / Camelliae Floris Bibliotheca image folder)
//!
//! Image files are named after the cultivar, so a HEAD request on
//! `base + "<name>.jpg"` answers presence directly.

use super::{Attempts, ReferenceCache, BROWSER_USER_AGENT};
use crate::fetch::FetchRequest;
use crate::strategy::{ProbeContext, Strategy, StrategyDescriptor};
use crate::types::{ProbeResult, WorkUnit};
use async_trait::async_trait;
use std::time::Duration;

pub const SOCAL_IMAGE_BASE: &str =
    "https://www.atlanticcoastcamelliasociety.org/Camelliae%20Floris%20Bibliotheca/images/";

pub struct DirectImageStrategy {
    descriptor: StrategyDescriptor,
    base_url: String,
    reference: ReferenceCache,
}

impl DirectImageStrategy {
    pub fn new(timeout: Duration, reference: ReferenceCache) -> Self {
        Self {
            descriptor: StrategyDescriptor::new("socal", "socal", timeout).short_circuit(),
            base_url: SOCAL_IMAGE_BASE.to_string(),
            reference,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn image_url(&self, name: &str) -> String {
        format!("{}{}", self.base_url, urlencoding::encode(&format!("{}.jpg", name)))
    }
}

#[async_trait]
impl Strategy for DirectImageStrategy {
    fn descriptor(&self) -> &StrategyDescriptor {
        &self.descriptor
    }

    fn cached(&self, unit: &WorkUnit) -> Option<ProbeResult> {
        self.reference
            .lookup(&unit.query_variants)
            .map(|url| ProbeResult::found_exact(&self.descriptor.tag, url))
    }

    async fn probe(&self, unit: &WorkUnit, ctx: &ProbeContext<'_>) -> ProbeResult {
        let mut attempts = Attempts::default();

        for variant in &unit.query_variants {
            attempts.query(variant);
            let url = self.image_url(variant);
            let request = FetchRequest::head(url.clone()).with_header("User-Agent", BROWSER_USER_AGENT);

            match ctx.fetch(request).await {
                Ok(response) if response.status == 200 => {
                    return ProbeResult::found_exact(ctx.tag(), url)
                        .with_http_status(response.status)
                        .with_queries(attempts.queries());
                }
                Ok(_) => attempts.answered(),
                Err(e) => attempts.failed(e),
            }
        }

        attempts.miss(ctx.tag())
    }
}
