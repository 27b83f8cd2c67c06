//! ICR photo list probe
//!
//! The register's photo API is slow and blocks aggressive clients, so this
//! strategy is rate-limited. 403 and 429 mean the client is being blocked;
//! the remaining variants are not tried.

use super::{Attempts, ReferenceCache, BROWSER_USER_AGENT};
use crate::error::ProbeError;
use crate::fetch::FetchRequest;
use crate::strategy::{ProbeContext, Strategy, StrategyDescriptor};
use crate::types::{ProbeResult, WorkUnit};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::warn;

pub const ICR_PHOTOS_URL: &str = "https://camellia.iflora.cn/Cutivars/SearchPhotosList";

#[derive(Debug, Deserialize)]
struct PhotoList {
    #[serde(default)]
    data: Option<Vec<Photo>>,
}

#[derive(Debug, Deserialize)]
struct Photo {
    #[serde(rename = "ImageUrl", default)]
    image_url: Option<String>,
    #[serde(rename = "IsDefaultPhoto", default)]
    is_default_photo: serde_json::Value,
}

impl Photo {
    fn is_default(&self) -> bool {
        match &self.is_default_photo {
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_f64().is_some_and(|v| v != 0.0),
            serde_json::Value::String(s) => matches!(s.as_str(), "1" | "true" | "True"),
            _ => false,
        }
    }
}

pub struct IcrPhotosStrategy {
    descriptor: StrategyDescriptor,
    api_url: String,
    reference: ReferenceCache,
}

impl IcrPhotosStrategy {
    pub fn new(timeout: Duration, reference: ReferenceCache) -> Self {
        Self {
            descriptor: StrategyDescriptor::new("icr", "icr", timeout)
                .rate_limited()
                .short_circuit(),
            api_url: ICR_PHOTOS_URL.to_string(),
            reference,
        }
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into();
        self
    }

    fn request_url(&self, name: &str) -> String {
        format!("{}?page=1&latin={}", self.api_url, urlencoding::encode(name))
    }
}

/// Default photo if flagged, otherwise the first one with a URL
fn pick_photo(photos: &[Photo]) -> Option<&str> {
    let usable = |p: &&Photo| p.image_url.as_deref().is_some_and(|u| !u.is_empty());
    photos
        .iter()
        .filter(usable)
        .find(|p| p.is_default())
        .or_else(|| photos.iter().find(usable))
        .and_then(|p| p.image_url.as_deref())
}

#[async_trait]
impl Strategy for IcrPhotosStrategy {
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
            let request = FetchRequest::get(self.request_url(variant))
                .with_header("User-Agent", BROWSER_USER_AGENT);

            let response = match ctx.fetch(request).await {
                Ok(response) if matches!(response.status, 403 | 429) => {
                    warn!(unit = %unit.id, status = response.status, "ICR blocked request");
                    return ProbeResult::error(ctx.tag(), ProbeError::HttpStatus(response.status))
                        .with_queries(attempts.queries());
                }
                Ok(response) => match response.require_success() {
                    Ok(response) => response,
                    Err(e) => {
                        attempts.failed(e);
                        continue;
                    }
                },
                Err(e) => {
                    attempts.failed(e);
                    continue;
                }
            };

            let list: PhotoList = match response.json() {
                Ok(list) => list,
                Err(e) => {
                    attempts.failed(e);
                    continue;
                }
            };
            attempts.answered();

            if let Some(url) = list.data.as_deref().and_then(pick_photo) {
                return ProbeResult::found_exact(ctx.tag(), url)
                    .with_http_status(response.status)
                    .with_queries(attempts.queries());
            }
        }

        attempts.miss(ctx.tag())
    }
}
