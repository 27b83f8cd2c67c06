//! Concrete source strategies
//!
//! | Tag                 | Source | Gated | Reference cache |
//! |---------------------|--------|-------|-----------------|
//! | `socal`             | socal  | no    | image URL list  |
//! | `accs`              | accs   | no    | -               |
//! | `acs`               | acs    | no    | page index      |
//! | `icr`               | icr    | yes   | image URL list  |
//! | `icr_name_search`   | icr    | yes   | -               |
//! | `acs_link`          | acs    | no    | -               |
//! | `acs_catalog`       | acs    | no    | catalog         |
//! | `icr_chinese_name`  | icr    | yes   | -               |

pub mod catalog_backfill;
pub mod chinese_name;
pub mod direct_image;
pub mod icr_name_search;
pub mod icr_photos;
pub mod indexed_page;
pub mod link_check;
pub mod parsers;
pub mod search_form;

pub use catalog_backfill::CatalogBackfillStrategy;
pub use chinese_name::ChineseNameStrategy;
pub use direct_image::DirectImageStrategy;
pub use icr_name_search::IcrNameSearchStrategy;
pub use icr_photos::IcrPhotosStrategy;
pub use indexed_page::IndexedPageStrategy;
pub use link_check::LinkCheckStrategy;
pub use search_form::SearchFormStrategy;

use crate::error::{EnrichError, EnrichResult, ProbeError};
use crate::normalize::strict_key;
use crate::types::ProbeResult;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

/// Host of the International Camellia Register
pub const ICR_HOST: &str = "camellia.iflora.cn";

/// Browser-like user agent some sources require
pub(crate) const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Preloaded name → value map (strict-keyed)
#[derive(Debug, Clone, Default)]
pub struct ReferenceCache {
    entries: HashMap<String, String>,
}

impl ReferenceCache {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let entries = pairs
            .into_iter()
            .map(|(k, v)| (strict_key(k.as_ref()), v.into()))
            .filter(|(_, v)| !v.is_empty())
            .collect();
        Self { entries }
    }

    /// Load a JSON object `{name: value | null}`; a missing file is an empty
    /// cache, a malformed one is an error.
    pub fn load(path: &Path) -> EnrichResult<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Reference cache not found, continuing without it");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| EnrichError::Config(format!("{}: {}", path.display(), e)))?;
        let raw: HashMap<String, Option<String>> = serde_json::from_str(&content)
            .map_err(|e| EnrichError::Config(format!("{}: {}", path.display(), e)))?;

        let cache = Self::from_pairs(raw.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))));
        info!(path = %path.display(), entries = cache.len(), "Reference cache loaded");
        Ok(cache)
    }

    /// Load a catalog, either `{name: url}` or `{"records": [{name, url}]}`.
    /// Among records whose names share a strict key the first one wins.
    pub fn load_catalog(path: &Path) -> EnrichResult<Self> {
        if !path.exists() {
            warn!(path = %path.display(), "Catalog not found, continuing without it");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| EnrichError::Config(format!("{}: {}", path.display(), e)))?;
        let raw: serde_json::Value = serde_json::from_str(&content)
            .map_err(|e| EnrichError::Config(format!("{}: {}", path.display(), e)))?;

        let cache = match raw.get("records").and_then(|r| r.as_array()) {
            Some(records) => Self::from_records(records.iter().filter_map(|record| {
                let name = record.get("name")?.as_str()?;
                let url = record.get("url")?.as_str()?;
                Some((name, url))
            })),
            None => {
                let map: HashMap<String, Option<String>> = serde_json::from_value(raw)
                    .map_err(|e| EnrichError::Config(format!("{}: {}", path.display(), e)))?;
                Self::from_pairs(map.into_iter().filter_map(|(k, v)| v.map(|v| (k, v))))
            }
        };
        info!(path = %path.display(), entries = cache.len(), "Catalog loaded");
        Ok(cache)
    }

    /// Like [`from_pairs`](Self::from_pairs), but duplicate keys keep the first value
    pub fn from_records<I, K, V>(records: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut entries = HashMap::new();
        let mut duplicates = 0usize;
        for (name, value) in records {
            let value = value.into();
            if value.is_empty() {
                continue;
            }
            match entries.entry(strict_key(name.as_ref())) {
                std::collections::hash_map::Entry::Occupied(_) => duplicates += 1,
                std::collections::hash_map::Entry::Vacant(slot) => {
                    slot.insert(value);
                }
            }
        }
        if duplicates > 0 {
            warn!(duplicates, "Duplicate catalog names, keeping the first of each");
        }
        Self { entries }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&strict_key(name)).map(String::as_str)
    }

    /// First hit over the given names, in order
    pub fn lookup<S: AsRef<str>>(&self, names: &[S]) -> Option<&str> {
        names.iter().find_map(|n| self.get(n.as_ref()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Bookkeeping for probes that try several requests for one unit
///
/// The final miss is NotFound when at least one request got a usable answer,
/// and Error when every request failed.
#[derive(Debug, Default)]
pub(crate) struct Attempts {
    answered: bool,
    last_error: Option<ProbeError>,
    queries: Vec<String>,
}

impl Attempts {
    pub(crate) fn query(&mut self, query: &str) {
        self.queries.push(query.to_string());
    }

    pub(crate) fn answered(&mut self) {
        self.answered = true;
    }

    pub(crate) fn failed(&mut self, error: ProbeError) {
        self.last_error = Some(error);
    }

    pub(crate) fn queries(&self) -> Vec<String> {
        self.queries.clone()
    }

    /// Terminal result when nothing was found
    pub(crate) fn miss(self, tag: &str) -> ProbeResult {
        let result = match self.last_error {
            Some(error) if !self.answered => ProbeResult::error(tag, error),
            _ => ProbeResult::not_found(tag),
        };
        result.with_queries(self.queries)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted fetcher for probe unit tests

    use crate::error::ProbeError;
    use crate::fetch::{FetchRequest, FetchResponse, Fetcher};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Answers requests by URL substring; unmatched URLs get a 404
    #[derive(Default)]
    pub struct ScriptedFetcher {
        routes: Vec<(String, Result<FetchResponse, ProbeError>)>,
        pub requests: Mutex<Vec<FetchRequest>>,
    }

    impl ScriptedFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn route(mut self, url_part: &str, status: u16, body: &str) -> Self {
            self.routes
                .push((url_part.to_string(), Ok(FetchResponse::new(status, body))));
            self
        }

        pub fn fail(mut self, url_part: &str, error: ProbeError) -> Self {
            self.routes.push((url_part.to_string(), Err(error)));
            self
        }

        pub fn request_count(&self) -> usize {
            self.requests.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Fetcher for ScriptedFetcher {
        async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, ProbeError> {
            self.requests.lock().unwrap().push(request.clone());
            let key = match request.form.iter().find(|(k, _)| k == "name" || k == "latin") {
                Some((_, v)) => format!("{}#{}", request.url, v),
                None => request.url.clone(),
            };
            self.routes
                .iter()
                .find(|(part, _)| key.contains(part.as_str()))
                .map(|(_, r)| r.clone())
                .unwrap_or_else(|| Ok(FetchResponse::new(404, "")))
        }
    }
}
