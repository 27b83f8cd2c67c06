//! Dataset loading
//!
//! The dataset is a JSON array of cultivar records, or an object wrapping
//! that array under `data`, `camellias`, `items` or `records`. Only the fields
//! the jobs read are typed; everything else is carried through untouched.

use crate::error::{EnrichError, EnrichResult};
use crate::probes::ICR_HOST;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use tracing::{info, warn};

/// Keys that may wrap the record array
const WRAPPER_KEYS: [&str; 4] = ["data", "camellias", "items", "records"];

/// One cultivar record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acs_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icr_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chinese_name: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl Record {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Trimmed non-empty field value
    fn field(value: &Option<String>) -> Option<&str> {
        value.as_deref().map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn acs_url(&self) -> Option<&str> {
        Self::field(&self.acs_url)
    }

    pub fn icr_url(&self) -> Option<&str> {
        Self::field(&self.icr_url)
    }

    pub fn has_image(&self) -> bool {
        Self::field(&self.image).is_some()
    }
}

/// Load records from a dataset file
pub fn load_records(path: &Path) -> EnrichResult<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EnrichError::Dataset(format!("{}: {}", path.display(), e)))?;
    let value: Value = serde_json::from_str(&content)
        .map_err(|e| EnrichError::Dataset(format!("{}: {}", path.display(), e)))?;

    let records = extract_records(value)?;
    info!(path = %path.display(), records = records.len(), "Dataset loaded");
    Ok(records)
}

/// Records from a parsed dataset document
///
/// Records without a name are skipped with a warning.
pub fn extract_records(value: Value) -> EnrichResult<Vec<Record>> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => WRAPPER_KEYS
            .iter()
            .find_map(|key| match map.remove(*key) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .ok_or_else(|| {
                EnrichError::Dataset(format!(
                    "expected a record array or an object with one of {:?}",
                    WRAPPER_KEYS
                ))
            })?,
        _ => {
            return Err(EnrichError::Dataset(
                "expected a record array or an object".into(),
            ))
        }
    };

    let mut records = Vec::with_capacity(items.len());
    let mut skipped = 0usize;
    for (index, item) in items.into_iter().enumerate() {
        match serde_json::from_value::<Record>(item) {
            Ok(record) if !record.name.trim().is_empty() => records.push(record),
            Ok(_) => skipped += 1,
            Err(e) => {
                warn!(index, error = %e, "Skipping malformed record");
                skipped += 1;
            }
        }
    }
    if skipped > 0 {
        warn!(skipped, "Records without a usable name were skipped");
    }
    Ok(records)
}

/// Load a plain name list: a JSON array of strings, or one name per line
/// (blank lines and `#` comments ignored)
pub fn load_name_list(path: &Path) -> EnrichResult<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| EnrichError::Dataset(format!("{}: {}", path.display(), e)))?;

    if content.trim_start().starts_with('[') {
        let names: Vec<String> = serde_json::from_str(&content)
            .map_err(|e| EnrichError::Dataset(format!("{}: {}", path.display(), e)))?;
        return Ok(names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect());
    }

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

/// http(s) URL whose host is the ICR host or one of its subdomains
pub fn is_icr_url(url: &str) -> bool {
    let url = url.trim();
    let lower = url.to_ascii_lowercase();
    let rest = match lower
        .strip_prefix("https://")
        .or_else(|| lower.strip_prefix("http://"))
    {
        Some(rest) => rest,
        None => return false,
    };

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    let host = host_port.split(':').next().unwrap_or_default();

    host == ICR_HOST || host.ends_with(&format!(".{}", ICR_HOST))
}

/// Unique valid ICR URLs in first-seen order
pub fn unique_icr_urls(records: &[Record]) -> Vec<String> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter_map(Record::icr_url)
        .filter(|url| is_icr_url(url))
        .filter(|url| seen.insert(url.to_string()))
        .map(str::to_string)
        .collect()
}
