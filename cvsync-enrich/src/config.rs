//! Run configuration
//!
//! **Priority:** CLI → ENV (`CVSYNC_*`) → TOML → compiled defaults
//!
//! Relative paths are resolved against the root folder.

use crate::error::{EnrichError, EnrichResult};
use crate::scoring::MatchPolicy;
use cvsync_common::config::{env_override, load_toml_or_default, locate_config_file};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

pub const CONCURRENCY_ENV: &str = "CVSYNC_CONCURRENCY";
pub const MAX_UNITS_ENV: &str = "CVSYNC_MAX_UNITS";
pub const ICR_DELAY_ENV: &str = "CVSYNC_ICR_DELAY";
pub const TIMEOUT_ENV: &str = "CVSYNC_TIMEOUT_SECS";

pub const DEFAULT_CONCURRENCY: usize = 8;

/// Minimum spacing between ICR requests
pub const DEFAULT_ICR_DELAY_SECS: f64 = 8.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Default per-request deadline
    pub default_secs: f64,
    /// Per-source overrides (`icr = 30.0`)
    pub sources: BTreeMap<String, f64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        let mut sources = BTreeMap::new();
        sources.insert("icr".to_string(), 30.0);
        Self {
            default_secs: 15.0,
            sources,
        }
    }
}

impl TimeoutConfig {
    pub fn for_source(&self, source: &str) -> Duration {
        let secs = self.sources.get(source).copied().unwrap_or(self.default_secs);
        Duration::from_secs_f64(secs.max(0.001))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProgressConfig {
    /// Emit every N completed units (0 disables)
    pub every_n: usize,
    /// Emit at most once per interval otherwise (0 disables)
    pub interval_secs: f64,
    /// External notifier; an argument `{message}` is replaced by the text
    pub command: Vec<String>,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            every_n: 500,
            interval_secs: 300.0,
            command: Vec::new(),
        }
    }
}

/// Preloaded reference data (name → URL JSON objects)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceConfig {
    pub socal_images: PathBuf,
    pub icr_images: PathBuf,
    pub acs_index: PathBuf,
    /// ACS catalog (`{"records": [{name, url}]}`) used by the backfill job
    pub acs_catalog: PathBuf,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            socal_images: PathBuf::from("reference/image_urls.json"),
            icr_images: PathBuf::from("reference/image_urls_icr_full.json"),
            acs_index: PathBuf::from("reference/acs_all_entries.json"),
            acs_catalog: PathBuf::from("reference/acs_catalog_full.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichConfig {
    pub root_folder: Option<PathBuf>,
    /// Dataset JSON
    pub dataset: PathBuf,
    /// Checkpoints, caches and JSONL logs
    pub state_dir: PathBuf,
    /// Secondary checkpoint copies (disabled when unset)
    pub mirror_dir: Option<PathBuf>,
    pub report_dir: PathBuf,
    /// Concurrency ceiling for in-flight requests
    pub concurrency: usize,
    /// Units per run (0 = unlimited)
    pub max_units: usize,
    /// Re-probe units whose cached outcome is Error
    pub retry_errors: bool,
    /// Minimum seconds between requests, per rate-limited source
    pub rate_limits: BTreeMap<String, f64>,
    pub timeouts: TimeoutConfig,
    pub progress: ProgressConfig,
    pub matching: MatchPolicy,
    pub references: ReferenceConfig,
}

impl Default for EnrichConfig {
    fn default() -> Self {
        let mut rate_limits = BTreeMap::new();
        rate_limits.insert("icr".to_string(), DEFAULT_ICR_DELAY_SECS);
        Self {
            root_folder: None,
            dataset: PathBuf::from("camellias.json"),
            state_dir: PathBuf::from("logs"),
            mirror_dir: Some(PathBuf::from("tmp")),
            report_dir: PathBuf::from("reports"),
            concurrency: DEFAULT_CONCURRENCY,
            max_units: 0,
            retry_errors: false,
            rate_limits,
            timeouts: TimeoutConfig::default(),
            progress: ProgressConfig::default(),
            matching: MatchPolicy::default(),
            references: ReferenceConfig::default(),
        }
    }
}

/// Values given on the command line
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub concurrency: Option<usize>,
    pub max_units: Option<usize>,
    pub retry_errors: bool,
}

impl EnrichConfig {
    /// Load TOML (explicit path, `CVSYNC_CONFIG`, or the per-user default),
    /// then apply environment and command-line overrides.
    pub fn resolve(config_path: Option<&Path>, cli: &CliOverrides) -> EnrichResult<Self> {
        let located = locate_config_file(config_path);
        let mut config: EnrichConfig = load_toml_or_default(located.as_deref())?;
        if let Some(path) = &located {
            info!(path = %path.display(), "Configuration file");
        }

        config.apply_env()?;
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> EnrichResult<()> {
        if let Some(n) = env_override::<usize>(CONCURRENCY_ENV)? {
            self.concurrency = n;
        }
        if let Some(n) = env_override::<usize>(MAX_UNITS_ENV)? {
            self.max_units = n;
        }
        if let Some(delay) = env_override::<f64>(ICR_DELAY_ENV)? {
            self.rate_limits.insert("icr".to_string(), delay);
        }
        if let Some(secs) = env_override::<f64>(TIMEOUT_ENV)? {
            self.timeouts.default_secs = secs;
        }
        Ok(())
    }

    fn apply_cli(&mut self, cli: &CliOverrides) {
        if let Some(n) = cli.concurrency {
            self.concurrency = n;
        }
        if let Some(n) = cli.max_units {
            self.max_units = n;
        }
        if cli.retry_errors {
            self.retry_errors = true;
        }
    }

    pub fn validate(&self) -> EnrichResult<()> {
        if self.concurrency == 0 {
            return Err(EnrichError::Config("concurrency must be at least 1".into()));
        }
        if !is_positive_seconds(self.timeouts.default_secs) {
            return Err(EnrichError::Config(format!(
                "default timeout must be a positive number of seconds (got {})",
                self.timeouts.default_secs
            )));
        }
        if let Some((source, secs)) = self
            .timeouts
            .sources
            .iter()
            .find(|(_, s)| !is_positive_seconds(**s))
        {
            return Err(EnrichError::Config(format!(
                "timeout for '{}' must be a positive number of seconds (got {})",
                source, secs
            )));
        }
        if !self.progress.interval_secs.is_finite() || self.progress.interval_secs < 0.0 {
            return Err(EnrichError::Config(format!(
                "progress interval must be a non-negative number of seconds (got {})",
                self.progress.interval_secs
            )));
        }
        if let Some((source, delay)) = self
            .rate_limits
            .iter()
            .find(|(_, d)| !d.is_finite() || **d < 0.0)
        {
            return Err(EnrichError::Config(format!(
                "rate limit for '{}' must be a non-negative number of seconds (got {})",
                source, delay
            )));
        }
        let m = &self.matching;
        if !(0.0..=1.0).contains(&m.fuzzy_threshold)
            || !(0.0..=1.0).contains(&m.exact_threshold)
            || m.fuzzy_threshold > m.exact_threshold
        {
            return Err(EnrichError::Config(
                "match thresholds must satisfy 0 <= fuzzy <= exact <= 1".into(),
            ));
        }
        if !(0.0..=1.0).contains(&m.ambiguity_margin) {
            return Err(EnrichError::Config(format!(
                "ambiguity margin must lie in [0, 1] (got {})",
                m.ambiguity_margin
            )));
        }
        Ok(())
    }

    /// Minimum request spacing for `source`, if it is rate-limited
    pub fn rate_limit(&self, source: &str) -> Option<Duration> {
        self.rate_limits
            .get(source)
            .map(|secs| Duration::from_secs_f64(secs.max(0.0)))
    }

    pub fn max_units(&self) -> Option<usize> {
        (self.max_units > 0).then_some(self.max_units)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs_f64(self.progress.interval_secs.max(0.0))
    }
}

/// Finite and above zero; `Duration::from_secs_f64` panics on anything else
fn is_positive_seconds(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0
}

/// `path` if absolute, otherwise `root/path`
pub fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
