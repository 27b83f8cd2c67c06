//! Checkpoint/cache store
//!
//! The only state shared across restarts:
//! - the cache: unit cache key → final [`Outcome`]
//! - the checkpoint: run cursor and last rate-gated request time
//! - append-only processed/failed logs (audit trail, never read back)
//!
//! [`JsonFileStore`] makes every write durable before returning. The
//! checkpoint may be mirrored to several files; on load the most advanced
//! readable mirror wins.

use crate::checkpoint::Checkpoint;
use crate::error::{EnrichError, EnrichResult};
use crate::types::{Outcome, OutcomeStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// Cache key → outcome
pub type Cache = BTreeMap<String, Outcome>;

/// One line of the processed/failed logs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: usize,
    pub total: usize,
    pub key: String,
    pub unit_id: String,
    pub status: OutcomeStatus,
    #[serde(default)]
    pub source_tag: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub error: Option<String>,
    pub from_cache: bool,
    pub fetched_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(index: usize, total: usize, key: &str, outcome: &Outcome, from_cache: bool) -> Self {
        Self {
            index,
            total,
            key: key.to_string(),
            unit_id: outcome.unit_id.clone(),
            status: outcome.status,
            source_tag: outcome.source_tag.clone(),
            value: outcome.value.clone(),
            http_status: outcome.http_status,
            error: outcome.error.clone(),
            from_cache,
            fetched_at: outcome.fetched_at,
        }
    }
}

/// Durable progress state of one run namespace
pub trait ProgressStore: Send {
    /// Current checkpoint (clamped to `total_units`) and cache
    fn load(&mut self, total_units: usize) -> EnrichResult<(Checkpoint, Cache)>;

    fn save(&mut self, checkpoint: &Checkpoint) -> EnrichResult<()>;

    /// Record a final outcome
    fn put(&mut self, key: &str, outcome: &Outcome) -> EnrichResult<()>;

    /// Discard checkpoint and cache; returns the fresh checkpoint
    fn reset(&mut self, total_units: usize) -> EnrichResult<Checkpoint>;

    fn append_log(&mut self, entry: &LogEntry) -> EnrichResult<()>;
}

// ============================================================================
// JSON files
// ============================================================================

/// File locations of one run namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorePaths {
    /// Primary checkpoint first, then mirrors
    pub checkpoints: Vec<PathBuf>,
    pub cache: PathBuf,
    pub processed_log: PathBuf,
    pub failed_log: PathBuf,
}

impl StorePaths {
    /// Conventional layout: `<dir>/<ns>_checkpoint.json`, `<ns>_cache.json`,
    /// `<ns>_processed.jsonl`, `<ns>_failed.jsonl`
    pub fn in_dir(dir: &Path, namespace: &str) -> Self {
        Self {
            checkpoints: vec![dir.join(format!("{}_checkpoint.json", namespace))],
            cache: dir.join(format!("{}_cache.json", namespace)),
            processed_log: dir.join(format!("{}_processed.jsonl", namespace)),
            failed_log: dir.join(format!("{}_failed.jsonl", namespace)),
        }
    }

    pub fn with_mirror(mut self, mirror: PathBuf) -> Self {
        if !self.checkpoints.contains(&mirror) {
            self.checkpoints.push(mirror);
        }
        self
    }
}

pub struct JsonFileStore {
    paths: StorePaths,
    cache: Cache,
}

impl JsonFileStore {
    pub fn new(paths: StorePaths) -> Self {
        Self {
            paths,
            cache: Cache::new(),
        }
    }

    pub fn paths(&self) -> &StorePaths {
        &self.paths
    }

    /// Most advanced readable mirror: highest `next_index`, then latest
    /// `updated_at`
    fn best_checkpoint(&self) -> Option<Checkpoint> {
        let mut best: Option<Checkpoint> = None;

        for path in &self.paths.checkpoints {
            if !path.exists() {
                continue;
            }
            let checkpoint = match read_json::<Checkpoint>(path) {
                Ok(checkpoint) => checkpoint,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Skipping unreadable checkpoint");
                    continue;
                }
            };
            debug!(
                path = %path.display(),
                next_index = checkpoint.next_index,
                "Checkpoint candidate"
            );

            let better = match &best {
                None => true,
                Some(current) => {
                    (checkpoint.next_index, checkpoint.updated_at)
                        > (current.next_index, current.updated_at)
                }
            };
            if better {
                best = Some(checkpoint);
            }
        }

        best
    }

    fn write_cache(&self) -> EnrichResult<()> {
        write_json_atomic(&self.paths.cache, &self.cache)
    }
}

impl ProgressStore for JsonFileStore {
    fn load(&mut self, total_units: usize) -> EnrichResult<(Checkpoint, Cache)> {
        let checkpoint = self
            .best_checkpoint()
            .map(|cp| cp.clamp_to(total_units))
            .unwrap_or_else(|| Checkpoint::fresh(total_units));

        self.cache = if self.paths.cache.exists() {
            read_json::<Cache>(&self.paths.cache)
                .map_err(|e| EnrichError::store("reading cache", e))?
        } else {
            Cache::new()
        };

        info!(
            next_index = checkpoint.next_index,
            total = checkpoint.total_units,
            cached = self.cache.len(),
            "Loaded progress"
        );
        Ok((checkpoint, self.cache.clone()))
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> EnrichResult<()> {
        for path in &self.paths.checkpoints {
            write_json_atomic(path, checkpoint)?;
        }
        Ok(())
    }

    fn put(&mut self, key: &str, outcome: &Outcome) -> EnrichResult<()> {
        self.cache.insert(key.to_string(), outcome.clone());
        self.write_cache()
    }

    fn reset(&mut self, total_units: usize) -> EnrichResult<Checkpoint> {
        self.cache.clear();
        self.write_cache()?;
        let checkpoint = Checkpoint::fresh(total_units);
        self.save(&checkpoint)?;
        info!(total = total_units, "Progress reset");
        Ok(checkpoint)
    }

    fn append_log(&mut self, entry: &LogEntry) -> EnrichResult<()> {
        append_jsonl(&self.paths.processed_log, entry)?;
        if entry.status == OutcomeStatus::Error {
            append_jsonl(&self.paths.failed_log, entry)?;
        }
        Ok(())
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, String> {
    let content = fs::read_to_string(path).map_err(|e| e.to_string())?;
    serde_json::from_str(&content).map_err(|e| e.to_string())
}

/// Write via temp file + fsync + rename, then fsync the directory
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> EnrichResult<()> {
    let context = path.display().to_string();
    let mut body =
        serde_json::to_string_pretty(value).map_err(|e| EnrichError::store(&context, e))?;
    body.push('\n');
    write_atomic(path, body.as_bytes()).map_err(|e| EnrichError::store(&context, e))
}

pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dir.join(format!(".{}.tmp", file_name));

    {
        let mut file = File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;

    #[cfg(unix)]
    File::open(&dir)?.sync_all()?;

    Ok(())
}

fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> EnrichResult<()> {
    let context = path.display().to_string();
    let mut line = serde_json::to_string(value).map_err(|e| EnrichError::store(&context, e))?;
    line.push('\n');

    let append = || -> std::io::Result<()> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        file.write_all(line.as_bytes())?;
        file.sync_data()
    };
    append().map_err(|e| EnrichError::store(&context, e))
}

// ============================================================================
// In memory
// ============================================================================

#[derive(Debug, Default)]
struct MemoryState {
    checkpoint: Option<Checkpoint>,
    cache: Cache,
    log: Vec<LogEntry>,
    checkpoint_history: Vec<usize>,
    fail_writes: bool,
}

/// In-process store for tests and dry runs
///
/// Clones share state, so a second run over a clone behaves like a restart
/// over the same files.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate the cache
    pub fn with_cached(self, key: &str, outcome: Outcome) -> Self {
        self.lock().cache.insert(key.to_string(), outcome);
        self
    }

    /// Make every subsequent write fail
    pub fn fail_writes(&self) {
        self.lock().fail_writes = true;
    }

    pub fn checkpoint(&self) -> Option<Checkpoint> {
        self.lock().checkpoint.clone()
    }

    pub fn cache(&self) -> Cache {
        self.lock().cache.clone()
    }

    pub fn log(&self) -> Vec<LogEntry> {
        self.lock().log.clone()
    }

    /// Every `next_index` ever saved, in order
    pub fn checkpoint_history(&self) -> Vec<usize> {
        self.lock().checkpoint_history.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        // A poisoned lock only means a test thread panicked mid-write
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check_writable(state: &MemoryState) -> EnrichResult<()> {
        if state.fail_writes {
            Err(EnrichError::Store("memory store: writes disabled".into()))
        } else {
            Ok(())
        }
    }
}

impl ProgressStore for MemoryStore {
    fn load(&mut self, total_units: usize) -> EnrichResult<(Checkpoint, Cache)> {
        let state = self.lock();
        let checkpoint = state
            .checkpoint
            .clone()
            .map(|cp| cp.clamp_to(total_units))
            .unwrap_or_else(|| Checkpoint::fresh(total_units));
        Ok((checkpoint, state.cache.clone()))
    }

    fn save(&mut self, checkpoint: &Checkpoint) -> EnrichResult<()> {
        let mut state = self.lock();
        Self::check_writable(&state)?;
        state.checkpoint_history.push(checkpoint.next_index);
        state.checkpoint = Some(checkpoint.clone());
        Ok(())
    }

    fn put(&mut self, key: &str, outcome: &Outcome) -> EnrichResult<()> {
        let mut state = self.lock();
        Self::check_writable(&state)?;
        state.cache.insert(key.to_string(), outcome.clone());
        Ok(())
    }

    fn reset(&mut self, total_units: usize) -> EnrichResult<Checkpoint> {
        let mut state = self.lock();
        Self::check_writable(&state)?;
        let checkpoint = Checkpoint::fresh(total_units);
        state.cache.clear();
        state.checkpoint_history.push(0);
        state.checkpoint = Some(checkpoint.clone());
        Ok(checkpoint)
    }

    fn append_log(&mut self, entry: &LogEntry) -> EnrichResult<()> {
        let mut state = self.lock();
        Self::check_writable(&state)?;
        state.log.push(entry.clone());
        Ok(())
    }
}
