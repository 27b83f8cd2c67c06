//! # cvsync-enrich
//!
//! Resumable, rate-limited enrichment of cultivar records from several web
//! sources.
//!
//! **Layers (bottom-up):**
//! - [`normalize`], [`scoring`]: name keys, query variants, fuzzy matching
//! - [`fetch`], [`scheduler`]: HTTP boundary, concurrency ceiling and rate gates
//! - [`strategy`], [`probes`]: per-source strategies and the fallthrough chain
//! - [`checkpoint`], [`store`]: durable cursor and outcome cache
//! - [`pipeline`], [`progress`], [`report`]: the aggregator and its outputs
//! - [`config`], [`dataset`], [`jobs`]: wiring for the `cvsync` binary

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod error;
pub mod fetch;
pub mod jobs;
pub mod normalize;
pub mod pipeline;
pub mod probes;
pub mod progress;
pub mod report;
pub mod scheduler;
pub mod scoring;
pub mod store;
pub mod strategy;
pub mod types;

pub use crate::error::{EnrichError, EnrichResult, ProbeError};
pub use crate::pipeline::{Aggregator, RunOptions};
pub use crate::report::RunReport;
pub use crate::strategy::{Strategy, StrategyChain};
pub use crate::types::{Outcome, OutcomeStatus, ProbeResult, ProbeStatus, WorkUnit};
