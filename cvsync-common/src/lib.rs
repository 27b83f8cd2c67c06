//! # cvsync Common Library
//!
//! Shared code for the cvsync tools:
//! - Error type and result alias
//! - Configuration file discovery and root folder resolution
//! - Run event types and the broadcast event bus
//! - Timestamp and duration formatting helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
