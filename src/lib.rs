//! Newsdesk: the asynchronous core of a news aggregator
//!
//! - [`search`]: one full-text index, written by a single indexing thread
//! - [`loader`]: per-source fetch scheduling with a bounded worker pool
//! - [`grouping`]: near-duplicate clustering of indexed news
//! - [`state`]: the store of record, in memory or on sled
//!
//! [`Pipeline`] wires them together.

pub mod config;
pub mod error;
pub mod grouping;
pub mod loader;
pub mod models;
pub mod news;
pub mod pipeline;
pub mod search;
pub mod state;

pub use config::Config;
pub use error::{AppError, Result};
pub use pipeline::Pipeline;
