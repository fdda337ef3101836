//! Near-duplicate grouping of news
//!
//! Every news item committed to the index while still ungrouped lands in the
//! [`GroupingQueue`]. The [`NewsGrouper`] takes items one at a time, asks the
//! [`SimilarNewsFinder`] for indexed items of the same locale and category
//! published around the same time that read alike, and tags them all with a
//! shared group id.
//!
//! ```text
//!   IndexingThread ──commit──▶ NewsIndexHook ──push──▶ GroupingQueue
//!                                                           │
//!                                                      NewsGrouper ──▶ store + index
//! ```
//!
//! A group never splits: an item keeps its positive group, and only items
//! without one are pulled into a group found for another item.

mod config;
mod finder;
mod grouper;
mod queue;

pub use config::{GroupingConfig, GroupingConfigBuilder};
pub use finder::{above_threshold, ScoredNews, SimilarNewsFinder};
pub use grouper::{GroupOutcome, NewsGrouper};
pub use queue::GroupingQueue;
