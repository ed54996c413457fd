//! Discovery Module
//!
//! Directory searches and result ranking.

pub mod engine;
pub mod query;

pub use engine::{rank, DiscoveryEngine};
pub use query::{SearchOutcome, SearchQuery, SearchResult, SearchResults};
