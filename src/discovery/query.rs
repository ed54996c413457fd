//! Discovery Types
//!
//! Search queries, ranked results and the one-shot result sequence a search
//! produces.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::config::{CoordinatorConfig, Locality};
use crate::directory::ConnectionToken;
use crate::session::{SessionDescriptor, MATCH_TYPE_KEY};

/// Parameters of one search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    pub max_results: u32,
    /// Attributes a session must advertise with exactly these values
    pub required_attributes: BTreeMap<String, String>,
    pub locality: Locality,
    /// Only presence-enabled sessions
    pub presence_only: bool,
}

impl SearchQuery {
    pub fn new(max_results: u32) -> Self {
        Self {
            max_results,
            required_attributes: BTreeMap::new(),
            locality: Locality::Online,
            presence_only: true,
        }
    }

    /// Query built from the `[search]` config section
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            max_results: config.search.max_search_results,
            required_attributes: BTreeMap::new(),
            locality: config.search.locality,
            presence_only: config.search.presence_only,
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.required_attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_match_type(self, match_type: impl Into<String>) -> Self {
        self.with_attribute(MATCH_TYPE_KEY, match_type)
    }

    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    pub fn with_presence_only(mut self, presence_only: bool) -> Self {
        self.presence_only = presence_only;
        self
    }
}

/// Snapshot of a remote session returned by a search
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub descriptor: SessionDescriptor,
    pub latency: Duration,
    pub token: ConnectionToken,
}

impl SearchResult {
    pub fn latency_ms(&self) -> u64 {
        self.latency.as_millis() as u64
    }
}

/// Finite, one-shot sequence of ranked results.
///
/// Each search yields a fresh sequence; it cannot be restarted once consumed.
#[derive(Debug, Clone)]
pub struct SearchResults {
    inner: std::vec::IntoIter<SearchResult>,
}

impl SearchResults {
    pub fn empty() -> Self {
        Self::from(Vec::new())
    }
}

impl From<Vec<SearchResult>> for SearchResults {
    fn from(results: Vec<SearchResult>) -> Self {
        Self {
            inner: results.into_iter(),
        }
    }
}

impl Iterator for SearchResults {
    type Item = SearchResult;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for SearchResults {}

/// Result sequence plus the success flag distinguishing "no matches" from
/// "directory failed"
#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub results: SearchResults,
    pub success: bool,
}

impl SearchOutcome {
    pub fn succeeded(results: Vec<SearchResult>) -> Self {
        Self {
            results: results.into(),
            success: true,
        }
    }

    pub fn failed() -> Self {
        Self {
            results: SearchResults::empty(),
            success: false,
        }
    }
}
