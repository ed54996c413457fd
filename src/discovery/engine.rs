//! Discovery Engine
//!
//! Runs one directory search at a time, drops full sessions and ranks the
//! rest by latency.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::query::{SearchOutcome, SearchQuery, SearchResult};
use crate::directory::{DirectoryEntry, DirectoryService};
use crate::error::{CoordinatorError, Result};
use crate::lifecycle::Phase;

/// Clears the in-flight flag when the search ends, however it ends
struct InFlight<'a>(&'a AtomicBool);

impl<'a> InFlight<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Issues searches against the directory service
pub struct DiscoveryEngine {
    directory: Arc<dyn DirectoryService>,
    in_flight: AtomicBool,
}

impl DiscoveryEngine {
    pub fn new(directory: Arc<dyn DirectoryService>) -> Self {
        Self {
            directory,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_searching(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Search the directory.
    ///
    /// Zero matches is a successful empty outcome. A directory failure or a
    /// timeout is an empty outcome with `success == false`. Only a search
    /// already in flight is an `Err`.
    pub async fn search(&self, query: &SearchQuery, timeout: Duration) -> Result<SearchOutcome> {
        let _guard = InFlight::acquire(&self.in_flight).ok_or(CoordinatorError::AlreadyInProgress(Phase::Finding))?;

        debug!(
            "Searching {} directory (max {}, {}, {} filters)",
            self.directory.backend_name(),
            query.max_results,
            query.locality,
            query.required_attributes.len()
        );

        let entries = match tokio::time::timeout(timeout, self.directory.query(query)).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => {
                warn!("Directory search failed: {}", e);
                return Ok(SearchOutcome::failed());
            }
            Err(_) => {
                warn!("Directory search timed out after {:?}", timeout);
                return Ok(SearchOutcome::failed());
            }
        };

        let results = rank(entries, query.max_results);
        info!("Found {} joinable sessions", results.len());
        Ok(SearchOutcome::succeeded(results))
    }
}

/// Drop full sessions, order by latency then id, keep at most `max_results`
pub fn rank(entries: Vec<DirectoryEntry>, max_results: u32) -> Vec<SearchResult> {
    let mut results: Vec<SearchResult> = entries
        .into_iter()
        .filter(|entry| {
            let full = entry.descriptor.is_full();
            if full {
                debug!("Ignoring full session {}", entry.descriptor.id);
            }
            !full
        })
        .map(|entry| SearchResult {
            descriptor: entry.descriptor,
            latency: entry.latency,
            token: entry.token,
        })
        .collect();

    results.sort_by(|a, b| {
        a.latency
            .cmp(&b.latency)
            .then_with(|| a.descriptor.id.cmp(&b.descriptor.id))
    });
    results.truncate(max_results as usize);
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::directory::{ConnectionToken, InMemoryDirectory};
    use crate::session::{HostSettings, SessionDescriptor, SessionId};

    fn remote(id: &str, occupancy: u32) -> SessionDescriptor {
        let mut descriptor = HostSettings::new(&CoordinatorConfig::default(), 4, "Deathmatch").to_descriptor();
        descriptor.id = SessionId::from(id);
        descriptor.occupancy = occupancy;
        descriptor
    }

    fn entry(id: &str, latency_ms: u64) -> DirectoryEntry {
        DirectoryEntry {
            descriptor: remote(id, 0),
            latency: Duration::from_millis(latency_ms),
            token: ConnectionToken::new(id),
        }
    }

    #[test]
    fn test_rank_orders_by_latency_then_id() {
        let ranked = rank(vec![entry("c", 30), entry("b", 10), entry("a", 30)], 10);
        let ids: Vec<&str> = ranked.iter().map(|r| r.descriptor.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a", "c"]);
    }

    #[test]
    fn test_rank_drops_full_and_truncates() {
        let mut full = entry("full", 1);
        full.descriptor.occupancy = full.descriptor.capacity;

        let ranked = rank(vec![full, entry("x", 5), entry("y", 6), entry("z", 7)], 2);
        let ids: Vec<&str> = ranked.iter().map(|r| r.descriptor.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y"]);
    }

    #[tokio::test]
    async fn test_search_orders_results() {
        let directory = Arc::new(InMemoryDirectory::new());
        for (id, latency) in [("s1", 50), ("s2", 10), ("s3", 30)] {
            directory.seed_remote(remote(id, 1), Duration::from_millis(latency));
        }
        let engine = DiscoveryEngine::new(directory);

        let outcome = engine.search(&SearchQuery::new(10), Duration::from_secs(1)).await.unwrap();
        assert!(outcome.success);
        let latencies: Vec<u64> = outcome.results.map(|r| r.latency_ms()).collect();
        assert_eq!(latencies, vec![10, 30, 50]);
    }

    #[tokio::test]
    async fn test_zero_matches_is_success() {
        let engine = DiscoveryEngine::new(Arc::new(InMemoryDirectory::new()));
        let outcome = engine.search(&SearchQuery::new(10), Duration::from_secs(1)).await.unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.results.count(), 0);
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.seed_remote(remote("slow", 0), Duration::from_millis(5));
        directory.set_query_delay(Duration::from_millis(200));
        let engine = DiscoveryEngine::new(directory);

        let outcome = engine.search(&SearchQuery::new(10), Duration::from_millis(20)).await.unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.results.len(), 0);
        assert!(!engine.is_searching());
    }

    #[tokio::test]
    async fn test_concurrent_search_rejected() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.set_query_delay(Duration::from_millis(100));
        let engine = Arc::new(DiscoveryEngine::new(directory));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.search(&SearchQuery::new(5), Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = engine.search(&SearchQuery::new(5), Duration::from_secs(1)).await;
        assert!(matches!(second, Err(CoordinatorError::AlreadyInProgress(Phase::Finding))));
        assert!(first.await.unwrap().unwrap().success);
    }
}
