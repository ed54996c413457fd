//! In-Memory Directory
//!
//! Process-local `DirectoryService` backed by DashMap. Serves as the LAN
//! directory for the demo binary and as the test double, with knobs for
//! availability, delays and host migration.

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, info, warn};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use super::service::{AdvertisementHandle, ConnectionToken, DirectoryEntry, DirectoryService};
use crate::discovery::SearchQuery;
use crate::error::DirectoryError;
use crate::session::{SessionDescriptor, SessionId};

#[derive(Debug, Clone)]
struct Record {
    descriptor: SessionDescriptor,
    latency: Duration,
    token: ConnectionToken,
}

#[derive(Debug, Clone, Copy, Default)]
struct Delays {
    advertise: Duration,
    query: Duration,
    withdraw: Duration,
}

/// In-process directory service
pub struct InMemoryDirectory {
    records: DashMap<SessionId, Record>,
    available: AtomicBool,
    delays: RwLock<Delays>,
    queries: AtomicUsize,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self {
            records: DashMap::new(),
            available: AtomicBool::new(true),
            delays: RwLock::new(Delays::default()),
            queries: AtomicUsize::new(0),
        }
    }

    /// Make every call fail with `Unavailable` until re-enabled
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_advertise_delay(&self, delay: Duration) {
        self.delays.write().advertise = delay;
    }

    pub fn set_query_delay(&self, delay: Duration) {
        self.delays.write().query = delay;
    }

    pub fn set_withdraw_delay(&self, delay: Duration) {
        self.delays.write().withdraw = delay;
    }

    /// Insert a session hosted elsewhere, as seen from here with `latency`
    pub fn seed_remote(&self, descriptor: SessionDescriptor, latency: Duration) -> ConnectionToken {
        let token = ConnectionToken::new(format!("tok-{}", descriptor.id));
        self.records.insert(
            descriptor.id.clone(),
            Record {
                descriptor,
                latency,
                token: token.clone(),
            },
        );
        token
    }

    /// Move a session to a new host endpoint, as a host migration would
    pub fn migrate_host(&self, session_id: &SessionId, new_endpoint: impl Into<String>) -> bool {
        match self.records.get_mut(session_id) {
            Some(mut record) => {
                record.descriptor.host_endpoint = new_endpoint.into();
                info!("Session {} migrated to {}", session_id, record.descriptor.host_endpoint);
                true
            }
            None => false,
        }
    }

    pub fn is_advertised(&self, session_id: &SessionId) -> bool {
        self.records.contains_key(session_id)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// Number of queries served, including failed ones
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    pub fn descriptor(&self, session_id: &SessionId) -> Option<SessionDescriptor> {
        self.records.get(session_id).map(|r| r.descriptor.clone())
    }

    fn check_available(&self) -> Result<(), DirectoryError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(DirectoryError::Unavailable("in-memory directory disabled".to_string()))
        }
    }

    async fn pause(delay: Duration) {
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    fn matches(query: &SearchQuery, descriptor: &SessionDescriptor) -> bool {
        if !descriptor.visibility.should_advertise || descriptor.locality != query.locality {
            return false;
        }
        if query.presence_only && !descriptor.visibility.uses_presence {
            return false;
        }
        if descriptor.in_progress && !descriptor.visibility.allow_join_in_progress {
            return false;
        }
        query
            .required_attributes
            .iter()
            .all(|(key, value)| descriptor.attributes.get(key) == Some(value))
    }
}

impl Default for InMemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DirectoryService for InMemoryDirectory {
    async fn advertise(&self, descriptor: &SessionDescriptor) -> Result<AdvertisementHandle, DirectoryError> {
        let delay = self.delays.read().advertise;
        Self::pause(delay).await;
        self.check_available()?;

        let duplicate = self.records.iter().any(|r| {
            r.descriptor.id != descriptor.id
                && r.descriptor.name == descriptor.name
                && r.descriptor.owner == descriptor.owner
        });
        if duplicate {
            warn!("Rejecting duplicate advertisement {} for {}", descriptor.name, descriptor.owner);
            return Err(DirectoryError::DuplicateName(descriptor.name.clone()));
        }

        self.records.insert(
            descriptor.id.clone(),
            Record {
                descriptor: descriptor.clone(),
                latency: Duration::ZERO,
                token: ConnectionToken::new(format!("tok-{}", descriptor.id)),
            },
        );
        debug!("Advertised session {} ({})", descriptor.name, descriptor.id);
        Ok(AdvertisementHandle::for_session(descriptor.id.clone()))
    }

    async fn update(&self, handle: &AdvertisementHandle, descriptor: &SessionDescriptor) -> Result<(), DirectoryError> {
        self.check_available()?;
        match self.records.get_mut(handle.session_id()) {
            Some(mut record) => {
                record.descriptor = descriptor.clone();
                Ok(())
            }
            None => Err(DirectoryError::UnknownAdvertisement(handle.session_id().to_string())),
        }
    }

    async fn withdraw(&self, handle: &AdvertisementHandle) -> Result<(), DirectoryError> {
        let delay = self.delays.read().withdraw;
        Self::pause(delay).await;
        self.check_available()?;
        match self.records.remove(handle.session_id()) {
            Some(_) => {
                debug!("Withdrew session {}", handle.session_id());
                Ok(())
            }
            None => Err(DirectoryError::UnknownAdvertisement(handle.session_id().to_string())),
        }
    }

    async fn query(&self, query: &SearchQuery) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let delay = self.delays.read().query;
        Self::pause(delay).await;
        self.check_available()?;

        Ok(self
            .records
            .iter()
            .filter(|r| Self::matches(query, &r.descriptor))
            .map(|r| DirectoryEntry {
                descriptor: r.descriptor.clone(),
                latency: r.latency,
                token: r.token.clone(),
            })
            .collect())
    }

    async fn lookup(&self, session_id: &SessionId) -> Result<Option<DirectoryEntry>, DirectoryError> {
        self.check_available()?;
        Ok(self.records.get(session_id).map(|r| DirectoryEntry {
            descriptor: r.descriptor.clone(),
            latency: r.latency,
            token: r.token.clone(),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "in-memory"
    }
}
