//! Directory Service Abstraction
//!
//! The directory is the external registry that stores advertisements and
//! answers discovery queries. Platform backends implement `DirectoryService`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::discovery::SearchQuery;
use crate::error::DirectoryError;
use crate::session::{SessionDescriptor, SessionId};

/// Handle identifying a published advertisement
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdvertisementHandle {
    session_id: SessionId,
}

impl AdvertisementHandle {
    /// Directories key advertisements by session id, so a handle can be
    /// rebuilt from the id when the original was never received.
    pub fn for_session(session_id: SessionId) -> Self {
        Self { session_id }
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }
}

/// Opaque token a joiner presents to the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionToken(String);

impl ConnectionToken {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One directory record returned by a query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub descriptor: SessionDescriptor,
    /// Estimated round trip to the host
    pub latency: Duration,
    pub token: ConnectionToken,
}

/// Directory service trait - implemented by platform backends
#[async_trait]
pub trait DirectoryService: Send + Sync {
    /// Publish a session
    async fn advertise(&self, descriptor: &SessionDescriptor) -> Result<AdvertisementHandle, DirectoryError>;

    /// Replace the metadata of a published session
    async fn update(&self, handle: &AdvertisementHandle, descriptor: &SessionDescriptor) -> Result<(), DirectoryError>;

    /// Remove a published session
    async fn withdraw(&self, handle: &AdvertisementHandle) -> Result<(), DirectoryError>;

    /// Find sessions matching the query's attribute, locality and presence filters
    async fn query(&self, query: &SearchQuery) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Fetch the current record of one session
    async fn lookup(&self, session_id: &SessionId) -> Result<Option<DirectoryEntry>, DirectoryError>;

    /// Backend name for logging
    fn backend_name(&self) -> &'static str;
}
