//! Transport Abstraction
//!
//! The transport performs the connection handshake with a remote host and
//! resolves the connect string the game connection uses. NAT traversal and
//! the wire protocol live behind this trait.

use async_trait::async_trait;
use log::debug;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use crate::directory::ConnectionToken;
use crate::discovery::SearchResult;
use crate::error::TransportError;
use crate::session::{ConnectionInfo, SessionDescriptor, SessionId};

/// Where a handshake is sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeTarget {
    pub session_id: SessionId,
    pub endpoint: String,
    pub token: ConnectionToken,
}

impl From<&SearchResult> for HandshakeTarget {
    fn from(result: &SearchResult) -> Self {
        Self {
            session_id: result.descriptor.id.clone(),
            endpoint: result.descriptor.host_endpoint.clone(),
            token: result.token.clone(),
        }
    }
}

/// Transport trait - implemented by networking backends
#[async_trait]
pub trait Transport: Send + Sync {
    /// Negotiate admission with the host at `target.endpoint`
    async fn handshake(&self, target: &HandshakeTarget) -> Result<(), TransportError>;

    /// Address for the game connection to a session we were admitted to
    async fn resolve_connect_string(&self, session_id: &SessionId) -> Result<String, TransportError>;

    /// Get transport type name
    fn transport_type(&self) -> &'static str;
}

/// Receives travel requests once a session is ready. Level loading is the
/// host application's concern.
pub trait TravelHandler: Send + Sync {
    /// Called after the local session was created and advertised
    fn host_travel(&self, descriptor: &SessionDescriptor);

    /// Called after a join resolved its connect string
    fn client_travel(&self, connection: &ConnectionInfo);
}

/// Travel handler that only logs
pub struct NoTravel;

impl TravelHandler for NoTravel {
    fn host_travel(&self, descriptor: &SessionDescriptor) {
        debug!("Hosting {} (no travel handler)", descriptor.id);
    }

    fn client_travel(&self, connection: &ConnectionInfo) {
        debug!("Joined {} at {} (no travel handler)", connection.session_id, connection.connect_string);
    }
}

/// In-process transport that admits every handshake unless told otherwise.
///
/// Used by the demo binary and tests; endpoints can be marked unreachable,
/// handshakes rejected or delayed, and resolution failed.
pub struct LoopbackTransport {
    available: AtomicBool,
    unreachable: RwLock<HashSet<String>>,
    rejection: RwLock<Option<String>>,
    resolve_failure: RwLock<Option<TransportError>>,
    handshake_delay: RwLock<Duration>,
    admitted: RwLock<HashMap<SessionId, String>>,
    handshakes: AtomicUsize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            available: AtomicBool::new(true),
            unreachable: RwLock::new(HashSet::new()),
            rejection: RwLock::new(None),
            resolve_failure: RwLock::new(None),
            handshake_delay: RwLock::new(Duration::ZERO),
            admitted: RwLock::new(HashMap::new()),
            handshakes: AtomicUsize::new(0),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn set_unreachable(&self, endpoint: impl Into<String>) {
        self.unreachable.write().insert(endpoint.into());
    }

    pub fn reject_with(&self, reason: impl Into<String>) {
        *self.rejection.write() = Some(reason.into());
    }

    pub fn fail_resolve_with(&self, error: TransportError) {
        *self.resolve_failure.write() = Some(error);
    }

    pub fn set_handshake_delay(&self, delay: Duration) {
        *self.handshake_delay.write() = delay;
    }

    /// Handshakes attempted so far
    pub fn handshake_count(&self) -> usize {
        self.handshakes.load(Ordering::SeqCst)
    }
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn handshake(&self, target: &HandshakeTarget) -> Result<(), TransportError> {
        self.handshakes.fetch_add(1, Ordering::SeqCst);

        let delay = *self.handshake_delay.read();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if !self.available.load(Ordering::SeqCst) {
            return Err(TransportError::Unavailable);
        }
        if self.unreachable.read().contains(&target.endpoint) {
            return Err(TransportError::Unreachable(target.endpoint.clone()));
        }
        if let Some(reason) = self.rejection.read().clone() {
            return Err(TransportError::Rejected(reason));
        }

        self.admitted
            .write()
            .insert(target.session_id.clone(), target.endpoint.clone());
        debug!("Loopback handshake admitted to {} at {}", target.session_id, target.endpoint);
        Ok(())
    }

    async fn resolve_connect_string(&self, session_id: &SessionId) -> Result<String, TransportError> {
        if let Some(error) = self.resolve_failure.read().clone() {
            return Err(error);
        }
        self.admitted
            .read()
            .get(session_id)
            .cloned()
            .ok_or_else(|| TransportError::Rejected(format!("not admitted to {}", session_id)))
    }

    fn transport_type(&self) -> &'static str {
        "loopback"
    }
}
