//! Join Coordinator
//!
//! Negotiates admission to a remote session: handshake with retry, host
//! migration fallback through the directory, then connect string
//! resolution. One join at a time.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::transport::{HandshakeTarget, Transport};
use crate::config::CoordinatorConfig;
use crate::directory::DirectoryService;
use crate::discovery::SearchResult;
use crate::error::{JoinError, TransportError};
use crate::session::ConnectionInfo;

/// Handshake retry policy
#[derive(Debug, Clone)]
pub struct JoinPolicy {
    pub attempts: u32,
    pub retry_backoff: Duration,
    pub follow_host_migration: bool,
}

impl JoinPolicy {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            attempts: config.join.attempts.max(1),
            retry_backoff: config.retry_backoff(),
            follow_host_migration: config.join.follow_host_migration,
        }
    }
}

impl Default for JoinPolicy {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}

struct JoinSlot<'a>(&'a AtomicBool);

impl Drop for JoinSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Runs join handshakes against remote sessions
pub struct JoinCoordinator {
    directory: Arc<dyn DirectoryService>,
    transport: Arc<dyn Transport>,
    policy: JoinPolicy,
    in_flight: AtomicBool,
}

impl JoinCoordinator {
    pub fn new(directory: Arc<dyn DirectoryService>, transport: Arc<dyn Transport>, policy: JoinPolicy) -> Self {
        Self {
            directory,
            transport,
            policy,
            in_flight: AtomicBool::new(false),
        }
    }

    pub fn is_joining(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Join the session behind `result`.
    ///
    /// A call made while another join is pending fails with
    /// `AlreadyInSession` before the transport is contacted.
    pub async fn join(&self, result: &SearchResult, timeout: Duration) -> Result<ConnectionInfo, JoinError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("Join to {} refused: another join is pending", result.descriptor.id);
            return Err(JoinError::AlreadyInSession);
        }
        let _slot = JoinSlot(&self.in_flight);

        info!(
            "Joining session {} ({}) via {} transport",
            result.descriptor.name,
            result.descriptor.id,
            self.transport.transport_type()
        );

        match tokio::time::timeout(timeout, self.negotiate(result)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("Join to {} timed out after {:?}", result.descriptor.id, timeout);
                Err(JoinError::Timeout)
            }
        }
    }

    async fn negotiate(&self, result: &SearchResult) -> Result<ConnectionInfo, JoinError> {
        let mut target = HandshakeTarget::from(result);
        let mut descriptor = result.descriptor.clone();

        if let Err(e) = self.handshake_with_retry(&target).await {
            let migratable = matches!(
                e,
                TransportError::Unreachable(_) | TransportError::TimedOut | TransportError::HostMigrated(_)
            );
            if !(migratable && self.policy.follow_host_migration) {
                return Err(e.into());
            }

            match self.directory.lookup(&target.session_id).await {
                Ok(Some(entry)) if entry.descriptor.host_endpoint != target.endpoint => {
                    info!(
                        "Session {} migrated from {} to {}, retrying",
                        target.session_id, target.endpoint, entry.descriptor.host_endpoint
                    );
                    target.endpoint = entry.descriptor.host_endpoint.clone();
                    target.token = entry.token;
                    descriptor = entry.descriptor;
                    self.handshake_with_retry(&target).await?;
                }
                Ok(Some(_)) => return Err(e.into()),
                Ok(None) => {
                    return Err(JoinError::Rejected(format!(
                        "session {} is no longer advertised",
                        target.session_id
                    )))
                }
                Err(lookup_err) => {
                    warn!("Host migration lookup failed: {}", lookup_err);
                    return Err(e.into());
                }
            }
        }

        let connect_string = self
            .transport
            .resolve_connect_string(&target.session_id)
            .await
            .map_err(|e| {
                warn!("Could not resolve connect string for {}: {}", target.session_id, e);
                JoinError::from(e)
            })?;

        info!("Joined {} at {}", target.session_id, connect_string);
        Ok(ConnectionInfo {
            session_id: target.session_id,
            connect_string,
            descriptor,
        })
    }

    async fn handshake_with_retry(&self, target: &HandshakeTarget) -> Result<(), TransportError> {
        let mut attempt = 1;
        loop {
            match self.transport.handshake(target).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_transient() && attempt < self.policy.attempts => {
                    debug!(
                        "Handshake attempt {}/{} with {} failed: {}",
                        attempt, self.policy.attempts, target.endpoint, e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.policy.retry_backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::InMemoryDirectory;
    use crate::join::LoopbackTransport;
    use crate::session::HostSettings;

    fn policy() -> JoinPolicy {
        JoinPolicy {
            attempts: 2,
            retry_backoff: Duration::from_millis(1),
            follow_host_migration: true,
        }
    }

    fn setup() -> (Arc<InMemoryDirectory>, Arc<LoopbackTransport>, Arc<JoinCoordinator>, SearchResult) {
        let directory = Arc::new(InMemoryDirectory::new());
        let transport = Arc::new(LoopbackTransport::new());
        let mut descriptor = HostSettings::new(&CoordinatorConfig::default(), 4, "Deathmatch").to_descriptor();
        descriptor.host_endpoint = "10.0.0.2:7777".to_string();
        let token = directory.seed_remote(descriptor.clone(), Duration::from_millis(12));
        let result = SearchResult {
            descriptor,
            latency: Duration::from_millis(12),
            token,
        };
        let coordinator = Arc::new(JoinCoordinator::new(directory.clone(), transport.clone(), policy()));
        (directory, transport, coordinator, result)
    }

    #[tokio::test]
    async fn test_join_success() {
        let (_, transport, coordinator, result) = setup();
        let connection = coordinator.join(&result, Duration::from_secs(1)).await.unwrap();
        assert_eq!(connection.connect_string, "10.0.0.2:7777");
        assert_eq!(connection.session_id, result.descriptor.id);
        assert_eq!(transport.handshake_count(), 1);
        assert!(!coordinator.is_joining());
    }

    #[tokio::test]
    async fn test_rejection_is_not_retried() {
        let (_, transport, coordinator, result) = setup();
        transport.reject_with("session full");

        let err = coordinator.join(&result, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, JoinError::Rejected("session full".to_string()));
        assert_eq!(transport.handshake_count(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_host_retries_then_times_out() {
        let (_, transport, coordinator, result) = setup();
        transport.set_unreachable("10.0.0.2:7777");

        let err = coordinator.join(&result, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, JoinError::Timeout);
        assert_eq!(transport.handshake_count(), 2);
    }

    #[tokio::test]
    async fn test_follows_host_migration() {
        let (directory, transport, coordinator, result) = setup();
        transport.set_unreachable("10.0.0.2:7777");
        directory.migrate_host(&result.descriptor.id, "10.0.0.3:7777");

        let connection = coordinator.join(&result, Duration::from_secs(1)).await.unwrap();
        assert_eq!(connection.connect_string, "10.0.0.3:7777");
        assert_eq!(connection.descriptor.host_endpoint, "10.0.0.3:7777");
        assert_eq!(transport.handshake_count(), 3);
    }

    #[tokio::test]
    async fn test_withdrawn_session_rejected_after_unreachable() {
        let (directory, transport, coordinator, result) = setup();
        transport.set_unreachable("10.0.0.2:7777");
        let handle = crate::directory::AdvertisementHandle::for_session(result.descriptor.id.clone());
        directory.withdraw(&handle).await.unwrap();

        let err = coordinator.join(&result, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, JoinError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_resolve_failure_maps_to_timeout() {
        let (_, transport, coordinator, result) = setup();
        transport.fail_resolve_with(TransportError::Unreachable("relay".to_string()));

        let err = coordinator.join(&result, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, JoinError::Timeout);
    }

    #[tokio::test]
    async fn test_unavailable_transport() {
        let (_, transport, coordinator, result) = setup();
        transport.set_available(false);

        let err = coordinator.join(&result, Duration::from_secs(1)).await.unwrap_err();
        assert_eq!(err, JoinError::InvalidInterface);
    }

    #[tokio::test]
    async fn test_second_join_while_pending() {
        let (_, transport, coordinator, result) = setup();
        transport.set_handshake_delay(Duration::from_millis(100));

        let first = {
            let coordinator = coordinator.clone();
            let result = result.clone();
            tokio::spawn(async move { coordinator.join(&result, Duration::from_secs(1)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;

        let second = coordinator.join(&result, Duration::from_secs(1)).await;
        assert_eq!(second.unwrap_err(), JoinError::AlreadyInSession);
        assert_eq!(transport.handshake_count(), 1);
        assert!(first.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_overall_timeout() {
        let (_, transport, coordinator, result) = setup();
        transport.set_handshake_delay(Duration::from_millis(200));

        let err = coordinator.join(&result, Duration::from_millis(20)).await.unwrap_err();
        assert_eq!(err, JoinError::Timeout);
        assert!(!coordinator.is_joining());
    }
}
