//! Session Registry
//!
//! Authoritative in-process record of the locally hosted session and the
//! remote session currently joined. Only the lifecycle coordinator writes
//! to it; readers take snapshots.

use log::debug;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::descriptor::{ConnectionInfo, SessionDescriptor, SessionId};

/// Change notifications emitted on every registry mutation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RegistryChange {
    LocalRegistered { session_id: SessionId },
    LocalUpdated { session_id: SessionId, occupancy: u32, in_progress: bool },
    LocalCleared { session_id: SessionId },
    RemoteJoined { session_id: SessionId },
    RemoteLeft { session_id: SessionId },
}

/// Registry errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("A local session is already registered: {0}")]
    LocalSessionExists(SessionId),

    #[error("No local session is registered")]
    NoLocalSession,

    #[error("Already in remote session: {0}")]
    RemoteSessionExists(SessionId),
}

#[derive(Debug, Default)]
struct Slots {
    local: Option<SessionDescriptor>,
    remote: Option<ConnectionInfo>,
}

/// Single-local-session registry
pub struct SessionRegistry {
    slots: RwLock<Slots>,
    change_tx: broadcast::Sender<RegistryChange>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (change_tx, _) = broadcast::channel(64);
        Self {
            slots: RwLock::new(Slots::default()),
            change_tx,
        }
    }

    /// Subscribe to change notifications
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryChange> {
        self.change_tx.subscribe()
    }

    fn notify(&self, change: RegistryChange) -> RegistryChange {
        debug!("Registry change: {:?}", change);
        let _ = self.change_tx.send(change.clone());
        change
    }

    /// Record the locally hosted session. Fails if one is already registered.
    pub fn register_local(&self, descriptor: SessionDescriptor) -> Result<RegistryChange, RegistryError> {
        let session_id = descriptor.id.clone();
        {
            let mut slots = self.slots.write();
            if let Some(existing) = &slots.local {
                return Err(RegistryError::LocalSessionExists(existing.id.clone()));
            }
            slots.local = Some(descriptor);
        }
        Ok(self.notify(RegistryChange::LocalRegistered { session_id }))
    }

    /// Apply a mutation to the local descriptor and return the updated snapshot
    pub fn update_local<F>(&self, mutate: F) -> Result<SessionDescriptor, RegistryError>
    where
        F: FnOnce(&mut SessionDescriptor),
    {
        let updated = {
            let mut slots = self.slots.write();
            let local = slots.local.as_mut().ok_or(RegistryError::NoLocalSession)?;
            mutate(local);
            local.clone()
        };
        self.notify(RegistryChange::LocalUpdated {
            session_id: updated.id.clone(),
            occupancy: updated.occupancy,
            in_progress: updated.in_progress,
        });
        Ok(updated)
    }

    /// Remove the local session, returning it if one was registered
    pub fn clear_local(&self) -> Option<SessionDescriptor> {
        let cleared = self.slots.write().local.take();
        if let Some(descriptor) = &cleared {
            self.notify(RegistryChange::LocalCleared {
                session_id: descriptor.id.clone(),
            });
        }
        cleared
    }

    pub fn current_local(&self) -> Option<SessionDescriptor> {
        self.slots.read().local.clone()
    }

    /// Record the remote session just joined
    pub fn set_remote(&self, connection: ConnectionInfo) -> Result<RegistryChange, RegistryError> {
        let session_id = connection.session_id.clone();
        {
            let mut slots = self.slots.write();
            if let Some(existing) = &slots.remote {
                return Err(RegistryError::RemoteSessionExists(existing.session_id.clone()));
            }
            slots.remote = Some(connection);
        }
        Ok(self.notify(RegistryChange::RemoteJoined { session_id }))
    }

    pub fn clear_remote(&self) -> Option<ConnectionInfo> {
        let cleared = self.slots.write().remote.take();
        if let Some(connection) = &cleared {
            self.notify(RegistryChange::RemoteLeft {
                session_id: connection.session_id.clone(),
            });
        }
        cleared
    }

    pub fn current_remote(&self) -> Option<ConnectionInfo> {
        self.slots.read().remote.clone()
    }

    /// True when any session, hosted or joined, is recorded
    pub fn has_session(&self) -> bool {
        let slots = self.slots.read();
        slots.local.is_some() || slots.remote.is_some()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::session::descriptor::HostSettings;

    fn descriptor() -> SessionDescriptor {
        HostSettings::new(&CoordinatorConfig::default(), 4, "Deathmatch").to_descriptor()
    }

    #[test]
    fn test_single_local_session() {
        let registry = SessionRegistry::new();
        let first = descriptor();
        let first_id = first.id.clone();

        assert!(registry.register_local(first).is_ok());
        let result = registry.register_local(descriptor());
        assert_eq!(result, Err(RegistryError::LocalSessionExists(first_id.clone())));
        assert_eq!(registry.current_local().map(|d| d.id), Some(first_id));
    }

    #[test]
    fn test_clear_then_register_again() {
        let registry = SessionRegistry::new();
        registry.register_local(descriptor()).unwrap();
        assert!(registry.clear_local().is_some());
        assert!(registry.clear_local().is_none());
        assert!(registry.register_local(descriptor()).is_ok());
    }

    #[test]
    fn test_update_local() {
        let registry = SessionRegistry::new();
        assert_eq!(
            registry.update_local(|d| d.occupancy = 1).unwrap_err(),
            RegistryError::NoLocalSession
        );

        registry.register_local(descriptor()).unwrap();
        let updated = registry.update_local(|d| d.occupancy = 3).unwrap();
        assert_eq!(updated.occupancy, 3);
        assert_eq!(registry.current_local().unwrap().occupancy, 3);
    }

    #[test]
    fn test_remote_session() {
        let registry = SessionRegistry::new();
        let remote = descriptor();
        let connection = ConnectionInfo {
            session_id: remote.id.clone(),
            connect_string: "10.0.0.7:7777".to_string(),
            descriptor: remote,
        };

        assert!(!registry.has_session());
        registry.set_remote(connection.clone()).unwrap();
        assert!(registry.has_session());
        assert!(matches!(
            registry.set_remote(connection.clone()),
            Err(RegistryError::RemoteSessionExists(_))
        ));
        assert_eq!(registry.clear_remote(), Some(connection));
        assert!(registry.current_remote().is_none());
    }

    #[test]
    fn test_changes_are_broadcast() {
        let registry = SessionRegistry::new();
        let mut rx = registry.subscribe();
        let local = descriptor();
        let id = local.id.clone();

        registry.register_local(local).unwrap();
        registry.clear_local();

        assert_eq!(
            rx.try_recv().unwrap(),
            RegistryChange::LocalRegistered { session_id: id.clone() }
        );
        assert_eq!(rx.try_recv().unwrap(), RegistryChange::LocalCleared { session_id: id });
    }
}
