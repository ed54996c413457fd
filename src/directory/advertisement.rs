//! Advertisement Manager
//!
//! Publishes and withdraws the local session's directory record. At most one
//! advertisement exists at a time; publishing over a live one fails fast.

use log::{debug, info, warn};
use parking_lot::Mutex;
use std::sync::Arc;

use super::service::{AdvertisementHandle, DirectoryService};
use crate::error::PublishError;
use crate::session::{SessionDescriptor, SessionId};

pub const MAX_ATTRIBUTES: usize = 32;
pub const MAX_ATTRIBUTE_KEY_LEN: usize = 64;
pub const MAX_ATTRIBUTE_VALUE_LEN: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
enum AdState {
    Idle,
    Publishing(SessionId),
    Published(AdvertisementHandle),
}

/// Manages the advertisement of the locally hosted session
pub struct AdvertisementManager {
    directory: Arc<dyn DirectoryService>,
    state: Mutex<AdState>,
}

impl AdvertisementManager {
    pub fn new(directory: Arc<dyn DirectoryService>) -> Self {
        Self {
            directory,
            state: Mutex::new(AdState::Idle),
        }
    }

    /// Handle of the live advertisement, if any
    pub fn current_handle(&self) -> Option<AdvertisementHandle> {
        match &*self.state.lock() {
            AdState::Published(handle) => Some(handle.clone()),
            _ => None,
        }
    }

    pub fn is_published(&self) -> bool {
        self.current_handle().is_some()
    }

    /// Publish `descriptor`. Fails with `AlreadyPublished` while another
    /// publish is live or in flight.
    pub async fn publish(&self, descriptor: &SessionDescriptor) -> Result<AdvertisementHandle, PublishError> {
        validate_attributes(descriptor)?;

        {
            let mut state = self.state.lock();
            let live = match &*state {
                AdState::Idle => None,
                AdState::Publishing(id) => Some(id.to_string()),
                AdState::Published(handle) => Some(handle.session_id().to_string()),
            };
            if let Some(id) = live {
                return Err(PublishError::AlreadyPublished(id));
            }
            *state = AdState::Publishing(descriptor.id.clone());
        }

        match self.directory.advertise(descriptor).await {
            Ok(handle) => {
                *self.state.lock() = AdState::Published(handle.clone());
                info!(
                    "Published session {} ({}) to {} directory",
                    descriptor.name,
                    descriptor.id,
                    self.directory.backend_name()
                );
                Ok(handle)
            }
            Err(e) => {
                *self.state.lock() = AdState::Idle;
                warn!("Failed to publish session {}: {}", descriptor.id, e);
                Err(e.into())
            }
        }
    }

    /// Withdraw the advertisement. The handle stays live if the directory
    /// refuses, so the call can be retried.
    pub async fn unpublish(&self, handle: &AdvertisementHandle) -> Result<(), PublishError> {
        if self.current_handle().as_ref() != Some(handle) {
            return Err(PublishError::NotPublished);
        }

        self.directory.withdraw(handle).await?;

        let mut state = self.state.lock();
        if matches!(&*state, AdState::Published(current) if current == handle) {
            *state = AdState::Idle;
        }
        info!("Unpublished session {}", handle.session_id());
        Ok(())
    }

    /// Push updated metadata for the live advertisement
    pub async fn refresh(&self, descriptor: &SessionDescriptor) -> Result<(), PublishError> {
        validate_attributes(descriptor)?;
        let handle = match self.current_handle() {
            Some(handle) if handle.session_id() == &descriptor.id => handle,
            _ => return Err(PublishError::NotPublished),
        };
        self.directory.update(&handle, descriptor).await?;
        debug!("Refreshed advertisement for {}", descriptor.id);
        Ok(())
    }

    /// Best-effort withdrawal of whatever the directory holds for
    /// `session_id`, used after a publish was cut off by a timeout or the
    /// owning operation was abandoned.
    pub async fn abandon(&self, session_id: &SessionId) {
        {
            let mut state = self.state.lock();
            let owned = match &*state {
                AdState::Publishing(id) => id == session_id,
                AdState::Published(handle) => handle.session_id() == session_id,
                AdState::Idle => false,
            };
            if owned {
                *state = AdState::Idle;
            }
        }

        let handle = AdvertisementHandle::for_session(session_id.clone());
        match self.directory.withdraw(&handle).await {
            Ok(()) => info!("Withdrew abandoned advertisement {}", session_id),
            Err(e) => debug!("Nothing to withdraw for {}: {}", session_id, e),
        }
    }
}

/// Reject attribute maps the directory would refuse
pub fn validate_attributes(descriptor: &SessionDescriptor) -> Result<(), PublishError> {
    if descriptor.attributes.len() > MAX_ATTRIBUTES {
        return Err(PublishError::InvalidAttributes(format!(
            "{} attributes exceeds limit of {}",
            descriptor.attributes.len(),
            MAX_ATTRIBUTES
        )));
    }
    for (key, value) in &descriptor.attributes {
        if key.trim().is_empty() {
            return Err(PublishError::InvalidAttributes("empty attribute key".to_string()));
        }
        if key.len() > MAX_ATTRIBUTE_KEY_LEN {
            return Err(PublishError::InvalidAttributes(format!("attribute key too long: {}", key)));
        }
        if value.len() > MAX_ATTRIBUTE_VALUE_LEN {
            return Err(PublishError::InvalidAttributes(format!("attribute value too long for {}", key)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CoordinatorConfig;
    use crate::directory::InMemoryDirectory;
    use crate::session::HostSettings;

    fn setup() -> (Arc<InMemoryDirectory>, AdvertisementManager) {
        let directory = Arc::new(InMemoryDirectory::new());
        let manager = AdvertisementManager::new(directory.clone());
        (directory, manager)
    }

    fn descriptor() -> SessionDescriptor {
        HostSettings::new(&CoordinatorConfig::default(), 4, "Deathmatch").to_descriptor()
    }

    #[tokio::test]
    async fn test_publish_unpublish() {
        let (directory, manager) = setup();
        let descriptor = descriptor();

        let handle = manager.publish(&descriptor).await.unwrap();
        assert!(manager.is_published());
        assert!(directory.is_advertised(&descriptor.id));

        manager.unpublish(&handle).await.unwrap();
        assert!(!manager.is_published());
        assert!(!directory.is_advertised(&descriptor.id));

        // Publishing again is fine after a successful unpublish
        assert!(manager.publish(&descriptor).await.is_ok());
    }

    #[tokio::test]
    async fn test_publish_twice_fails_fast() {
        let (directory, manager) = setup();
        let first = descriptor();
        manager.publish(&first).await.unwrap();

        let second = descriptor();
        let result = manager.publish(&second).await;
        assert!(matches!(result, Err(PublishError::AlreadyPublished(_))));
        assert!(directory.is_advertised(&first.id));
        assert!(!directory.is_advertised(&second.id));
    }

    #[tokio::test]
    async fn test_directory_unavailable() {
        let (directory, manager) = setup();
        directory.set_available(false);

        let result = manager.publish(&descriptor()).await;
        assert!(matches!(result, Err(PublishError::DirectoryUnavailable(_))));
        assert!(!manager.is_published());
    }

    #[tokio::test]
    async fn test_invalid_attributes_never_reach_directory() {
        let (directory, manager) = setup();
        let mut descriptor = descriptor();
        descriptor.attributes.insert(" ".to_string(), "x".to_string());

        let result = manager.publish(&descriptor).await;
        assert!(matches!(result, Err(PublishError::InvalidAttributes(_))));
        assert_eq!(directory.record_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_withdraw_keeps_handle() {
        let (directory, manager) = setup();
        let handle = manager.publish(&descriptor()).await.unwrap();

        directory.set_available(false);
        assert!(manager.unpublish(&handle).await.is_err());
        assert_eq!(manager.current_handle(), Some(handle.clone()));

        directory.set_available(true);
        assert!(manager.unpublish(&handle).await.is_ok());
    }

    #[tokio::test]
    async fn test_refresh_and_abandon() {
        let (directory, manager) = setup();
        let mut descriptor = descriptor();
        manager.publish(&descriptor).await.unwrap();

        descriptor.occupancy = 2;
        manager.refresh(&descriptor).await.unwrap();
        assert_eq!(directory.descriptor(&descriptor.id).unwrap().occupancy, 2);

        manager.abandon(&descriptor.id).await;
        assert!(!manager.is_published());
        assert!(!directory.is_advertised(&descriptor.id));
        assert!(matches!(manager.refresh(&descriptor).await, Err(PublishError::NotPublished)));
    }
}
