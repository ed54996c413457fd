//! Session Descriptors
//!
//! Data describing a hosted or remote session, and the settings a caller
//! hosts with.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::{CoordinatorConfig, Locality};

/// Attribute key carrying the match type
pub const MATCH_TYPE_KEY: &str = "MatchType";

/// Unique session identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random id
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discoverability and join policy flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    /// Publish the session to the directory
    pub should_advertise: bool,
    /// Accept joins after the match started
    pub allow_join_in_progress: bool,
    /// Visible through presence (friends / region)
    pub uses_presence: bool,
    pub allow_join_via_presence: bool,
}

impl Default for Visibility {
    fn default() -> Self {
        Self {
            should_advertise: true,
            allow_join_in_progress: true,
            uses_presence: true,
            allow_join_via_presence: true,
        }
    }
}

/// Parameters of a create request.
///
/// A create issued while a session already exists stores this value as the
/// recreate continuation, so the recreated session is built from the latest
/// request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostSettings {
    pub name: String,
    pub owner: String,
    pub host_endpoint: String,
    pub max_public_connections: u32,
    pub match_type: String,
    pub locality: Locality,
    pub visibility: Visibility,
    pub build_id: u32,
    /// Extra advertised attributes besides the match type
    pub attributes: BTreeMap<String, String>,
}

impl HostSettings {
    /// Settings with the config's hosting defaults and the given capacity and match type
    pub fn new(config: &CoordinatorConfig, max_public_connections: u32, match_type: impl Into<String>) -> Self {
        let mut settings = Self::from_config(config);
        settings.max_public_connections = max_public_connections;
        settings.match_type = match_type.into();
        settings
    }

    /// Settings taken entirely from configuration
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        let s = &config.session;
        Self {
            name: s.name.clone(),
            owner: s.owner.clone(),
            host_endpoint: s.host_endpoint.clone(),
            max_public_connections: s.max_public_connections,
            match_type: s.match_type.clone(),
            locality: s.locality,
            visibility: Visibility {
                should_advertise: s.should_advertise,
                allow_join_in_progress: s.allow_join_in_progress,
                uses_presence: s.uses_presence,
                allow_join_via_presence: s.allow_join_via_presence,
            },
            build_id: s.build_id,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    pub fn with_locality(mut self, locality: Locality) -> Self {
        self.locality = locality;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Check the request before anything is published
    pub fn validate(&self) -> Result<(), String> {
        if self.max_public_connections == 0 {
            return Err("max public connections must be positive".to_string());
        }
        if self.match_type.trim().is_empty() {
            return Err("match type must not be empty".to_string());
        }
        if self.name.trim().is_empty() {
            return Err("session name must not be empty".to_string());
        }
        Ok(())
    }

    /// Build the descriptor this request hosts
    pub fn to_descriptor(&self) -> SessionDescriptor {
        let mut attributes = self.attributes.clone();
        attributes.insert(MATCH_TYPE_KEY.to_string(), self.match_type.clone());

        SessionDescriptor {
            id: SessionId::generate(),
            name: self.name.clone(),
            owner: self.owner.clone(),
            host_endpoint: self.host_endpoint.clone(),
            capacity: self.max_public_connections,
            occupancy: 0,
            attributes,
            visibility: self.visibility,
            locality: self.locality,
            build_id: self.build_id,
            in_progress: false,
            created_at: Utc::now(),
        }
    }
}

/// A session as advertised in the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDescriptor {
    pub id: SessionId,
    pub name: String,
    pub owner: String,
    pub host_endpoint: String,
    pub capacity: u32,
    pub occupancy: u32,
    pub attributes: BTreeMap<String, String>,
    pub visibility: Visibility,
    pub locality: Locality,
    pub build_id: u32,
    /// Set once the host started the match
    pub in_progress: bool,
    pub created_at: DateTime<Utc>,
}

impl SessionDescriptor {
    pub fn match_type(&self) -> Option<&str> {
        self.attributes.get(MATCH_TYPE_KEY).map(String::as_str)
    }

    pub fn is_full(&self) -> bool {
        self.occupancy >= self.capacity
    }

    pub fn open_slots(&self) -> u32 {
        self.capacity.saturating_sub(self.occupancy)
    }

    /// Whether a new player may join right now
    pub fn accepts_joins(&self) -> bool {
        !self.is_full() && (!self.in_progress || self.visibility.allow_join_in_progress)
    }
}

/// Outcome of a successful join, handed to the transport layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionInfo {
    pub session_id: SessionId,
    /// Resolved address the game connection should use
    pub connect_string: String,
    pub descriptor: SessionDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_from_settings() {
        let config = CoordinatorConfig::default();
        let settings = HostSettings::new(&config, 4, "Deathmatch").with_attribute("Map", "Dust");
        let descriptor = settings.to_descriptor();

        assert_eq!(descriptor.capacity, 4);
        assert_eq!(descriptor.occupancy, 0);
        assert_eq!(descriptor.match_type(), Some("Deathmatch"));
        assert_eq!(descriptor.attributes.get("Map").map(String::as_str), Some("Dust"));
        assert!(!descriptor.in_progress);
    }

    #[test]
    fn test_each_descriptor_gets_fresh_id() {
        let settings = HostSettings::from_config(&CoordinatorConfig::default());
        assert_ne!(settings.to_descriptor().id, settings.to_descriptor().id);
    }

    #[test]
    fn test_settings_validation() {
        let config = CoordinatorConfig::default();
        assert!(HostSettings::new(&config, 0, "Deathmatch").validate().is_err());
        assert!(HostSettings::new(&config, 2, "  ").validate().is_err());
        assert!(HostSettings::new(&config, 2, "Deathmatch").validate().is_ok());
    }

    #[test]
    fn test_join_acceptance() {
        let mut descriptor = HostSettings::new(&CoordinatorConfig::default(), 2, "Duel").to_descriptor();
        assert!(descriptor.accepts_joins());

        descriptor.in_progress = true;
        descriptor.visibility.allow_join_in_progress = false;
        assert!(!descriptor.accepts_joins());

        descriptor.visibility.allow_join_in_progress = true;
        descriptor.occupancy = 2;
        assert!(descriptor.is_full());
        assert!(!descriptor.accepts_joins());
        assert_eq!(descriptor.open_slots(), 0);
    }
}
