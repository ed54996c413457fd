//! Coordinator Configuration
//!
//! TOML-backed settings for hosting, searching, timeouts and join retries.

use log::debug;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Network scope for hosting and searching
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Locality {
    /// Local network only
    Lan,
    /// Wide-area (online service)
    Online,
}

impl Default for Locality {
    fn default() -> Self {
        Self::Online
    }
}

impl std::fmt::Display for Locality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Lan => write!(f, "lan"),
            Self::Online => write!(f, "online"),
        }
    }
}

/// Hosting defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionSection {
    /// Advertised session name
    pub name: String,
    /// Owning user shown to searchers
    pub owner: String,
    /// Endpoint other players connect to
    pub host_endpoint: String,
    /// Value of the `MatchType` attribute
    pub match_type: String,
    pub max_public_connections: u32,
    pub locality: Locality,
    pub should_advertise: bool,
    pub allow_join_in_progress: bool,
    pub uses_presence: bool,
    pub allow_join_via_presence: bool,
    pub build_id: u32,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            name: "GameSession".to_string(),
            owner: "local-player".to_string(),
            host_endpoint: "127.0.0.1:7777".to_string(),
            match_type: "FreeForAll".to_string(),
            max_public_connections: 4,
            locality: Locality::Online,
            should_advertise: true,
            allow_join_in_progress: true,
            uses_presence: true,
            allow_join_via_presence: true,
            build_id: 1,
        }
    }
}

/// Search defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub max_search_results: u32,
    pub locality: Locality,
    /// Only return presence-enabled sessions
    pub presence_only: bool,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            max_search_results: 10_000,
            locality: Locality::Online,
            presence_only: true,
        }
    }
}

/// Default per-operation timeouts in milliseconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutSection {
    pub create_ms: u64,
    pub find_ms: u64,
    pub join_ms: u64,
    pub start_ms: u64,
    pub destroy_ms: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            create_ms: 10_000,
            find_ms: 15_000,
            join_ms: 20_000,
            start_ms: 5_000,
            destroy_ms: 10_000,
        }
    }
}

/// Join handshake retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JoinSection {
    /// Handshake attempts against one host before falling back
    pub attempts: u32,
    pub retry_backoff_ms: u64,
    /// Look the session up again when the host stops answering
    pub follow_host_migration: bool,
}

impl Default for JoinSection {
    fn default() -> Self {
        Self {
            attempts: 3,
            retry_backoff_ms: 250,
            follow_host_migration: true,
        }
    }
}

/// Complete coordinator configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub session: SessionSection,
    pub search: SearchSection,
    pub timeouts: TimeoutSection,
    pub join: JoinSection,
}

impl CoordinatorConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: CoordinatorConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("Loading coordinator config from {:?}", path);
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session.max_public_connections == 0 {
            return Err(ConfigError::Invalid(
                "session.max_public_connections must be positive".to_string(),
            ));
        }
        if self.session.match_type.trim().is_empty() {
            return Err(ConfigError::Invalid("session.match_type must not be empty".to_string()));
        }
        if self.session.name.trim().is_empty() {
            return Err(ConfigError::Invalid("session.name must not be empty".to_string()));
        }
        if self.search.max_search_results == 0 {
            return Err(ConfigError::Invalid(
                "search.max_search_results must be positive".to_string(),
            ));
        }
        if self.join.attempts == 0 {
            return Err(ConfigError::Invalid("join.attempts must be positive".to_string()));
        }
        let t = &self.timeouts;
        if [t.create_ms, t.find_ms, t.join_ms, t.start_ms, t.destroy_ms].contains(&0) {
            return Err(ConfigError::Invalid("timeouts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.create_ms)
    }

    pub fn find_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.find_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.join_ms)
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.start_ms)
    }

    pub fn destroy_timeout(&self) -> Duration {
        Duration::from_millis(self.timeouts.destroy_ms)
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.join.retry_backoff_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = CoordinatorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.session.locality, Locality::Online);
        assert_eq!(config.join_timeout(), Duration::from_secs(20));
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CoordinatorConfig::from_toml_str(
            r#"
            [session]
            match_type = "Deathmatch"
            max_public_connections = 8
            locality = "lan"

            [timeouts]
            find_ms = 500
            "#,
        )
        .unwrap();

        assert_eq!(config.session.match_type, "Deathmatch");
        assert_eq!(config.session.max_public_connections, 8);
        assert_eq!(config.session.locality, Locality::Lan);
        assert_eq!(config.find_timeout(), Duration::from_millis(500));
        assert_eq!(config.timeouts.create_ms, 10_000);
        assert_eq!(config.join.attempts, 3);
    }

    #[test]
    fn test_rejects_zero_capacity() {
        let result = CoordinatorConfig::from_toml_str("[session]\nmax_public_connections = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_search_results() {
        let result = CoordinatorConfig::from_toml_str("[search]\nmax_search_results = 0\n");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[search]\nmax_search_results = 25\npresence_only = false").unwrap();

        let config = CoordinatorConfig::load(file.path()).unwrap();
        assert_eq!(config.search.max_search_results, 25);
        assert!(!config.search.presence_only);
    }

    #[test]
    fn test_load_missing_file() {
        let result = CoordinatorConfig::load("/nonexistent/matchmaking.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
