//! Runtime configuration.
//!
//! Configuration is loaded from the following sources, later ones winning:
//!
//! 1. Default values
//! 2. System config file (`/etc/cellbox/config.toml`)
//! 3. An explicitly given config file
//! 4. Environment variables (`CELLBOX_*`, sections separated by `__`)
//!
//! ## Example Configuration File
//!
//! ```toml
//! [port_pool]
//! start = 61001
//! size = 4000
//! groups = 4
//! state_file = "/var/lib/cellbox/port_pool.json"
//!
//! [policy]
//! host = "10.0.0.5"
//! port = 8000
//!
//! [scripts]
//! legacy_signal_timeout_ms = 10000
//!
//! [logging]
//! level = "info"
//! format = "json"
//! ```
//!
//! `CELLBOX_PORT_POOL__GROUPS=2` overrides `port_pool.groups`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use cellbox_portpool::{PoolState, PortPool, load_state, save_state};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::Result;
use crate::policy::{HttpSpacePolicy, NoopSpacePolicy, SpacePolicy};

/// System-wide config file.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/cellbox/config.toml";

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "CELLBOX_";

/// Container runtime configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Host port pool.
    pub port_pool: PortPoolConfig,
    /// Space policy service.
    pub policy: PolicyConfig,
    /// Helper script settings.
    pub scripts: ScriptsConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

impl RuntimeConfig {
    /// Loads configuration from the system file and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    pub fn load() -> std::result::Result<Self, figment::Error> {
        Self::figment(None).extract()
    }

    /// Loads configuration with `path` layered over the system file.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed.
    pub fn load_from(path: impl AsRef<Path>) -> std::result::Result<Self, figment::Error> {
        Self::figment(Some(path.as_ref())).extract()
    }

    fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(SYSTEM_CONFIG_PATH));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}

/// Port pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortPoolConfig {
    /// First port of the pool.
    pub start: u32,
    /// Number of ports in the pool.
    pub size: u32,
    /// Number of groups the pool is split into.
    pub groups: u32,
    /// Where the rotation state is persisted. Unset disables persistence.
    pub state_file: Option<PathBuf>,
}

impl Default for PortPoolConfig {
    fn default() -> Self {
        Self {
            start: 61001,
            size: 4000,
            groups: 1,
            state_file: None,
        }
    }
}

impl PortPoolConfig {
    /// Builds the pool, resuming from the state file if one exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the state file exists but cannot be read, or the
    /// pool shape is invalid.
    pub fn build_pool(&self) -> cellbox_portpool::Result<PortPool> {
        let state = match &self.state_file {
            None => PoolState::default(),
            Some(path) => match load_state(path) {
                Ok(state) => state,
                Err(e) if e.is_state_missing() => {
                    debug!(path = %path.display(), "no port pool state, starting fresh");
                    PoolState::default()
                }
                Err(e) => return Err(e),
            },
        };
        PortPool::new(self.start, self.size, self.groups, &state)
    }

    /// Writes the pool's current rotation state to the state file.
    ///
    /// Does nothing if no state file is configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn persist(&self, pool: &PortPool) -> cellbox_portpool::Result<()> {
        match &self.state_file {
            Some(path) => save_state(path, &pool.refresh_state()),
            None => Ok(()),
        }
    }
}

/// Space policy service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Service host. Unset disables policy calls.
    pub host: Option<String>,
    pub port: u16,
    pub path: String,
    /// Per-request timeout in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: 8000,
            path: "/spacegroup".to_string(),
            request_timeout_ms: 2000,
        }
    }
}

impl PolicyConfig {
    /// Builds the policy client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn build(&self) -> Result<Arc<dyn SpacePolicy>> {
        match &self.host {
            Some(host) if !host.is_empty() => {
                let policy = HttpSpacePolicy::new(
                    host,
                    self.port,
                    &self.path,
                    Duration::from_millis(self.request_timeout_ms),
                )?;
                debug!(url = policy.url(), "policy service configured");
                Ok(Arc::new(policy))
            }
            _ => Ok(Arc::new(NoopSpacePolicy)),
        }
    }
}

/// Helper script settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptsConfig {
    /// Bound on signal delivery to processes of unversioned containers.
    pub legacy_signal_timeout_ms: u64,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        Self {
            legacy_signal_timeout_ms: 10_000,
        }
    }
}

impl ScriptsConfig {
    #[must_use]
    pub const fn legacy_signal_timeout(&self) -> Duration {
        Duration::from_millis(self.legacy_signal_timeout_ms)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Text,
        }
    }
}

impl LoggingConfig {
    /// Installs the global tracing subscriber.
    ///
    /// `RUST_LOG` takes precedence over the configured level. Returns false
    /// if a subscriber was already installed.
    pub fn init(&self) -> bool {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));
        let registry = tracing_subscriber::registry().with(filter);

        let result = match self.format {
            LogFormat::Text => registry
                .with(tracing_subscriber::fmt::layer().with_target(false))
                .try_init(),
            LogFormat::Json => registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init(),
        };
        result.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.port_pool.start, 61001);
        assert_eq!(config.port_pool.size, 4000);
        assert_eq!(config.port_pool.groups, 1);
        assert_eq!(config.policy.port, 8000);
        assert_eq!(config.policy.path, "/spacegroup");
        assert!(config.policy.host.is_none());
        assert_eq!(
            config.scripts.legacy_signal_timeout(),
            Duration::from_secs(10)
        );
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
[port_pool]
start = 1000
size = 100
groups = 2

[policy]
host = "10.0.0.5"

[logging]
format = "json"
"#,
        )
        .unwrap();

        let config = RuntimeConfig::load_from(&path).unwrap();
        assert_eq!(config.port_pool.start, 1000);
        assert_eq!(config.port_pool.groups, 2);
        assert_eq!(config.port_pool.state_file, None);
        assert_eq!(config.policy.host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.policy.port, 8000);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_build_pool_without_state_file() {
        let dir = tempfile::tempdir().unwrap();
        let config = PortPoolConfig {
            start: 1000,
            size: 100,
            groups: 2,
            state_file: Some(dir.path().join("absent.json")),
        };

        let pool = config.build_pool().unwrap();
        assert_eq!(pool.acquire(1).unwrap(), 1050);
    }

    #[test]
    fn test_persist_and_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let config = PortPoolConfig {
            start: 1000,
            size: 100,
            groups: 2,
            state_file: Some(dir.path().join("port_pool.json")),
        };

        let pool = config.build_pool().unwrap();
        pool.acquire(0).unwrap();
        pool.acquire(0).unwrap();
        config.persist(&pool).unwrap();

        let rebuilt = config.build_pool().unwrap();
        assert_eq!(rebuilt.acquire(0).unwrap(), 1002);
    }

    #[test]
    fn test_build_pool_rejects_bad_shape() {
        let config = PortPoolConfig {
            start: 1000,
            size: 100,
            groups: 3,
            state_file: None,
        };
        assert!(config.build_pool().is_err());
    }

    #[test]
    fn test_policy_disabled_without_host() {
        assert!(PolicyConfig::default().build().is_ok());
        let empty = PolicyConfig {
            host: Some(String::new()),
            ..PolicyConfig::default()
        };
        assert!(empty.build().is_ok());
    }

    #[test]
    fn test_logging_init_twice() {
        let logging = LoggingConfig::default();
        logging.init();
        assert!(!logging.init());
    }
}
