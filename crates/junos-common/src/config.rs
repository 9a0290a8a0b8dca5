//! Configuration file support for the reconciliation engine.
//!
//! Loads and validates connection, timeout and transaction settings from a
//! TOML file. Default location: /etc/junos-syncd/junos-syncd.toml, overridden
//! by the `JUNOS_SYNCD_CONFIG` environment variable.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{JunosError, JunosResult};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/junos-syncd/junos-syncd.toml";

/// Environment variable overriding [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "JUNOS_SYNCD_CONFIG";

/// Device connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Device hostname or address
    #[serde(default = "default_host")]
    pub host: String,

    /// NETCONF over SSH port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Login user
    #[serde(default = "default_username")]
    pub username: String,

    /// Private key passed to ssh with `-i`
    #[serde(default)]
    pub ssh_key_file: Option<PathBuf>,

    /// ssh client binary
    #[serde(default = "default_ssh_binary")]
    pub ssh_binary: String,

    /// Extra `-o` options for the ssh client
    #[serde(default)]
    pub ssh_options: Vec<String>,

    /// Attempts to establish the session before giving up
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Pause between connection attempts in seconds
    #[serde(default = "default_connect_retry_interval")]
    pub connect_retry_interval_secs: u64,
}

/// Deadlines applied to every transport call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Session establishment deadline in seconds
    #[serde(default = "default_connect_secs")]
    pub connect_secs: u64,

    /// Deadline for lock, load, validate, read and discard calls in seconds
    #[serde(default = "default_command_secs")]
    pub command_secs: u64,

    /// Deadline for the commit call in seconds
    #[serde(default = "default_commit_secs")]
    pub commit_secs: u64,
}

/// Transaction retry and locking policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionConfig {
    /// Retries of the whole batch after a transient transport failure
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base backoff in milliseconds, doubled per attempt
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    /// Seconds to wait for the local lock slot (0 fails fast)
    #[serde(default)]
    pub lock_wait_secs: u64,

    /// Retries of lock acquisition after a lock conflict
    #[serde(default = "default_lock_retries")]
    pub lock_retries: u32,

    /// Log message attached to every commit
    #[serde(default = "default_commit_comment")]
    pub commit_comment: String,
}

/// Desired state source for the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesiredConfig {
    /// TOML file listing the resources to reconcile
    #[serde(default = "default_state_file")]
    pub state_file: PathBuf,
}

/// Complete reconciler configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Device connection configuration
    #[serde(default)]
    pub device: DeviceConfig,

    /// Transport deadlines
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Transaction policy
    #[serde(default)]
    pub transaction: TransactionConfig,

    /// Desired state source
    #[serde(default)]
    pub desired: DesiredConfig,
}

// Default functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    830
}

fn default_username() -> String {
    "netconf".to_string()
}

fn default_ssh_binary() -> String {
    "ssh".to_string()
}

fn default_connect_retries() -> u32 {
    3
}

fn default_connect_retry_interval() -> u64 {
    2
}

fn default_connect_secs() -> u64 {
    30
}

fn default_command_secs() -> u64 {
    60
}

fn default_commit_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_backoff() -> u64 {
    500
}

fn default_lock_retries() -> u32 {
    3
}

fn default_commit_comment() -> String {
    "committed by junos-syncd".to_string()
}

fn default_state_file() -> PathBuf {
    PathBuf::from("/etc/junos-syncd/desired.toml")
}

// Default implementations
impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            username: default_username(),
            ssh_key_file: None,
            ssh_binary: default_ssh_binary(),
            ssh_options: Vec::new(),
            connect_retries: default_connect_retries(),
            connect_retry_interval_secs: default_connect_retry_interval(),
        }
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: default_connect_secs(),
            command_secs: default_command_secs(),
            commit_secs: default_commit_secs(),
        }
    }
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff(),
            lock_wait_secs: 0,
            lock_retries: default_lock_retries(),
            commit_comment: default_commit_comment(),
        }
    }
}

impl Default for DesiredConfig {
    fn default() -> Self {
        Self {
            state_file: default_state_file(),
        }
    }
}

impl ReconcilerConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> JunosResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content).map_err(|e| {
                JunosError::invalid_config(path.display().to_string(), e.to_string())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(JunosError::invalid_config(
                path.display().to_string(),
                format!("Failed to read config file: {}", e),
            )),
        }
    }

    /// Load from `JUNOS_SYNCD_CONFIG`, the default location, or defaults
    pub fn load() -> JunosResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_or_default(path)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Get connect deadline as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.connect_secs)
    }

    /// Get command deadline as Duration
    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.command_secs)
    }

    /// Get commit deadline as Duration
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.commit_secs)
    }

    /// Get pause between connection attempts as Duration
    pub fn connect_retry_interval(&self) -> Duration {
        Duration::from_secs(self.device.connect_retry_interval_secs)
    }

    /// Get base retry backoff as Duration
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.transaction.retry_backoff_ms)
    }

    /// Get the local lock wait as Duration, `None` when failing fast
    pub fn lock_wait(&self) -> Option<Duration> {
        match self.transaction.lock_wait_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> JunosResult<()> {
        if self.device.host.trim().is_empty() {
            return Err(JunosError::invalid_config("device.host", "must not be empty"));
        }

        if self.device.port == 0 {
            return Err(JunosError::invalid_config("device.port", "must be > 0"));
        }

        if self.device.username.trim().is_empty() {
            return Err(JunosError::invalid_config("device.username", "must not be empty"));
        }

        if self.device.connect_retries == 0 {
            return Err(JunosError::invalid_config(
                "device.connect_retries",
                "must be at least 1",
            ));
        }

        if self.timeouts.connect_secs == 0
            || self.timeouts.command_secs == 0
            || self.timeouts.commit_secs == 0
        {
            return Err(JunosError::invalid_config("timeouts", "deadlines must be > 0"));
        }

        if self.timeouts.commit_secs < self.timeouts.command_secs {
            return Err(JunosError::invalid_config(
                "timeouts.commit_secs",
                "must not be shorter than command_secs",
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.device.host, "127.0.0.1");
        assert_eq!(config.device.port, 830);
        assert_eq!(config.device.ssh_binary, "ssh");
        assert_eq!(config.transaction.max_retries, 2);
        assert_eq!(config.transaction.lock_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_duration_accessors() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.connect_timeout(), Duration::from_secs(30));
        assert_eq!(config.command_timeout(), Duration::from_secs(60));
        assert_eq!(config.commit_timeout(), Duration::from_secs(300));
        assert_eq!(config.retry_backoff(), Duration::from_millis(500));
        assert_eq!(config.lock_wait(), None);
    }

    #[test]
    fn test_toml_deserialization() {
        let toml_str = r#"
[device]
host = "vsrx1.lab"
username = "automation"
ssh_key_file = "/etc/junos-syncd/id_ed25519"

[timeouts]
commit_secs = 600

[transaction]
lock_wait_secs = 15
commit_comment = "nightly sync"
"#;
        let config = ReconcilerConfig::parse(toml_str).unwrap();
        assert_eq!(config.device.host, "vsrx1.lab");
        assert_eq!(config.device.username, "automation");
        assert_eq!(
            config.device.ssh_key_file,
            Some(PathBuf::from("/etc/junos-syncd/id_ed25519"))
        );
        assert_eq!(config.commit_timeout(), Duration::from_secs(600));
        assert_eq!(config.lock_wait(), Some(Duration::from_secs(15)));
        assert_eq!(config.transaction.commit_comment, "nightly sync");
        // Unspecified values should use defaults
        assert_eq!(config.device.port, 830);
        assert_eq!(config.timeouts.command_secs, 60);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = ReconcilerConfig::default();
        config.device.port = 0;
        assert!(config.validate().is_err());

        let mut config = ReconcilerConfig::default();
        config.timeouts.commit_secs = 10;
        assert!(config.validate().is_err());

        let mut config = ReconcilerConfig::default();
        config.device.host = " ".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_nonexistent_file_defaults() {
        let config = ReconcilerConfig::load_or_default("/nonexistent/junos-syncd.toml").unwrap();
        assert_eq!(config.device.host, "127.0.0.1");
    }
}
