use gatepass_policy::PolicyConfig;
use gatepass_session::{RetryPolicy, DEFAULT_AUDIT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{RootError, RootResult};

/// Where identities are resolved.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DirectoryMode {
    /// Local SQLite database at `database_path`.
    #[default]
    Local,
    /// Remote gatepass directory server at `directory.url`.
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,

    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub mode: DirectoryMode,

    /// Base URL of the remote directory server. Required in remote mode.
    #[serde(default)]
    pub url: Option<String>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for DirectoryConfig {
    fn default() -> Self {
        Self {
            mode: DirectoryMode::default(),
            url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Redelivery of audit events to the registration sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// Decisions kept in the terminal's in-memory audit log.
    #[serde(default = "default_log_capacity")]
    pub log_capacity: usize,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_log_capacity() -> usize {
    DEFAULT_AUDIT_CAPACITY
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            log_capacity: default_log_capacity(),
        }
    }
}

impl AuditConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff_ms: self.retry_backoff_ms,
        }
    }
}

/// Top-level configuration, loaded from `~/.gatepass/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RootConfig {
    /// SQLite database holding identities and registrations.
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub directory: DirectoryConfig,

    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub audit: AuditConfig,
}

fn default_database_path() -> PathBuf {
    dirs_or_default(".gatepass/gatepass.db")
}

/// Returns `$HOME/<suffix>` if HOME is available, otherwise `./<suffix>`.
fn dirs_or_default(suffix: &str) -> PathBuf {
    std::env::var("HOME")
        .map(|h| PathBuf::from(h).join(suffix))
        .unwrap_or_else(|_| PathBuf::from(suffix))
}

impl Default for RootConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            server: ServerConfig::default(),
            directory: DirectoryConfig::default(),
            policy: PolicyConfig::default(),
            audit: AuditConfig::default(),
        }
    }
}

impl RootConfig {
    /// Load configuration from a TOML file. If the file does not exist,
    /// returns a default configuration.
    pub fn load(path: &Path) -> RootResult<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path).map_err(RootError::Io)?;
        let config: RootConfig = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> RootResult<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| RootError::Config(format!("TOML serialize error: {}", e)))?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(RootError::Io)?;
        }
        std::fs::write(path, contents).map_err(RootError::Io)?;
        Ok(())
    }

    pub fn validate(&self) -> RootResult<()> {
        self.policy.validate()?;
        self.audit
            .retry_policy()
            .validate()
            .map_err(|e| RootError::Config(e.to_string()))?;

        if self.audit.log_capacity == 0 {
            return Err(RootError::Config("audit.log_capacity must be > 0".into()));
        }
        if self.directory.timeout_secs == 0 {
            return Err(RootError::Config("directory.timeout_secs must be > 0".into()));
        }
        if self.directory.mode == DirectoryMode::Remote {
            match self.directory.url.as_deref().map(str::trim) {
                Some(url) if url.starts_with("http://") || url.starts_with("https://") => {}
                Some(url) => {
                    return Err(RootError::Config(format!(
                        "directory.url must be an http(s) URL, got '{}'",
                        url
                    )))
                }
                None => {
                    return Err(RootError::Config(
                        "directory.url is required in remote mode".into(),
                    ))
                }
            }
        }
        Ok(())
    }

    /// Return the path to the default config file location.
    pub fn default_config_path() -> PathBuf {
        dirs_or_default(".gatepass/config.toml")
    }
}
