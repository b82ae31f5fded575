//! Configuration management for librariand.
//!
//! Loads settings from /etc/librarian/config.toml (or an explicit path),
//! then applies environment overrides. Every key is optional.

use anyhow::{bail, Context, Result};
use librarian_shared::DEFAULT_PORT;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::session::Limits;

/// Config file path
pub const CONFIG_PATH: &str = "/etc/librarian/config.toml";

/// Environment variable naming an alternative config file
pub const CONFIG_ENV: &str = "LIBRARIAN_CONFIG";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub bind_address: String,
    pub port: u16,
    /// Fallback when the Requester sends no loop budget
    pub max_loops: i32,
    /// Fallback when the Requester sends no evidence cap
    pub max_results: i32,
    /// Per-session deadline, enforced by the transport
    pub timeout_ms: u64,
    /// Worker pool size: concurrent Think sessions
    pub max_sessions: usize,
    /// Longest accepted inbound frame
    pub max_frame_bytes: usize,
    pub shutdown_grace_ms: u64,
    pub log_level: String,
    /// HTTP status endpoint address; disabled when absent
    pub status_bind: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_loops: 3,
            max_results: 10,
            timeout_ms: 30_000,
            max_sessions: 10,
            max_frame_bytes: 64 * 1024 * 1024, // large search result sets
            shutdown_grace_ms: 5_000,
            log_level: "info".to_string(),
            status_bind: None,
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    bind_address: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    max_loops: Option<i32>,
    #[serde(default)]
    max_results: Option<i32>,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    max_sessions: Option<usize>,
    #[serde(default)]
    max_frame_bytes: Option<usize>,
    #[serde(default)]
    shutdown_grace_ms: Option<u64>,
    #[serde(default)]
    log_level: Option<String>,
    #[serde(default)]
    status_bind: Option<String>,
}

impl From<RawConfig> for Config {
    fn from(raw: RawConfig) -> Self {
        let defaults = Config::default();
        Self {
            bind_address: raw.bind_address.unwrap_or(defaults.bind_address),
            port: raw.port.unwrap_or(defaults.port),
            max_loops: raw.max_loops.unwrap_or(defaults.max_loops),
            max_results: raw.max_results.unwrap_or(defaults.max_results),
            timeout_ms: raw.timeout_ms.unwrap_or(defaults.timeout_ms),
            max_sessions: raw.max_sessions.unwrap_or(defaults.max_sessions),
            max_frame_bytes: raw.max_frame_bytes.unwrap_or(defaults.max_frame_bytes),
            shutdown_grace_ms: raw.shutdown_grace_ms.unwrap_or(defaults.shutdown_grace_ms),
            log_level: raw.log_level.unwrap_or(defaults.log_level),
            status_bind: raw.status_bind.or(defaults.status_bind),
        }
    }
}

/// Where the loaded configuration came from. Reported by the caller once
/// logging is up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file at the discovered path
    Defaults(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::File(path) => write!(f, "{}", path.display()),
            ConfigSource::Defaults(path) => write!(f, "defaults (no file at {})", path.display()),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Path priority:
    /// 1. Explicit `--config` flag
    /// 2. $LIBRARIAN_CONFIG
    /// 3. /etc/librarian/config.toml
    ///
    /// A missing file yields defaults; environment overrides apply either way.
    /// Runs before the subscriber is installed, so nothing is logged here.
    pub fn load(explicit_path: Option<&Path>) -> Result<(Self, ConfigSource)> {
        let path = Self::discover_path(explicit_path);

        let (mut config, source) = if path.exists() {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let config = Self::from_toml_str(&content)
                .with_context(|| format!("Invalid config {}", path.display()))?;
            (config, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Defaults(path))
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok((config, source))
    }

    fn discover_path(explicit_path: Option<&Path>) -> PathBuf {
        if let Some(path) = explicit_path {
            return path.to_path_buf();
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return PathBuf::from(path);
        }
        PathBuf::from(CONFIG_PATH)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(content).context("Failed to parse TOML")?;
        Ok(raw.into())
    }

    /// Apply the service's environment variables on top of the file values.
    /// `lookup` is injectable so tests do not touch the process environment.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("LIBRARIAN_PORT") {
            self.port = parse_env("LIBRARIAN_PORT", &v)?;
        }
        if let Some(v) = lookup("LIBRARIAN_MAX_LOOPS") {
            self.max_loops = parse_env("LIBRARIAN_MAX_LOOPS", &v)?;
        }
        if let Some(v) = lookup("LIBRARIAN_MAX_RESULTS") {
            self.max_results = parse_env("LIBRARIAN_MAX_RESULTS", &v)?;
        }
        if let Some(v) = lookup("LIBRARIAN_TIMEOUT_MS") {
            self.timeout_ms = parse_env("LIBRARIAN_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("LIBRARIAN_MAX_SESSIONS") {
            self.max_sessions = parse_env("LIBRARIAN_MAX_SESSIONS", &v)?;
        }
        if let Some(v) = lookup("LIBRARIAN_STATUS_BIND") {
            self.status_bind = if v.trim().is_empty() { None } else { Some(v) };
        }
        if let Some(v) = lookup("LOG_LEVEL") {
            self.log_level = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_loops <= 0 {
            bail!("max_loops must be positive (got {})", self.max_loops);
        }
        if self.max_results <= 0 {
            bail!("max_results must be positive (got {})", self.max_results);
        }
        if self.timeout_ms == 0 {
            bail!("timeout_ms must be positive");
        }
        if self.max_sessions == 0 {
            bail!("max_sessions must be positive");
        }
        if self.max_frame_bytes == 0 {
            bail!("max_frame_bytes must be positive");
        }
        Ok(())
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }

    /// Service-wide defaults handed to every session.
    pub fn limits(&self) -> Limits {
        Limits {
            max_loops: self.max_loops,
            max_results: self.max_results,
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn parse_env<T>(key: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| anyhow::anyhow!("Invalid value for {}: {:?} ({})", key, value, e))
}
