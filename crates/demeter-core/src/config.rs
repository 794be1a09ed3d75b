//! Configuration management for the watchdog
//!
//! The configuration document is JSON (`conf.json`, camelCase keys) or TOML
//! when the file name ends in `.toml`. Only `neo4j` and `refreshRate` are
//! required; every other section falls back to defaults.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ConfigError;
use crate::logging::LogConfig;
use crate::watchdog::WatchdogConfig;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "conf.json";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Neo4j connection settings
    pub neo4j: Neo4jConfig,

    /// Delay between two poll cycles, in milliseconds
    #[serde(alias = "refresh_rate")]
    pub refresh_rate: i64,

    /// Watchdog tuning
    #[serde(default)]
    pub watchdog: WatchdogSettings,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            neo4j: Neo4jConfig::default(),
            refresh_rate: 5_000,
            watchdog: WatchdogSettings::default(),
            logging: LogConfig::default(),
        }
    }
}

/// Neo4j connection settings
#[derive(Clone, Serialize, Deserialize)]
pub struct Neo4jConfig {
    /// HTTP endpoint of the server, e.g. `http://localhost:7474`
    pub url: String,

    pub username: String,

    pub password: String,

    /// Require TLS; upgrades an `http://` url to `https://`
    #[serde(default)]
    pub encrypted: bool,

    /// Database receiving the queries
    #[serde(default = "default_database")]
    pub database: String,
}

impl Default for Neo4jConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:7474".to_string(),
            username: "neo4j".to_string(),
            password: String::new(),
            encrypted: false,
            database: default_database(),
        }
    }
}

impl fmt::Debug for Neo4jConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Neo4jConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("encrypted", &self.encrypted)
            .field("database", &self.database)
            .finish()
    }
}

fn default_database() -> String {
    "neo4j".to_string()
}

/// Watchdog tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchdogSettings {
    /// Substring a tag must contain to be picked up
    #[serde(default = "default_tag_prefix", alias = "tag_prefix")]
    pub tag_prefix: String,

    /// Failures tolerated before an application is suppressed
    #[serde(default = "default_failure_threshold", alias = "failure_threshold")]
    pub failure_threshold: u32,

    /// Upper bound for a single database call; unbounded when absent
    #[serde(default, alias = "call_timeout_ms")]
    pub call_timeout_ms: Option<u64>,

    /// Procedure invoked for each tagged application
    #[serde(default = "default_procedure")]
    pub procedure: String,
}

impl Default for WatchdogSettings {
    fn default() -> Self {
        Self {
            tag_prefix: default_tag_prefix(),
            failure_threshold: default_failure_threshold(),
            call_timeout_ms: None,
            procedure: default_procedure(),
        }
    }
}

fn default_tag_prefix() -> String {
    "Dmg_".to_string()
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_procedure() -> String {
    "demeter.groupTags".to_string()
}

/// Output format for log sinks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pretty => write!(f, "pretty"),
            Self::Json => write!(f, "json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected pretty or json")),
        }
    }
}

/// Everything needed to open a session
#[derive(Clone)]
pub struct ConnectionParams {
    /// Resolved endpoint (scheme already upgraded when `encrypted`)
    pub endpoint: Url,
    pub username: String,
    pub password: String,
    pub encrypted: bool,
    pub database: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("endpoint", &self.endpoint.as_str())
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("encrypted", &self.encrypted)
            .field("database", &self.database)
            .finish()
    }
}

/// Document syntax, picked from the file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Toml,
}

impl ConfigFormat {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("toml") => Self::Toml,
            _ => Self::Json,
        }
    }
}

impl Config {
    /// Load and validate configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                ConfigError::FileNotFound(display.clone())
            } else {
                ConfigError::ReadFailed(display.clone(), err.to_string())
            }
        })?;
        Self::parse(&contents, ConfigFormat::from_path(path))
    }

    /// Parse and validate a configuration document
    pub fn parse(contents: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        let config: Self = match format {
            ConfigFormat::Json => serde_json::from_str(contents)
                .map_err(|err| ConfigError::ParseFailed(err.to_string()))?,
            ConfigFormat::Toml => {
                toml::from_str(contents).map_err(|err| ConfigError::ParseFailed(err.to_string()))?
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Check field-level constraints that serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.refresh_rate <= 0 {
            return Err(ConfigError::ValidationError(format!(
                "refreshRate must be a positive number of milliseconds (got {})",
                self.refresh_rate
            )));
        }
        if self.watchdog.tag_prefix.is_empty() {
            return Err(ConfigError::ValidationError(
                "watchdog.tagPrefix must not be empty".to_string(),
            ));
        }
        if self.watchdog.procedure.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "watchdog.procedure must not be empty".to_string(),
            ));
        }
        // Procedure names are spliced into the CALL statement text.
        if !self
            .watchdog
            .procedure
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(ConfigError::ValidationError(format!(
                "watchdog.procedure '{}' may only contain letters, digits, '_' and '.'",
                self.watchdog.procedure
            )));
        }
        if self.watchdog.call_timeout_ms == Some(0) {
            return Err(ConfigError::ValidationError(
                "watchdog.callTimeoutMs must be positive when set".to_string(),
            ));
        }
        if self.neo4j.database.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "neo4j.database must not be empty".to_string(),
            ));
        }
        resolve_endpoint(&self.neo4j.url, self.neo4j.encrypted)?;
        Ok(())
    }

    /// Delay between two poll cycles
    #[must_use]
    pub fn refresh_rate(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.refresh_rate).unwrap_or(1).max(1))
    }

    /// Apply the `--refresh` command-line override.
    ///
    /// The override only takes effect when strictly greater than 1; returns
    /// whether it was applied.
    pub fn apply_refresh_override(&mut self, refresh_ms: i64) -> bool {
        if refresh_ms > 1 {
            self.refresh_rate = refresh_ms;
            true
        } else {
            false
        }
    }

    /// Connection parameters with the endpoint resolved
    pub fn connection_params(&self) -> Result<ConnectionParams, ConfigError> {
        Ok(ConnectionParams {
            endpoint: resolve_endpoint(&self.neo4j.url, self.neo4j.encrypted)?,
            username: self.neo4j.username.clone(),
            password: self.neo4j.password.clone(),
            encrypted: self.neo4j.encrypted,
            database: self.neo4j.database.clone(),
        })
    }

    /// Poll loop settings derived from this configuration
    #[must_use]
    pub fn watchdog_config(&self) -> WatchdogConfig {
        WatchdogConfig {
            refresh_interval: self.refresh_rate(),
            tag_prefix: self.watchdog.tag_prefix.clone(),
            failure_threshold: self.watchdog.failure_threshold,
            call_timeout: self.watchdog.call_timeout_ms.map(Duration::from_millis),
            procedure: self.watchdog.procedure.clone(),
        }
    }
}

fn resolve_endpoint(raw: &str, encrypted: bool) -> Result<Url, ConfigError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::ValidationError(
            "neo4j.url must not be empty".to_string(),
        ));
    }
    let mut url = Url::parse(trimmed)
        .map_err(|err| ConfigError::ValidationError(format!("neo4j.url {trimmed}: {err}")))?;
    match url.scheme() {
        "https" => {}
        "http" => {
            if encrypted && url.set_scheme("https").is_err() {
                return Err(ConfigError::ValidationError(format!(
                    "neo4j.url {trimmed}: cannot switch to https"
                )));
            }
        }
        other => {
            return Err(ConfigError::ValidationError(format!(
                "neo4j.url scheme '{other}' is not supported; use the HTTP endpoint instead: {}",
                http_equivalent(&url, encrypted)
            )));
        }
    }
    Ok(url)
}

/// HTTP endpoint serving the same server as a Bolt url: the Bolt port 7687
/// maps to 7474 (http) or 7473 (https)
fn http_equivalent(url: &Url, encrypted: bool) -> String {
    let secure = encrypted || url.scheme().ends_with("+s") || url.scheme().ends_with("+ssc");
    let (scheme, port) = if secure { ("https", 7473) } else { ("http", 7474) };
    let host = url.host_str().unwrap_or("localhost");
    format!("{scheme}://{host}:{port}")
}
