//! Configuration management.
//!
//! Configuration is layered: an optional TOML file, then environment
//! variables with the `OFFERTORY__` prefix (double underscore as the
//! section separator, e.g. `OFFERTORY__DATABASE__URL`).

use serde::Deserialize;
use std::time::Duration;

use crate::supervision::Dependency;

/// Main application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Third-party integration configuration
    #[serde(default)]
    pub integrations: IntegrationsConfig,

    /// Health supervision configuration
    #[serde(default)]
    pub supervision: SupervisionConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

/// How the persistent store is deployed. Must agree with the shape of the
/// connection string: `managed` deployments connect over TLS and require
/// `sslmode=require` in the URL; `local` deployments carry no such marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseMode {
    Local,
    Managed,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,

    /// Deployment mode, validated against the URL shape at startup
    #[serde(default = "default_database_mode")]
    pub mode: DatabaseMode,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

/// Configuration for one third-party integration.
#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationConfig {
    /// Whether the integration is administratively enabled. A disabled
    /// integration is an intentional choice, not a failure.
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// API credential for the integration
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL of the integration's API
    pub base_url: String,
}

impl IntegrationConfig {
    /// True when the integration is enabled but carries no credential.
    pub fn is_unconfigured(&self) -> bool {
        self.enabled && self.api_key.as_deref().map_or(true, str::is_empty)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntegrationsConfig {
    /// Speech-to-text provider used for donation call recordings
    #[serde(default = "default_transcription")]
    pub transcription: IntegrationConfig,

    /// LLM provider used for acknowledgment draft generation
    #[serde(default = "default_drafts")]
    pub drafts: IntegrationConfig,

    /// Payment/QR provider
    #[serde(default = "default_payments")]
    pub payments: IntegrationConfig,
}

impl Default for IntegrationsConfig {
    fn default() -> Self {
        Self {
            transcription: default_transcription(),
            drafts: default_drafts(),
            payments: default_payments(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SupervisionConfig {
    /// Interval between periodic orchestrator cycles
    #[serde(with = "humantime_serde", default = "default_check_interval")]
    pub check_interval: Duration,

    /// Timeout for a single HTTP integration probe
    #[serde(with = "humantime_serde", default = "default_probe_timeout")]
    pub probe_timeout: Duration,

    /// Timeout for the database probe
    #[serde(with = "humantime_serde", default = "default_database_probe_timeout")]
    pub database_probe_timeout: Duration,

    /// Path of the file-backed incident store fallback
    #[serde(default = "default_incident_file")]
    pub incident_file: String,

    /// Startup gate configuration
    #[serde(default)]
    pub startup: StartupConfig,

    /// Watchdog configuration
    #[serde(default)]
    pub watchdog: WatchdogConfig,

    /// Recovery configuration
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

impl Default for SupervisionConfig {
    fn default() -> Self {
        Self {
            check_interval: default_check_interval(),
            probe_timeout: default_probe_timeout(),
            database_probe_timeout: default_database_probe_timeout(),
            incident_file: default_incident_file(),
            startup: StartupConfig::default(),
            watchdog: WatchdogConfig::default(),
            recovery: RecoveryConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
    /// Connection attempts before the gate fails
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Fixed delay between connection attempts
    #[serde(with = "humantime_serde", default = "default_connect_retry_delay")]
    pub connect_retry_delay: Duration,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            connect_attempts: default_connect_attempts(),
            connect_retry_delay: default_connect_retry_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchdogConfig {
    /// Interval between store pings
    #[serde(with = "humantime_serde", default = "default_watchdog_interval")]
    pub interval: Duration,

    /// Consecutive ping failures before the watchdog degrades
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,

    /// Reconnect attempts before the watchdog gives up
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,

    /// Fixed delay after a failed reconnect attempt
    #[serde(with = "humantime_serde", default = "default_reconnect_delay")]
    pub reconnect_delay: Duration,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            interval: default_watchdog_interval(),
            failure_threshold: default_failure_threshold(),
            reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay: default_reconnect_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RecoveryConfig {
    /// Whether automatic recovery is enabled
    #[serde(default = "default_recovery_enabled")]
    pub enabled: bool,

    /// Cooldown between automatic recovery attempts
    #[serde(with = "humantime_serde", default = "default_recovery_cooldown")]
    pub cooldown: Duration,

    /// How many recovery attempts to retain in memory
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,

    /// Dependencies whose failure triggers automatic recovery
    #[serde(default = "default_critical_dependencies")]
    pub critical_dependencies: Vec<Dependency>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            enabled: default_recovery_enabled(),
            cooldown: default_recovery_cooldown(),
            history_cap: default_history_cap(),
            critical_dependencies: default_critical_dependencies(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (json, pretty, compact)
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format for production
    #[default]
    Json,
    /// Pretty format for development
    Pretty,
    /// Compact single-line format
    Compact,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_database_mode() -> DatabaseMode { DatabaseMode::Local }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 5 }
fn default_enabled() -> bool { true }
fn default_check_interval() -> Duration { Duration::from_secs(60) }
fn default_probe_timeout() -> Duration { Duration::from_secs(10) }
fn default_database_probe_timeout() -> Duration { Duration::from_secs(5) }
fn default_incident_file() -> String { "incidents.json".to_string() }
fn default_connect_attempts() -> u32 { 3 }
fn default_connect_retry_delay() -> Duration { Duration::from_secs(2) }
fn default_watchdog_interval() -> Duration { Duration::from_secs(30) }
fn default_failure_threshold() -> u32 { 3 }
fn default_reconnect_attempts() -> u32 { 5 }
fn default_reconnect_delay() -> Duration { Duration::from_secs(5) }
fn default_recovery_enabled() -> bool { true }
fn default_recovery_cooldown() -> Duration { Duration::from_secs(300) }
fn default_history_cap() -> usize { 50 }
fn default_critical_dependencies() -> Vec<Dependency> { vec![Dependency::Database] }
fn default_log_level() -> String { "info".to_string() }

fn default_transcription() -> IntegrationConfig {
    IntegrationConfig {
        enabled: true,
        api_key: None,
        base_url: "https://api.transcribe.example.com".to_string(),
    }
}

fn default_drafts() -> IntegrationConfig {
    IntegrationConfig {
        enabled: true,
        api_key: None,
        base_url: "https://api.openai.com".to_string(),
    }
}

fn default_payments() -> IntegrationConfig {
    IntegrationConfig {
        enabled: true,
        api_key: None,
        base_url: "https://api.stripe.com".to_string(),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::Environment::with_prefix("OFFERTORY").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }

    /// Load from a specific file path, with environment overrides.
    pub fn from_file(path: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("OFFERTORY").separator("__"))
            .build()?;

        let cfg: Config = config.try_deserialize()?;
        Ok(cfg)
    }
}

impl DatabaseConfig {
    /// Validate presence and internal consistency of the database
    /// configuration. Used by the startup gate's first step.
    pub fn validate_consistency(&self) -> Result<(), String> {
        if self.url.trim().is_empty() {
            return Err("database.url is empty; set OFFERTORY__DATABASE__URL".to_string());
        }
        if self.min_connections > self.max_connections {
            return Err(format!(
                "database.min_connections ({}) exceeds max_connections ({})",
                self.min_connections, self.max_connections
            ));
        }
        let has_ssl_marker = self.url.contains("sslmode=require");
        match self.mode {
            DatabaseMode::Managed if !has_ssl_marker => Err(
                "database.mode is 'managed' but the URL carries no sslmode=require parameter"
                    .to_string(),
            ),
            DatabaseMode::Local if has_ssl_marker => Err(
                "database.mode is 'local' but the URL requires TLS; set mode to 'managed'"
                    .to_string(),
            ),
            _ => Ok(()),
        }
    }

    /// Validate the connection string's syntax. Used by the startup gate's
    /// second step.
    pub fn validate_url_syntax(&self) -> Result<(), String> {
        let url = self.url.trim();
        let rest = url
            .strip_prefix("postgres://")
            .or_else(|| url.strip_prefix("postgresql://"))
            .ok_or_else(|| {
                "connection string must start with postgres:// or postgresql://".to_string()
            })?;

        let authority = rest.split('?').next().unwrap_or(rest);
        let host_part = authority.rsplit('@').next().unwrap_or(authority);
        let (host_and_port, db_name) = match host_part.split_once('/') {
            Some((hp, db)) => (hp, db),
            None => return Err("connection string is missing a database name".to_string()),
        };
        if host_and_port.split(':').next().unwrap_or("").is_empty() {
            return Err("connection string is missing a host".to_string());
        }
        if db_name.is_empty() {
            return Err("connection string is missing a database name".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_config(url: &str, mode: DatabaseMode) -> DatabaseConfig {
        DatabaseConfig {
            url: url.to_string(),
            mode,
            max_connections: 20,
            min_connections: 5,
        }
    }

    #[test]
    fn test_defaults() {
        let sup = SupervisionConfig::default();
        assert_eq!(sup.check_interval, Duration::from_secs(60));
        assert_eq!(sup.watchdog.failure_threshold, 3);
        assert_eq!(sup.watchdog.reconnect_attempts, 5);
        assert_eq!(sup.recovery.cooldown, Duration::from_secs(300));
        assert_eq!(sup.recovery.critical_dependencies, vec![Dependency::Database]);
    }

    #[test]
    fn test_consistency_local_mode() {
        let cfg = db_config("postgres://app@localhost:5432/offertory", DatabaseMode::Local);
        assert!(cfg.validate_consistency().is_ok());
    }

    #[test]
    fn test_consistency_managed_requires_ssl() {
        let cfg = db_config("postgres://app@db.example.com/offertory", DatabaseMode::Managed);
        let err = cfg.validate_consistency().unwrap_err();
        assert!(err.contains("sslmode=require"));

        let cfg = db_config(
            "postgres://app@db.example.com/offertory?sslmode=require",
            DatabaseMode::Managed,
        );
        assert!(cfg.validate_consistency().is_ok());
    }

    #[test]
    fn test_consistency_local_rejects_ssl_marker() {
        let cfg = db_config(
            "postgres://app@localhost/offertory?sslmode=require",
            DatabaseMode::Local,
        );
        assert!(cfg.validate_consistency().is_err());
    }

    #[test]
    fn test_consistency_empty_url() {
        let cfg = db_config("", DatabaseMode::Local);
        assert!(cfg.validate_consistency().unwrap_err().contains("empty"));
    }

    #[test]
    fn test_consistency_pool_bounds() {
        let mut cfg = db_config("postgres://app@localhost/offertory", DatabaseMode::Local);
        cfg.min_connections = 50;
        assert!(cfg.validate_consistency().is_err());
    }

    #[test]
    fn test_url_syntax_valid() {
        let cfg = db_config(
            "postgres://app:pw@localhost:5432/offertory",
            DatabaseMode::Local,
        );
        assert!(cfg.validate_url_syntax().is_ok());
    }

    #[test]
    fn test_url_syntax_bad_scheme() {
        let cfg = db_config("mysql://app@localhost/offertory", DatabaseMode::Local);
        let err = cfg.validate_url_syntax().unwrap_err();
        assert!(err.contains("postgres://"));
    }

    #[test]
    fn test_url_syntax_missing_database() {
        let cfg = db_config("postgres://app@localhost:5432", DatabaseMode::Local);
        assert!(cfg.validate_url_syntax().is_err());

        let cfg = db_config("postgres://app@localhost:5432/", DatabaseMode::Local);
        assert!(cfg.validate_url_syntax().is_err());
    }

    #[test]
    fn test_unconfigured_integration() {
        let cfg = IntegrationConfig {
            enabled: true,
            api_key: None,
            base_url: "https://api.example.com".to_string(),
        };
        assert!(cfg.is_unconfigured());

        let cfg = IntegrationConfig {
            enabled: false,
            api_key: None,
            base_url: "https://api.example.com".to_string(),
        };
        assert!(!cfg.is_unconfigured());

        let cfg = IntegrationConfig {
            enabled: true,
            api_key: Some("sk_test_123".to_string()),
            base_url: "https://api.example.com".to_string(),
        };
        assert!(!cfg.is_unconfigured());
    }
}
