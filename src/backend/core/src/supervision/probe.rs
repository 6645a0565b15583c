//! Dependency probes.
//!
//! A probe performs exactly one bounded functional check against one
//! external dependency and reports a [`HealthCheckResult`]. Probes never
//! return errors to their caller: every failure mode, timeouts included,
//! is converted into data so the orchestrator's aggregation never needs
//! exception handling for expected failures.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::config::IntegrationConfig;
use crate::db::Database;
use crate::error::{ErrorCode, Result};

// ═══════════════════════════════════════════════════════════════════════════════
// Dependency
// ═══════════════════════════════════════════════════════════════════════════════

/// The closed set of external dependencies the platform relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dependency {
    /// PostgreSQL persistent store
    Database,
    /// Speech-to-text provider for donation call recordings
    Transcription,
    /// LLM provider for acknowledgment draft generation
    Drafts,
    /// Payment/QR provider
    Payments,
}

impl Dependency {
    /// All dependencies, in probe order.
    pub const ALL: [Dependency; 4] = [
        Dependency::Database,
        Dependency::Transcription,
        Dependency::Drafts,
        Dependency::Payments,
    ];

    /// Stable name used as incident key and API field.
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Database => "database",
            Self::Transcription => "transcription",
            Self::Drafts => "drafts",
            Self::Payments => "payments",
        }
    }

    /// Whether this is a third-party SaaS integration (as opposed to the
    /// persistent store).
    pub const fn is_integration(&self) -> bool {
        !matches!(self, Self::Database)
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dependency {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "database" => Ok(Self::Database),
            "transcription" => Ok(Self::Transcription),
            "drafts" => Ok(Self::Drafts),
            "payments" => Ok(Self::Payments),
            other => Err(format!("unknown dependency: {}", other)),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Error Category
// ═══════════════════════════════════════════════════════════════════════════════

/// Fixed taxonomy of probe failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The dependency is enabled but carries no credential
    NotConfigured,
    /// The dependency rejected our credential
    AuthenticationFailed,
    /// The dependency throttled us
    RateLimited,
    /// No response within the probe's timeout
    Timeout,
    /// Transport-level failure (DNS, refused connection, reset)
    NetworkError,
    /// The dependency answered with a server-side error
    ServerError,
    /// Anything that fits no other category
    Unknown,
}

impl ErrorCategory {
    /// Stable summary string. Incidents deduplicate on
    /// (dependency, summary), so this must not embed volatile detail.
    pub const fn summary(&self) -> &'static str {
        match self {
            Self::NotConfigured => "integration not configured",
            Self::AuthenticationFailed => "authentication failed",
            Self::RateLimited => "rate limited",
            Self::Timeout => "check timed out",
            Self::NetworkError => "network error",
            Self::ServerError => "server error",
            Self::Unknown => "unhealthy",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.summary())
    }
}

/// Operator-facing remediation hint for a failed probe.
pub fn remediation_hint(dependency: Dependency, category: ErrorCategory) -> String {
    match category {
        ErrorCategory::NotConfigured => format!(
            "Set integrations.{}.api_key (OFFERTORY__INTEGRATIONS__{}__API_KEY) or disable the integration",
            dependency,
            dependency.as_str().to_uppercase()
        ),
        ErrorCategory::AuthenticationFailed => format!(
            "Rotate the credential in integrations.{}.api_key; the provider rejected the current one",
            dependency
        ),
        ErrorCategory::RateLimited => format!(
            "Reduce request volume to {} or raise the account's rate limit",
            dependency
        ),
        ErrorCategory::Timeout | ErrorCategory::NetworkError => match dependency {
            Dependency::Database => {
                "Check that PostgreSQL is running and reachable from this host".to_string()
            }
            _ => format!(
                "Check network egress and the {} provider's status page",
                dependency
            ),
        },
        ErrorCategory::ServerError => format!(
            "The {} provider is failing server-side; check its status page before acting locally",
            dependency
        ),
        ErrorCategory::Unknown => format!("Inspect recent logs for {}", dependency),
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Health Check Result
// ═══════════════════════════════════════════════════════════════════════════════

/// Result of one probe run. Transient; the orchestrator keeps only the
/// latest result per dependency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// Dependency that was checked
    pub dependency: Dependency,

    /// Whether the dependency is considered healthy
    pub healthy: bool,

    /// Round-trip latency of the check in milliseconds
    pub latency_ms: u64,

    /// When the check completed
    pub checked_at: DateTime<Utc>,

    /// Failure category (absent when healthy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<ErrorCategory>,

    /// Error description (absent when healthy)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Sanitized diagnostic details
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub details: Map<String, Value>,
}

impl HealthCheckResult {
    /// Create a healthy result.
    pub fn healthy(dependency: Dependency) -> Self {
        Self {
            dependency,
            healthy: true,
            latency_ms: 0,
            checked_at: Utc::now(),
            category: None,
            error: None,
            details: Map::new(),
        }
    }

    /// Create an unhealthy result.
    pub fn unhealthy(
        dependency: Dependency,
        category: ErrorCategory,
        error: impl Into<String>,
    ) -> Self {
        Self {
            dependency,
            healthy: false,
            latency_ms: 0,
            checked_at: Utc::now(),
            category: Some(category),
            error: Some(error.into()),
            details: Map::new(),
        }
    }

    /// Attach the observed latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency_ms = latency.as_millis() as u64;
        self
    }

    /// Attach a diagnostic detail.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Whether this result represents an administratively disabled
    /// dependency. Disabled dependencies are healthy by definition and
    /// excluded from the overall verdict.
    pub fn is_disabled(&self) -> bool {
        self.details
            .get("disabled")
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    /// Stable dedup summary for incident reporting.
    pub fn summary(&self) -> &'static str {
        self.category.map_or("unhealthy", |c| c.summary())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Probe Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// A single bounded functional check against one dependency.
#[async_trait]
pub trait DependencyProbe: Send + Sync {
    /// Which dependency this probe checks.
    fn dependency(&self) -> Dependency;

    /// Upper bound on one probe run.
    fn timeout(&self) -> Duration;

    /// Perform the check. Implementations convert their own failures into
    /// unhealthy results; this method must not panic.
    async fn check(&self) -> HealthCheckResult;

    /// Run the check capped by [`Self::timeout`]. This is what callers
    /// invoke; a hung remote call becomes a `timeout` result instead of
    /// stalling the cycle.
    async fn probe(&self) -> HealthCheckResult {
        let start = Instant::now();
        match tokio::time::timeout(self.timeout(), self.check()).await {
            Ok(result) => result,
            Err(_) => HealthCheckResult::unhealthy(
                self.dependency(),
                ErrorCategory::Timeout,
                format!("no response within {:?}", self.timeout()),
            )
            .with_latency(start.elapsed()),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Database Probe
// ═══════════════════════════════════════════════════════════════════════════════

/// Probe for the persistent store: a trivial query against the pool.
pub struct DatabaseProbe {
    db: Arc<Database>,
    timeout: Duration,
}

impl DatabaseProbe {
    pub fn new(db: Arc<Database>, timeout: Duration) -> Self {
        Self { db, timeout }
    }
}

#[async_trait]
impl DependencyProbe for DatabaseProbe {
    fn dependency(&self) -> Dependency {
        Dependency::Database
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self) -> HealthCheckResult {
        let start = Instant::now();
        match self.db.ping().await {
            Ok(latency) => {
                debug!(latency_ms = latency.as_millis() as u64, "Database probe ok");
                HealthCheckResult::healthy(Dependency::Database)
                    .with_latency(latency)
                    .with_detail("pool_size", self.db.pool().size())
            }
            Err(e) => {
                let category = match e.code() {
                    ErrorCode::DatabaseConnectionFailed
                        if e.internal_message()
                            .is_some_and(|m| m.contains("no response within")) =>
                    {
                        ErrorCategory::Timeout
                    }
                    ErrorCode::DatabaseConnectionFailed => ErrorCategory::NetworkError,
                    _ => ErrorCategory::ServerError,
                };
                HealthCheckResult::unhealthy(Dependency::Database, category, e.to_string())
                    .with_latency(start.elapsed())
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Integration Probe
// ═══════════════════════════════════════════════════════════════════════════════

/// Probe for an HTTP SaaS integration: one lightweight authenticated GET
/// against a cheap status endpoint, with the response status mapped into
/// the failure taxonomy.
pub struct IntegrationProbe {
    dependency: Dependency,
    config: IntegrationConfig,
    status_path: &'static str,
    client: reqwest::Client,
    timeout: Duration,
}

impl IntegrationProbe {
    fn new(
        dependency: Dependency,
        config: IntegrationConfig,
        status_path: &'static str,
        timeout: Duration,
    ) -> Result<Self> {
        // A client without the per-request timeout must never be handed
        // out; a builder failure surfaces at startup instead.
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            dependency,
            config,
            status_path,
            client,
            timeout,
        })
    }

    /// Probe for the speech-to-text provider.
    pub fn transcription(config: IntegrationConfig, timeout: Duration) -> Result<Self> {
        Self::new(Dependency::Transcription, config, "/v1/status", timeout)
    }

    /// Probe for the draft-generation LLM provider.
    pub fn drafts(config: IntegrationConfig, timeout: Duration) -> Result<Self> {
        Self::new(Dependency::Drafts, config, "/v1/models", timeout)
    }

    /// Probe for the payment/QR provider.
    pub fn payments(config: IntegrationConfig, timeout: Duration) -> Result<Self> {
        Self::new(Dependency::Payments, config, "/v1/balance", timeout)
    }

    fn classify_status(status: u16) -> Option<ErrorCategory> {
        match status {
            200..=299 => None,
            401 | 403 => Some(ErrorCategory::AuthenticationFailed),
            429 => Some(ErrorCategory::RateLimited),
            500..=599 => Some(ErrorCategory::ServerError),
            _ => Some(ErrorCategory::Unknown),
        }
    }
}

#[async_trait]
impl DependencyProbe for IntegrationProbe {
    fn dependency(&self) -> Dependency {
        self.dependency
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn check(&self) -> HealthCheckResult {
        // An administratively disabled integration is an intentional
        // configuration choice, never an alarm.
        if !self.config.enabled {
            return HealthCheckResult::healthy(self.dependency).with_detail("disabled", true);
        }

        if self.config.is_unconfigured() {
            return HealthCheckResult::unhealthy(
                self.dependency,
                ErrorCategory::NotConfigured,
                "integration is enabled but no API key is configured",
            )
            .with_detail("configured", false);
        }

        let url = format!(
            "{}{}",
            self.config.base_url.trim_end_matches('/'),
            self.status_path
        );
        let key = self.config.api_key.as_deref().unwrap_or_default();
        let start = Instant::now();

        match self.client.get(&url).bearer_auth(key).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                let latency = start.elapsed();
                match Self::classify_status(status) {
                    None => HealthCheckResult::healthy(self.dependency)
                        .with_latency(latency)
                        .with_detail("http_status", status),
                    Some(category) => HealthCheckResult::unhealthy(
                        self.dependency,
                        category,
                        format!("unexpected status {} from {}", status, self.status_path),
                    )
                    .with_latency(latency)
                    .with_detail("http_status", status),
                }
            }
            Err(e) => {
                let category = if e.is_timeout() {
                    ErrorCategory::Timeout
                } else if e.is_connect() {
                    ErrorCategory::NetworkError
                } else {
                    ErrorCategory::Unknown
                };
                HealthCheckResult::unhealthy(self.dependency, category, e.to_string())
                    .with_latency(start.elapsed())
            }
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn integration_config(base_url: &str, api_key: Option<&str>) -> IntegrationConfig {
        IntegrationConfig {
            enabled: true,
            api_key: api_key.map(str::to_string),
            base_url: base_url.to_string(),
        }
    }

    #[test]
    fn test_dependency_names_are_stable() {
        assert_eq!(Dependency::Database.as_str(), "database");
        assert_eq!(Dependency::Transcription.as_str(), "transcription");
        assert_eq!(Dependency::Drafts.as_str(), "drafts");
        assert_eq!(Dependency::Payments.as_str(), "payments");
    }

    #[test]
    fn test_dependency_serialization() {
        let json = serde_json::to_string(&Dependency::Payments).unwrap();
        assert_eq!(json, "\"payments\"");
        let dep: Dependency = serde_json::from_str("\"database\"").unwrap();
        assert_eq!(dep, Dependency::Database);
    }

    #[test]
    fn test_summary_is_stable_per_category() {
        // Dedup keys must not embed volatile detail such as latency or
        // status codes.
        let a = HealthCheckResult::unhealthy(
            Dependency::Drafts,
            ErrorCategory::ServerError,
            "status 500",
        );
        let b = HealthCheckResult::unhealthy(
            Dependency::Drafts,
            ErrorCategory::ServerError,
            "status 503",
        );
        assert_eq!(a.summary(), b.summary());
    }

    #[test]
    fn test_healthy_result_builder() {
        let result = HealthCheckResult::healthy(Dependency::Database)
            .with_latency(Duration::from_millis(12))
            .with_detail("pool_size", 5);
        assert!(result.healthy);
        assert_eq!(result.latency_ms, 12);
        assert!(result.category.is_none());
        assert!(!result.is_disabled());
    }

    #[tokio::test]
    async fn test_disabled_integration_reports_healthy() {
        let mut config = integration_config("http://localhost:1", None);
        config.enabled = false;
        let probe = IntegrationProbe::payments(config, Duration::from_secs(1)).unwrap();

        let result = probe.probe().await;
        assert!(result.healthy);
        assert!(result.is_disabled());
    }

    #[tokio::test]
    async fn test_unconfigured_integration() {
        let config = integration_config("http://localhost:1", None);
        let probe = IntegrationProbe::transcription(config, Duration::from_secs(1)).unwrap();

        let result = probe.probe().await;
        assert!(!result.healthy);
        assert_eq!(result.category, Some(ErrorCategory::NotConfigured));
    }

    #[tokio::test]
    async fn test_successful_probe() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/models"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let config = integration_config(&server.uri(), Some("sk-test"));
        let probe = IntegrationProbe::drafts(config, Duration::from_secs(2)).unwrap();

        let result = probe.probe().await;
        assert!(result.healthy);
        assert_eq!(result.details.get("http_status").unwrap(), 200);
    }

    #[tokio::test]
    async fn test_auth_failure_category() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let config = integration_config(&server.uri(), Some("sk-bad"));
        let probe = IntegrationProbe::payments(config, Duration::from_secs(2)).unwrap();

        let result = probe.probe().await;
        assert!(!result.healthy);
        assert_eq!(result.category, Some(ErrorCategory::AuthenticationFailed));
    }

    #[tokio::test]
    async fn test_rate_limit_category() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let config = integration_config(&server.uri(), Some("sk-test"));
        let probe = IntegrationProbe::transcription(config, Duration::from_secs(2)).unwrap();

        let result = probe.probe().await;
        assert_eq!(result.category, Some(ErrorCategory::RateLimited));
    }

    #[tokio::test]
    async fn test_server_error_category() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let config = integration_config(&server.uri(), Some("sk-test"));
        let probe = IntegrationProbe::drafts(config, Duration::from_secs(2)).unwrap();

        let result = probe.probe().await;
        assert_eq!(result.category, Some(ErrorCategory::ServerError));
    }

    #[tokio::test]
    async fn test_network_error_category() {
        // Port 1 should refuse connections.
        let config = integration_config("http://127.0.0.1:1", Some("sk-test"));
        let probe = IntegrationProbe::payments(config, Duration::from_secs(2)).unwrap();

        let result = probe.probe().await;
        assert!(!result.healthy);
        assert_eq!(result.category, Some(ErrorCategory::NetworkError));
    }

    #[tokio::test]
    async fn test_probe_timeout_becomes_result() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
            .mount(&server)
            .await;

        let config = integration_config(&server.uri(), Some("sk-test"));
        let probe = IntegrationProbe::drafts(config, Duration::from_millis(100)).unwrap();

        let result = probe.probe().await;
        assert!(!result.healthy);
        assert_eq!(result.category, Some(ErrorCategory::Timeout));
    }

    #[test]
    fn test_remediation_names_the_credential() {
        let hint = remediation_hint(Dependency::Payments, ErrorCategory::AuthenticationFailed);
        assert!(hint.contains("integrations.payments.api_key"));
    }

    #[test]
    fn test_status_classification() {
        assert_eq!(IntegrationProbe::classify_status(200), None);
        assert_eq!(IntegrationProbe::classify_status(204), None);
        assert_eq!(
            IntegrationProbe::classify_status(403),
            Some(ErrorCategory::AuthenticationFailed)
        );
        assert_eq!(
            IntegrationProbe::classify_status(404),
            Some(ErrorCategory::Unknown)
        );
        assert_eq!(
            IntegrationProbe::classify_status(500),
            Some(ErrorCategory::ServerError)
        );
    }
}
