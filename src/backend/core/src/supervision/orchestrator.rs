//! Health check orchestrator.
//!
//! Runs every registered probe concurrently, keeps the latest result
//! per dependency, and drives the incident ledger: unhealthy results
//! open or refresh incidents, healthy results auto-resolve whatever was
//! open. A periodic timer repeats the cycle and hands degraded verdicts
//! to the recovery coordinator.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use metrics::gauge;
use parking_lot::RwLock;
use serde_json::Value;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::supervision::incidents::{IncidentLedger, IncidentReport, IncidentSeverity};
use crate::supervision::probe::{
    remediation_hint, Dependency, DependencyProbe, ErrorCategory, HealthCheckResult,
};
use crate::supervision::recovery::RecoveryCoordinator;

/// Point-in-time view of the last completed cycle.
#[derive(Debug, Clone)]
pub struct HealthSnapshot {
    /// Healthy iff every probe in the last cycle reported healthy.
    pub overall_healthy: bool,
    /// Latest result per dependency, in probe order.
    pub services: Vec<HealthCheckResult>,
    /// When the last cycle completed. None before the first cycle.
    pub last_updated: Option<DateTime<Utc>>,
    /// Cycles in a row that were not fully healthy.
    pub consecutive_degraded: u32,
}

/// Runs probes and reports their outcomes.
pub struct HealthOrchestrator {
    probes: Vec<Arc<dyn DependencyProbe>>,
    ledger: Arc<IncidentLedger>,
    latest: DashMap<Dependency, HealthCheckResult>,
    last_cycle_at: RwLock<Option<DateTime<Utc>>>,
    consecutive_degraded: AtomicU32,
}

impl HealthOrchestrator {
    pub fn new(probes: Vec<Arc<dyn DependencyProbe>>, ledger: Arc<IncidentLedger>) -> Self {
        Self {
            probes,
            ledger,
            latest: DashMap::new(),
            last_cycle_at: RwLock::new(None),
            consecutive_degraded: AtomicU32::new(0),
        }
    }

    /// Run one full cycle: every probe concurrently, each bounded by
    /// its own timeout, then incident reporting per result. Returns the
    /// fresh result set in probe order.
    pub async fn run_now(&self) -> Vec<HealthCheckResult> {
        let results = join_all(self.probes.iter().map(|p| p.probe())).await;

        for result in &results {
            self.latest.insert(result.dependency, result.clone());
            self.report_to_ledger(result).await;

            gauge!(
                "offertory_dependency_healthy",
                "dependency" => result.dependency.as_str()
            )
            .set(if result.healthy { 1.0 } else { 0.0 });
        }

        let overall = results.iter().all(|r| r.healthy);
        *self.last_cycle_at.write() = Some(Utc::now());

        if overall {
            self.consecutive_degraded.store(0, Ordering::Release);
        } else {
            let streak = self.consecutive_degraded.fetch_add(1, Ordering::AcqRel) + 1;
            let unhealthy: Vec<&str> = results
                .iter()
                .filter(|r| !r.healthy)
                .map(|r| r.dependency.as_str())
                .collect();
            warn!(
                degraded_cycles = streak,
                unhealthy = ?unhealthy,
                "Health cycle degraded"
            );
        }

        results
    }

    /// Latest known results without triggering a new cycle. Never
    /// blocks on probe work.
    pub fn snapshot(&self) -> HealthSnapshot {
        let services: Vec<HealthCheckResult> = self
            .probes
            .iter()
            .filter_map(|p| self.latest.get(&p.dependency()).map(|r| r.clone()))
            .collect();
        let overall_healthy =
            services.len() == self.probes.len() && services.iter().all(|r| r.healthy);

        HealthSnapshot {
            overall_healthy,
            services,
            last_updated: *self.last_cycle_at.read(),
            consecutive_degraded: self.consecutive_degraded.load(Ordering::Acquire),
        }
    }

    /// Dependencies whose latest result is unhealthy.
    pub fn unhealthy_dependencies(&self) -> Vec<Dependency> {
        self.probes
            .iter()
            .filter_map(|p| {
                self.latest
                    .get(&p.dependency())
                    .filter(|r| !r.healthy)
                    .map(|r| r.dependency)
            })
            .collect()
    }

    async fn report_to_ledger(&self, result: &HealthCheckResult) {
        // Ledger failures must not abort the cycle; the fallback store
        // already absorbs durable-store outages, so anything surfacing
        // here is worth a log line and nothing more.
        if result.healthy {
            if let Err(e) = self.ledger.resolve_all_for(result.dependency).await {
                error!(dependency = %result.dependency, error = %e, "Failed to auto-resolve incidents");
            }
            return;
        }

        let category = result.category.unwrap_or(ErrorCategory::Unknown);
        let mut report = IncidentReport::new(
            result.dependency,
            severity_for(result.dependency, category),
            result.summary(),
        )
        .with_payload(result.details.clone())
        .with_remediation(remediation_hint(result.dependency, category));
        if let Some(error) = &result.error {
            report = report.with_details(error.clone());
        }
        report
            .payload
            .insert("latency_ms".to_string(), Value::from(result.latency_ms));

        if let Err(e) = self.ledger.report(report).await {
            error!(dependency = %result.dependency, error = %e, "Failed to record incident");
        }
    }

    /// Periodic cycle loop. Runs until the token is cancelled. Degraded
    /// verdicts are offered to the recovery coordinator, which applies
    /// its own critical-tier and cooldown rules.
    pub async fn run_periodic(
        self: Arc<Self>,
        interval: Duration,
        recovery: Arc<RecoveryCoordinator>,
        shutdown: CancellationToken,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Health check scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let results = self.run_now().await;
                    let unhealthy: Vec<Dependency> = results
                        .iter()
                        .filter(|r| !r.healthy)
                        .map(|r| r.dependency)
                        .collect();
                    if !unhealthy.is_empty() {
                        recovery.auto_recover(&unhealthy).await;
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Health check scheduler stopped");
                    break;
                }
            }
        }
    }
}

/// Severity policy: a broken persistent store is always critical, a bad
/// credential is always critical, everything else on an external
/// integration degrades service rather than breaking it.
fn severity_for(dependency: Dependency, category: ErrorCategory) -> IncidentSeverity {
    if dependency == Dependency::Database {
        return IncidentSeverity::Critical;
    }
    match category {
        ErrorCategory::AuthenticationFailed => IncidentSeverity::Critical,
        _ => IncidentSeverity::Warn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervision::incidents::{FileIncidentStore, IncidentStatus};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::tempdir;

    struct FlippableProbe {
        dependency: Dependency,
        healthy: Mutex<bool>,
        category: ErrorCategory,
        delay: Duration,
    }

    impl FlippableProbe {
        fn new(dependency: Dependency, category: ErrorCategory) -> Arc<Self> {
            Arc::new(Self {
                dependency,
                healthy: Mutex::new(true),
                category,
                delay: Duration::ZERO,
            })
        }

        fn set_healthy(&self, healthy: bool) {
            *self.healthy.lock() = healthy;
        }
    }

    #[async_trait]
    impl DependencyProbe for FlippableProbe {
        fn dependency(&self) -> Dependency {
            self.dependency
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn check(&self) -> HealthCheckResult {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if *self.healthy.lock() {
                HealthCheckResult::healthy(self.dependency)
            } else {
                HealthCheckResult::unhealthy(self.dependency, self.category, "scripted failure")
            }
        }
    }

    async fn ledger(dir: &tempfile::TempDir) -> Arc<IncidentLedger> {
        let store = FileIncidentStore::open(dir.path().join("incidents.json")).await;
        Arc::new(IncidentLedger::new(Arc::new(store)))
    }

    #[tokio::test]
    async fn test_all_healthy_cycle() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let a = FlippableProbe::new(Dependency::Database, ErrorCategory::NetworkError);
        let b = FlippableProbe::new(Dependency::Drafts, ErrorCategory::ServerError);
        let orch = HealthOrchestrator::new(vec![a, b], ledger.clone());

        let results = orch.run_now().await;
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.healthy));

        let snap = orch.snapshot();
        assert!(snap.overall_healthy);
        assert_eq!(snap.consecutive_degraded, 0);
        assert!(snap.last_updated.is_some());
        assert_eq!(ledger.active_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unhealthy_probe_opens_warn_incident() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let db = FlippableProbe::new(Dependency::Database, ErrorCategory::NetworkError);
        let drafts = FlippableProbe::new(Dependency::Drafts, ErrorCategory::NetworkError);
        drafts.set_healthy(false);
        let orch = HealthOrchestrator::new(vec![db, drafts], ledger.clone());

        orch.run_now().await;

        let snap = orch.snapshot();
        assert!(!snap.overall_healthy);
        assert_eq!(snap.consecutive_degraded, 1);
        assert_eq!(orch.unhealthy_dependencies(), vec![Dependency::Drafts]);

        let open = ledger.list(Some(IncidentStatus::Open)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].dependency, Dependency::Drafts);
        assert_eq!(open[0].severity, IncidentSeverity::Warn);
        assert!(open[0].remediation.is_some());
    }

    #[tokio::test]
    async fn test_recovery_auto_resolves_incident() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let probe = FlippableProbe::new(Dependency::Payments, ErrorCategory::ServerError);
        probe.set_healthy(false);
        let orch = HealthOrchestrator::new(vec![probe.clone()], ledger.clone());

        orch.run_now().await;
        assert_eq!(ledger.active_count().await.unwrap(), 1);

        probe.set_healthy(true);
        orch.run_now().await;

        assert_eq!(ledger.active_count().await.unwrap(), 0);
        assert!(orch.snapshot().overall_healthy);
        assert_eq!(orch.snapshot().consecutive_degraded, 0);
    }

    #[tokio::test]
    async fn test_repeated_failures_keep_one_incident() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let probe = FlippableProbe::new(Dependency::Transcription, ErrorCategory::Timeout);
        probe.set_healthy(false);
        let orch = HealthOrchestrator::new(vec![probe], ledger.clone());

        orch.run_now().await;
        orch.run_now().await;
        orch.run_now().await;

        assert_eq!(ledger.active_count().await.unwrap(), 1);
        assert_eq!(orch.snapshot().consecutive_degraded, 3);
    }

    #[tokio::test]
    async fn test_database_failure_is_critical() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let probe = FlippableProbe::new(Dependency::Database, ErrorCategory::NetworkError);
        probe.set_healthy(false);
        let orch = HealthOrchestrator::new(vec![probe], ledger.clone());

        orch.run_now().await;

        let open = ledger.list(Some(IncidentStatus::Open)).await.unwrap();
        assert_eq!(open[0].severity, IncidentSeverity::Critical);
    }

    #[tokio::test]
    async fn test_auth_failure_on_integration_is_critical() {
        assert_eq!(
            severity_for(Dependency::Payments, ErrorCategory::AuthenticationFailed),
            IncidentSeverity::Critical
        );
        assert_eq!(
            severity_for(Dependency::Payments, ErrorCategory::RateLimited),
            IncidentSeverity::Warn
        );
    }

    #[tokio::test]
    async fn test_snapshot_before_first_cycle() {
        let dir = tempdir().unwrap();
        let ledger = ledger(&dir).await;
        let probe = FlippableProbe::new(Dependency::Database, ErrorCategory::NetworkError);
        let orch = HealthOrchestrator::new(vec![probe], ledger);

        let snap = orch.snapshot();
        assert!(!snap.overall_healthy);
        assert!(snap.services.is_empty());
        assert!(snap.last_updated.is_none());
    }
}
