//! Runtime watchdog.
//!
//! Started only after the startup gate passes. Pings the persistent
//! store on a fixed interval and tracks a three-phase state machine:
//! `ready` while pings succeed, `degraded` once a threshold of
//! consecutive failures is crossed, and `failed` when a bounded
//! reconnect sequence cannot bring the store back. Entering `failed`
//! terminates the process so an external supervisor restarts it; that
//! is the only post-startup path by which this subsystem kills the
//! process.
//!
//! The readiness flag is read by request middleware on every request,
//! so it lives in an atomic separate from the rest of the state.

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::WatchdogConfig;
use crate::db::StoreHandle;
use crate::supervision::incidents::{IncidentLedger, IncidentReport, IncidentSeverity};
use crate::supervision::probe::Dependency;

/// Watchdog phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WatchdogPhase {
    Ready,
    Degraded,
    Failed,
}

/// Snapshot of the watchdog's state for the admin surface.
#[derive(Debug, Clone, Serialize)]
pub struct WatchdogStatus {
    pub phase: WatchdogPhase,
    pub ready: bool,
    pub consecutive_failures: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

struct Inner {
    phase: WatchdogPhase,
    consecutive_failures: u32,
    last_ping_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

type TerminateHook = Box<dyn Fn() + Send + Sync>;

/// Guards persistent-store connectivity after startup.
pub struct Watchdog {
    config: WatchdogConfig,
    store: Arc<dyn StoreHandle>,
    ledger: Arc<IncidentLedger>,
    inner: Mutex<Inner>,
    ready: AtomicBool,
    terminate: TerminateHook,
}

impl Watchdog {
    /// Production constructor: reconnect exhaustion exits the process
    /// with code 1.
    pub fn new(
        config: WatchdogConfig,
        store: Arc<dyn StoreHandle>,
        ledger: Arc<IncidentLedger>,
    ) -> Self {
        Self::with_terminate(config, store, ledger, Box::new(|| std::process::exit(1)))
    }

    /// Constructor with an injectable termination hook.
    pub fn with_terminate(
        config: WatchdogConfig,
        store: Arc<dyn StoreHandle>,
        ledger: Arc<IncidentLedger>,
        terminate: TerminateHook,
    ) -> Self {
        Self {
            config,
            store,
            ledger,
            inner: Mutex::new(Inner {
                phase: WatchdogPhase::Ready,
                consecutive_failures: 0,
                last_ping_at: None,
                last_error: None,
            }),
            ready: AtomicBool::new(true),
            terminate,
        }
    }

    /// Whether the server should accept non-health traffic.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Current state for the admin surface.
    pub fn status(&self) -> WatchdogStatus {
        let inner = self.inner.lock();
        WatchdogStatus {
            phase: inner.phase,
            ready: self.is_ready(),
            consecutive_failures: inner.consecutive_failures,
            last_ping_at: inner.last_ping_at,
            last_error: inner.last_error.clone(),
        }
    }

    /// One watchdog tick: ping the store and advance the state machine.
    /// May take several reconnect delays when the store is down.
    pub async fn tick(&self) {
        if self.inner.lock().phase == WatchdogPhase::Failed {
            return;
        }

        match self.store.ping().await {
            Ok(latency) => self.on_ping_success(latency.as_millis() as u64),
            Err(e) => {
                let degraded = self.on_ping_failure(e);
                if degraded {
                    self.reconnect_sequence().await;
                }
            }
        }
    }

    fn on_ping_success(&self, latency_ms: u64) {
        let mut inner = self.inner.lock();
        inner.last_ping_at = Some(Utc::now());
        inner.last_error = None;
        inner.consecutive_failures = 0;
        gauge!("offertory_watchdog_failures").set(0.0);

        if inner.phase != WatchdogPhase::Ready {
            info!(latency_ms, "Store connectivity recovered, watchdog ready again");
        }
        inner.phase = WatchdogPhase::Ready;
        drop(inner);
        self.ready.store(true, Ordering::Release);
    }

    /// Returns true when this failure crossed the threshold and the
    /// watchdog just entered `degraded`.
    fn on_ping_failure(&self, error: String) -> bool {
        let mut inner = self.inner.lock();
        inner.last_ping_at = Some(Utc::now());
        inner.consecutive_failures += 1;
        inner.last_error = Some(error);
        let failures = inner.consecutive_failures;
        gauge!("offertory_watchdog_failures").set(failures as f64);

        warn!(
            consecutive_failures = failures,
            threshold = self.config.failure_threshold,
            error = inner.last_error.as_deref().unwrap_or(""),
            "Store ping failed"
        );

        if failures >= self.config.failure_threshold && inner.phase == WatchdogPhase::Ready {
            inner.phase = WatchdogPhase::Degraded;
            drop(inner);
            self.ready.store(false, Ordering::Release);
            counter!("offertory_watchdog_degraded_total").increment(1);
            error!("Watchdog degraded, starting reconnect sequence");
            true
        } else {
            false
        }
    }

    /// Bounded reconnect: up to the configured number of attempts, each
    /// one rebuilding the connection and re-pinging to confirm, with a
    /// fixed delay after a failed attempt. Exhaustion is fatal.
    async fn reconnect_sequence(&self) {
        let attempts = self.config.reconnect_attempts.max(1);

        for attempt in 1..=attempts {
            info!(attempt, attempts, "Attempting store reconnect");
            counter!("offertory_watchdog_reconnects_total").increment(1);

            let outcome = match self.store.reconnect().await {
                Ok(()) => self.store.ping().await.map(|_| ()),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(()) => {
                    info!(attempt, "Store reconnect succeeded");
                    self.on_ping_success(0);
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "Store reconnect failed");
                    self.inner.lock().last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(self.config.reconnect_delay).await;
                    }
                }
            }
        }

        self.enter_failed(attempts).await;
    }

    async fn enter_failed(&self, attempts_made: u32) {
        let (failures, last_error) = {
            let mut inner = self.inner.lock();
            inner.phase = WatchdogPhase::Failed;
            (
                inner.consecutive_failures,
                inner.last_error.clone().unwrap_or_default(),
            )
        };
        self.ready.store(false, Ordering::Release);

        error!(
            consecutive_failures = failures,
            reconnect_attempts = attempts_made,
            last_error = %last_error,
            "Store unrecoverable, terminating so the supervisor can restart the process"
        );

        // Best effort; the file fallback makes this durable even with
        // the database gone.
        let report = IncidentReport::new(
            Dependency::Database,
            IncidentSeverity::Critical,
            "store reconnect exhausted",
        )
        .with_details(last_error)
        .with_payload(
            json!({
                "consecutive_failures": failures,
                "reconnect_attempts": attempts_made,
                "action": "process terminated for supervisor restart",
            })
            .as_object()
            .cloned()
            .unwrap_or_default(),
        );
        if let Err(e) = self.ledger.report(report).await {
            error!(error = %e, "Failed to record termination incident");
        }

        (self.terminate)();
    }

    /// Ticker loop. Runs until cancelled or until the watchdog enters
    /// `failed` and the termination hook returns.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(
            interval_secs = self.config.interval.as_secs(),
            failure_threshold = self.config.failure_threshold,
            "Watchdog started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                    if self.inner.lock().phase == WatchdogPhase::Failed {
                        break;
                    }
                }
                _ = shutdown.cancelled() => {
                    info!("Watchdog stopped");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::supervision::incidents::FileIncidentStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;
    use tempfile::tempdir;

    // Store whose ping and reconnect outcomes follow scripts. Once a
    // script is exhausted its last entry repeats.
    struct ScriptedStore {
        pings: Mutex<VecDeque<bool>>,
        reconnects: Mutex<VecDeque<bool>>,
        reconnect_calls: AtomicU32,
    }

    impl ScriptedStore {
        fn new(pings: Vec<bool>, reconnects: Vec<bool>) -> Arc<Self> {
            Arc::new(Self {
                pings: Mutex::new(pings.into()),
                reconnects: Mutex::new(reconnects.into()),
                reconnect_calls: AtomicU32::new(0),
            })
        }

        fn next(queue: &Mutex<VecDeque<bool>>) -> bool {
            let mut q = queue.lock();
            if q.len() > 1 {
                q.pop_front().unwrap_or(false)
            } else {
                q.front().copied().unwrap_or(false)
            }
        }
    }

    #[async_trait]
    impl StoreHandle for ScriptedStore {
        async fn ping(&self) -> Result<Duration, String> {
            if Self::next(&self.pings) {
                Ok(Duration::from_millis(1))
            } else {
                Err("connection refused".to_string())
            }
        }

        async fn reconnect(&self) -> Result<(), String> {
            self.reconnect_calls.fetch_add(1, Ordering::SeqCst);
            if Self::next(&self.reconnects) {
                Ok(())
            } else {
                Err("reconnect refused".to_string())
            }
        }
    }

    fn config() -> WatchdogConfig {
        WatchdogConfig {
            interval: Duration::from_secs(30),
            failure_threshold: 3,
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(5),
        }
    }

    async fn watchdog(
        store: Arc<ScriptedStore>,
        terminated: Arc<AtomicBool>,
    ) -> (Watchdog, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let ledger = Arc::new(IncidentLedger::new(Arc::new(
            FileIncidentStore::open(dir.path().join("incidents.json")).await,
        )));
        let hook: TerminateHook = Box::new(move || {
            terminated.store(true, Ordering::SeqCst);
        });
        (
            Watchdog::with_terminate(config(), store, ledger, hook),
            dir,
        )
    }

    #[tokio::test]
    async fn test_two_failures_stay_ready() {
        let store = ScriptedStore::new(vec![false, false, true], vec![]);
        let (wd, _dir) = watchdog(store, Arc::new(AtomicBool::new(false))).await;

        wd.tick().await;
        wd.tick().await;

        assert!(wd.is_ready());
        let status = wd.status();
        assert_eq!(status.phase, WatchdogPhase::Ready);
        assert_eq!(status.consecutive_failures, 2);
        assert!(status.last_error.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_third_failure_degrades_and_reconnect_recovers() {
        // Pings fail three times; the second reconnect attempt succeeds
        // and the confirming ping passes.
        let store = ScriptedStore::new(
            vec![false, false, false, true],
            vec![false, true],
        );
        let terminated = Arc::new(AtomicBool::new(false));
        let (wd, _dir) = watchdog(store.clone(), terminated.clone()).await;

        wd.tick().await;
        wd.tick().await;
        assert!(wd.is_ready());
        wd.tick().await;

        assert!(wd.is_ready());
        assert_eq!(wd.status().phase, WatchdogPhase::Ready);
        assert_eq!(wd.status().consecutive_failures, 0);
        assert_eq!(store.reconnect_calls.load(Ordering::SeqCst), 2);
        assert!(!terminated.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_exhaustion_terminates() {
        let store = ScriptedStore::new(vec![false], vec![false]);
        let terminated = Arc::new(AtomicBool::new(false));
        let (wd, _dir) = watchdog(store.clone(), terminated.clone()).await;

        wd.tick().await;
        wd.tick().await;
        wd.tick().await;

        assert_eq!(store.reconnect_calls.load(Ordering::SeqCst), 5);
        assert!(terminated.load(Ordering::SeqCst));
        assert!(!wd.is_ready());
        assert_eq!(wd.status().phase, WatchdogPhase::Failed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_phase_records_incident() {
        let store = ScriptedStore::new(vec![false], vec![false]);
        let terminated = Arc::new(AtomicBool::new(false));

        let dir = tempdir().unwrap();
        let ledger = Arc::new(IncidentLedger::new(Arc::new(
            FileIncidentStore::open(dir.path().join("incidents.json")).await,
        )));
        let hook: TerminateHook = Box::new({
            let terminated = terminated.clone();
            move || terminated.store(true, Ordering::SeqCst)
        });
        let wd = Watchdog::with_terminate(config(), store, ledger.clone(), hook);

        for _ in 0..3 {
            wd.tick().await;
        }

        let incidents = ledger.list(None).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].summary, "store reconnect exhausted");
        assert_eq!(incidents[0].severity, IncidentSeverity::Critical);
        assert_eq!(incidents[0].payload["reconnect_attempts"], 5);
    }

    #[tokio::test]
    async fn test_success_resets_counter() {
        let store = ScriptedStore::new(vec![false, false, true, false], vec![]);
        let (wd, _dir) = watchdog(store, Arc::new(AtomicBool::new(false))).await;

        wd.tick().await;
        wd.tick().await;
        wd.tick().await; // success resets
        assert_eq!(wd.status().consecutive_failures, 0);

        wd.tick().await; // one fresh failure, well under threshold
        assert!(wd.is_ready());
        assert_eq!(wd.status().consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_watchdog_ignores_further_ticks() {
        let store = ScriptedStore::new(vec![false], vec![false]);
        let terminated = Arc::new(AtomicBool::new(false));
        let (wd, _dir) = watchdog(store.clone(), terminated.clone()).await;

        for _ in 0..3 {
            wd.tick().await;
        }
        let calls_at_failure = store.reconnect_calls.load(Ordering::SeqCst);

        wd.tick().await;
        assert_eq!(store.reconnect_calls.load(Ordering::SeqCst), calls_at_failure);
    }
}
