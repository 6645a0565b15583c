//! Service health and self-recovery.
//!
//! Everything that keeps the donation-intake platform honest about its
//! external dependencies: probes, the health check orchestrator, the
//! incident ledger, the recovery coordinator, the startup gate, and the
//! runtime watchdog.

pub mod incidents;
pub mod orchestrator;
pub mod probe;
pub mod recovery;
pub mod redact;
pub mod startup;
pub mod watchdog;

pub use incidents::{
    FallbackIncidentStore, FileIncidentStore, Incident, IncidentLedger, IncidentReport,
    IncidentSeverity, IncidentStatus, IncidentStore, PgIncidentStore,
};
pub use orchestrator::{HealthOrchestrator, HealthSnapshot};
pub use probe::{
    DatabaseProbe, Dependency, DependencyProbe, ErrorCategory, HealthCheckResult,
    IntegrationProbe,
};
pub use recovery::{
    RecoveryAttempt, RecoveryCoordinator, RecoveryOutcome, RecoveryStats, RecoveryTrigger,
};
pub use startup::{PgConnector, StartupGate, StoreConnector};
pub use watchdog::{Watchdog, WatchdogPhase, WatchdogStatus};
