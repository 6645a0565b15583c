//! # Offertory Core
//!
//! Health supervision core for the Offertory donation-intake platform.
//!
//! ## Architecture
//!
//! - **Probes**: one bounded functional check per external dependency
//! - **Orchestrator**: concurrent probe cycles with incident reporting
//! - **Incident Ledger**: deduplicated incident lifecycle with a
//!   file-backed fallback store
//! - **Recovery Coordinator**: serialized, cooldown-limited automated
//!   remediation
//! - **Startup Gate**: fail-fast preflight before the server binds
//! - **Runtime Watchdog**: store connectivity guard with bounded
//!   reconnect and supervisor-restart termination

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod supervision;
pub mod telemetry;

pub use error::{ErrorCode, OffertoryError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::api::{build_router, AppState};
    pub use crate::config::Config;
    pub use crate::db::{Database, StoreHandle};
    pub use crate::error::{ErrorCode, OffertoryError, Result};
    pub use crate::supervision::{
        Dependency, DependencyProbe, ErrorCategory, HealthCheckResult, HealthOrchestrator,
        Incident, IncidentLedger, IncidentSeverity, IncidentStatus, RecoveryCoordinator,
        StartupGate, Watchdog,
    };
}
