//! Offertory server entry point.
//!
//! Composition happens here and nowhere else: configuration, telemetry,
//! the startup gate, the supervision subsystem, and the HTTP server are
//! wired together explicitly so every component can be constructed with
//! fakes in tests.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use offertory_core::api::{self, AppState};
use offertory_core::config::Config;
use offertory_core::db::StoreHandle;
use offertory_core::supervision::{
    DatabaseProbe, DependencyProbe, FallbackIncidentStore, FileIncidentStore,
    HealthOrchestrator, IncidentLedger, IntegrationProbe, PgConnector, PgIncidentStore,
    RecoveryCoordinator, StartupGate, Watchdog,
};
use offertory_core::telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    telemetry::init_logging(&config.logging)?;
    let metrics = telemetry::init_metrics()?;

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting Offertory server");

    // The gate either fully passes or the process does not start.
    let gate = StartupGate::new(config.database.clone(), config.supervision.startup.clone());
    let connector = PgConnector::new(config.database.clone());
    let db = match gate.run(&connector).await {
        Ok(db) => db,
        Err(e) => {
            tracing::error!(error = %e, "Refusing to start");
            std::process::exit(1);
        }
    };

    // Incident ledger: database first, file fallback for the rest of
    // the process lifetime if the database store throws.
    let durable = Arc::new(PgIncidentStore::new(db.clone()));
    let file_store =
        Arc::new(FileIncidentStore::open(&config.supervision.incident_file).await);
    let ledger = Arc::new(IncidentLedger::new(Arc::new(FallbackIncidentStore::new(
        durable, file_store,
    ))));

    let probes: Vec<Arc<dyn DependencyProbe>> = vec![
        Arc::new(DatabaseProbe::new(
            db.clone(),
            config.supervision.database_probe_timeout,
        )),
        Arc::new(IntegrationProbe::transcription(
            config.integrations.transcription.clone(),
            config.supervision.probe_timeout,
        )?),
        Arc::new(IntegrationProbe::drafts(
            config.integrations.drafts.clone(),
            config.supervision.probe_timeout,
        )?),
        Arc::new(IntegrationProbe::payments(
            config.integrations.payments.clone(),
            config.supervision.probe_timeout,
        )?),
    ];

    let orchestrator = Arc::new(HealthOrchestrator::new(probes.clone(), ledger.clone()));
    let recovery = Arc::new(RecoveryCoordinator::new(
        config.supervision.recovery.clone(),
        probes,
        db.clone(),
    ));
    let watchdog = Arc::new(Watchdog::new(
        config.supervision.watchdog.clone(),
        db.clone() as Arc<dyn StoreHandle>,
        ledger.clone(),
    ));

    // First cycle before serving so /ops/status is populated from the
    // start.
    orchestrator.run_now().await;

    let shutdown = CancellationToken::new();
    let orchestrator_task = tokio::spawn(orchestrator.clone().run_periodic(
        config.supervision.check_interval,
        recovery.clone(),
        shutdown.clone(),
    ));
    let watchdog_task = tokio::spawn(watchdog.clone().run(shutdown.clone()));

    let state = AppState {
        orchestrator,
        ledger,
        recovery,
        watchdog,
        metrics: Some(metrics),
    };
    let app = api::build_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    tracing::info!(address = %addr, "Starting HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    let _ = orchestrator_task.await;
    let _ = watchdog_task.await;
    tracing::info!("Server shutdown complete");

    Ok(())
}

/// Load configuration, from `OFFERTORY_CONFIG` when set, else from the
/// environment alone.
fn load_config() -> anyhow::Result<Config> {
    match std::env::var("OFFERTORY_CONFIG") {
        Ok(path) => Config::from_file(&path),
        Err(_) => Config::load(),
    }
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install signal handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
