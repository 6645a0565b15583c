//! Incident ledger.
//!
//! Durable, deduplicated record of dependency problems. Incidents are
//! keyed by (dependency, summary): repeated failures with the same
//! summary update one open record instead of creating a pile of
//! duplicates, and a recovered dependency auto-resolves everything it
//! had open.
//!
//! The ledger writes to the database by default. If the database store
//! itself throws, the ledger switches to a local file-backed store for
//! the rest of the process lifetime. There is no switch-back: the whole
//! point of the fallback is that incidents keep getting recorded while
//! the durable store is the thing that is broken.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::Row;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::Database;
use crate::error::{ErrorCode, OffertoryError, Result};
use crate::supervision::probe::Dependency;
use crate::supervision::redact::PayloadRedactor;

// ═══════════════════════════════════════════════════════════════════════════════
// Model
// ═══════════════════════════════════════════════════════════════════════════════

/// Severity of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentSeverity {
    Info,
    Warn,
    Critical,
}

impl IncidentSeverity {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Critical => "critical",
        }
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "info" => Ok(Self::Info),
            "warn" => Ok(Self::Warn),
            "critical" => Ok(Self::Critical),
            other => Err(OffertoryError::with_internal(
                ErrorCode::SerializationError,
                "Invalid incident severity",
                format!("unknown severity: {}", other),
            )),
        }
    }
}

/// Lifecycle status of an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IncidentStatus {
    Open,
    Investigating,
    Resolved,
}

impl IncidentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Investigating => "investigating",
            Self::Resolved => "resolved",
        }
    }

    /// Open and investigating incidents both count as unresolved.
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Resolved)
    }

    fn parse(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(Self::Open),
            "investigating" => Ok(Self::Investigating),
            "resolved" => Ok(Self::Resolved),
            other => Err(OffertoryError::with_internal(
                ErrorCode::SerializationError,
                "Invalid incident status",
                format!("unknown status: {}", other),
            )),
        }
    }
}

/// A persisted record of a detected problem with one dependency.
///
/// At most one incident per (dependency, summary) pair may be active at
/// a time; the ledger enforces this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub dependency: Dependency,
    pub severity: IncidentSeverity,
    pub status: IncidentStatus,

    /// Short, stable description used as the dedup key
    pub summary: String,

    /// Free-text diagnostic detail, redacted before storage
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,

    /// Structured check payload, redacted before storage
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub payload: Map<String, Value>,

    /// Operator-facing remediation hint
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<String>,

    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Input to [`IncidentLedger::report`].
#[derive(Debug, Clone)]
pub struct IncidentReport {
    pub dependency: Dependency,
    pub severity: IncidentSeverity,
    pub summary: String,
    pub details: Option<String>,
    pub payload: Map<String, Value>,
    pub remediation: Option<String>,
}

impl IncidentReport {
    pub fn new(
        dependency: Dependency,
        severity: IncidentSeverity,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            dependency,
            severity,
            summary: summary.into(),
            details: None,
            payload: Map::new(),
            remediation: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_payload(mut self, payload: Map<String, Value>) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_remediation(mut self, remediation: impl Into<String>) -> Self {
        self.remediation = Some(remediation.into());
        self
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Store Trait
// ═══════════════════════════════════════════════════════════════════════════════

/// Storage backend for incident records.
///
/// The ledger owns dedup and redaction; stores only persist. Every
/// method maps storage failures into errors so the fallback decorator
/// can observe them.
#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Find the active incident for (dependency, summary), if any.
    async fn find_active(
        &self,
        dependency: Dependency,
        summary: &str,
    ) -> Result<Option<Incident>>;

    /// Persist a new incident.
    async fn insert(&self, incident: &Incident) -> Result<()>;

    /// Overwrite an existing incident record.
    async fn update(&self, incident: &Incident) -> Result<()>;

    /// Fetch one incident by id.
    async fn get(&self, id: Uuid) -> Result<Option<Incident>>;

    /// All active incidents for one dependency.
    async fn active_for(&self, dependency: Dependency) -> Result<Vec<Incident>>;

    /// Incidents ordered most-recently-seen first, optionally filtered
    /// by status.
    async fn list(&self, status: Option<IncidentStatus>) -> Result<Vec<Incident>>;

    /// Number of active incidents.
    async fn count_active(&self) -> Result<u64>;
}

// ═══════════════════════════════════════════════════════════════════════════════
// Postgres Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Database-backed incident store.
pub struct PgIncidentStore {
    db: Arc<Database>,
}

impl PgIncidentStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    fn row_to_incident(row: &sqlx::postgres::PgRow) -> Result<Incident> {
        let dependency: String = row.try_get("dependency")?;
        let severity: String = row.try_get("severity")?;
        let status: String = row.try_get("status")?;
        let payload: Value = row.try_get("payload")?;

        Ok(Incident {
            id: row.try_get("id")?,
            dependency: dependency.parse().map_err(|e: String| {
                OffertoryError::with_internal(
                    ErrorCode::SerializationError,
                    "Invalid incident record",
                    e,
                )
            })?,
            severity: IncidentSeverity::parse(&severity)?,
            status: IncidentStatus::parse(&status)?,
            summary: row.try_get("summary")?,
            details: row.try_get("details")?,
            payload: payload.as_object().cloned().unwrap_or_default(),
            remediation: row.try_get("remediation")?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
            resolved_at: row.try_get("resolved_at")?,
        })
    }
}

#[async_trait]
impl IncidentStore for PgIncidentStore {
    async fn find_active(
        &self,
        dependency: Dependency,
        summary: &str,
    ) -> Result<Option<Incident>> {
        let row = sqlx::query(
            "SELECT * FROM incidents \
             WHERE dependency = $1 AND summary = $2 AND status IN ('open', 'investigating') \
             ORDER BY last_seen_at DESC LIMIT 1",
        )
        .bind(dependency.as_str())
        .bind(summary)
        .fetch_optional(&self.db.pool())
        .await?;

        row.as_ref().map(Self::row_to_incident).transpose()
    }

    async fn insert(&self, incident: &Incident) -> Result<()> {
        sqlx::query(
            "INSERT INTO incidents \
             (id, dependency, severity, status, summary, details, payload, remediation, \
              first_seen_at, last_seen_at, resolved_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
        )
        .bind(incident.id)
        .bind(incident.dependency.as_str())
        .bind(incident.severity.as_str())
        .bind(incident.status.as_str())
        .bind(&incident.summary)
        .bind(&incident.details)
        .bind(Value::Object(incident.payload.clone()))
        .bind(&incident.remediation)
        .bind(incident.first_seen_at)
        .bind(incident.last_seen_at)
        .bind(incident.resolved_at)
        .execute(&self.db.pool())
        .await?;
        Ok(())
    }

    async fn update(&self, incident: &Incident) -> Result<()> {
        sqlx::query(
            "UPDATE incidents SET severity = $2, status = $3, details = $4, payload = $5, \
             remediation = $6, last_seen_at = $7, resolved_at = $8 WHERE id = $1",
        )
        .bind(incident.id)
        .bind(incident.severity.as_str())
        .bind(incident.status.as_str())
        .bind(&incident.details)
        .bind(Value::Object(incident.payload.clone()))
        .bind(&incident.remediation)
        .bind(incident.last_seen_at)
        .bind(incident.resolved_at)
        .execute(&self.db.pool())
        .await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Incident>> {
        let row = sqlx::query("SELECT * FROM incidents WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.db.pool())
            .await?;
        row.as_ref().map(Self::row_to_incident).transpose()
    }

    async fn active_for(&self, dependency: Dependency) -> Result<Vec<Incident>> {
        let rows = sqlx::query(
            "SELECT * FROM incidents \
             WHERE dependency = $1 AND status IN ('open', 'investigating') \
             ORDER BY last_seen_at DESC",
        )
        .bind(dependency.as_str())
        .fetch_all(&self.db.pool())
        .await?;
        rows.iter().map(Self::row_to_incident).collect()
    }

    async fn list(&self, status: Option<IncidentStatus>) -> Result<Vec<Incident>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(
                    "SELECT * FROM incidents WHERE status = $1 ORDER BY last_seen_at DESC",
                )
                .bind(status.as_str())
                .fetch_all(&self.db.pool())
                .await?
            }
            None => {
                sqlx::query("SELECT * FROM incidents ORDER BY last_seen_at DESC")
                    .fetch_all(&self.db.pool())
                    .await?
            }
        };
        rows.iter().map(Self::row_to_incident).collect()
    }

    async fn count_active(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM incidents WHERE status IN ('open', 'investigating')",
        )
        .fetch_one(&self.db.pool())
        .await?;
        Ok(count.max(0) as u64)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// File Store
// ═══════════════════════════════════════════════════════════════════════════════

/// File-backed incident store used when the database store fails.
///
/// The whole collection is one JSON document keyed by incident id,
/// rewritten in full on every mutation. The document is tiny (open
/// incidents for at most four dependencies) so the rewrite cost is
/// irrelevant next to losing incident history during an outage.
pub struct FileIncidentStore {
    path: PathBuf,
    doc: Mutex<BTreeMap<Uuid, Incident>>,
}

impl FileIncidentStore {
    /// Open the store, loading any document a previous process left
    /// behind. An unreadable or corrupt document starts fresh rather
    /// than failing, since this store exists to keep working when
    /// everything else is broken.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let doc = match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<BTreeMap<Uuid, Incident>>(&bytes) {
                Ok(doc) => doc,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Incident file is corrupt, starting fresh");
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };
        Self {
            path,
            doc: Mutex::new(doc),
        }
    }

    async fn persist(&self, doc: &BTreeMap<Uuid, Incident>) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(doc)?;
        tokio::fs::write(&self.path, bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl IncidentStore for FileIncidentStore {
    async fn find_active(
        &self,
        dependency: Dependency,
        summary: &str,
    ) -> Result<Option<Incident>> {
        let doc = self.doc.lock().await;
        Ok(doc
            .values()
            .filter(|i| {
                i.dependency == dependency && i.summary == summary && i.status.is_active()
            })
            .max_by_key(|i| i.last_seen_at)
            .cloned())
    }

    async fn insert(&self, incident: &Incident) -> Result<()> {
        let mut doc = self.doc.lock().await;
        doc.insert(incident.id, incident.clone());
        self.persist(&doc).await
    }

    async fn update(&self, incident: &Incident) -> Result<()> {
        let mut doc = self.doc.lock().await;
        doc.insert(incident.id, incident.clone());
        self.persist(&doc).await
    }

    async fn get(&self, id: Uuid) -> Result<Option<Incident>> {
        let doc = self.doc.lock().await;
        Ok(doc.get(&id).cloned())
    }

    async fn active_for(&self, dependency: Dependency) -> Result<Vec<Incident>> {
        let doc = self.doc.lock().await;
        let mut incidents: Vec<Incident> = doc
            .values()
            .filter(|i| i.dependency == dependency && i.status.is_active())
            .cloned()
            .collect();
        incidents.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(incidents)
    }

    async fn list(&self, status: Option<IncidentStatus>) -> Result<Vec<Incident>> {
        let doc = self.doc.lock().await;
        let mut incidents: Vec<Incident> = doc
            .values()
            .filter(|i| status.map_or(true, |s| i.status == s))
            .cloned()
            .collect();
        incidents.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        Ok(incidents)
    }

    async fn count_active(&self) -> Result<u64> {
        let doc = self.doc.lock().await;
        Ok(doc.values().filter(|i| i.status.is_active()).count() as u64)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Fallback Store
// ═══════════════════════════════════════════════════════════════════════════════

/// Decorator that routes to a durable store until it fails, then to the
/// file store for the rest of the process lifetime.
pub struct FallbackIncidentStore {
    durable: Arc<dyn IncidentStore>,
    fallback: Arc<FileIncidentStore>,
    failed_over: AtomicBool,
}

impl FallbackIncidentStore {
    pub fn new(durable: Arc<dyn IncidentStore>, fallback: Arc<FileIncidentStore>) -> Self {
        Self {
            durable,
            fallback,
            failed_over: AtomicBool::new(false),
        }
    }

    /// Whether the store has switched to the file backend.
    pub fn is_failed_over(&self) -> bool {
        self.failed_over.load(Ordering::Acquire)
    }

    fn note_failover(&self, error: &OffertoryError) {
        // Log the decision once. swap() returns the previous value, so
        // only the transitioning caller reports.
        if !self.failed_over.swap(true, Ordering::AcqRel) {
            error!(
                error = %error,
                "Durable incident store failed, switching to file-backed store for the \
                 remainder of this process"
            );
            counter!("offertory_incident_store_failovers_total").increment(1);
        }
    }
}

macro_rules! with_fallback {
    ($self:expr, $op:ident ( $($arg:expr),* )) => {{
        if !$self.is_failed_over() {
            match $self.durable.$op($($arg),*).await {
                Ok(value) => return Ok(value),
                Err(e) => $self.note_failover(&e),
            }
        }
        $self.fallback.$op($($arg),*).await
    }};
}

#[async_trait]
impl IncidentStore for FallbackIncidentStore {
    async fn find_active(
        &self,
        dependency: Dependency,
        summary: &str,
    ) -> Result<Option<Incident>> {
        with_fallback!(self, find_active(dependency, summary))
    }

    async fn insert(&self, incident: &Incident) -> Result<()> {
        with_fallback!(self, insert(incident))
    }

    async fn update(&self, incident: &Incident) -> Result<()> {
        with_fallback!(self, update(incident))
    }

    async fn get(&self, id: Uuid) -> Result<Option<Incident>> {
        with_fallback!(self, get(id))
    }

    async fn active_for(&self, dependency: Dependency) -> Result<Vec<Incident>> {
        with_fallback!(self, active_for(dependency))
    }

    async fn list(&self, status: Option<IncidentStatus>) -> Result<Vec<Incident>> {
        with_fallback!(self, list(status))
    }

    async fn count_active(&self) -> Result<u64> {
        with_fallback!(self, count_active())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Ledger
// ═══════════════════════════════════════════════════════════════════════════════

/// The incident ledger. Owns dedup, redaction, and lifecycle; delegates
/// persistence to its store.
pub struct IncidentLedger {
    store: Arc<dyn IncidentStore>,

    // Serializes find-then-write sequences so two concurrent reports
    // for the same (dependency, summary) cannot both observe "no active
    // incident" and insert twice.
    write_lock: Mutex<()>,
}

impl IncidentLedger {
    pub fn new(store: Arc<dyn IncidentStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    /// Record a problem. Updates the existing active incident for
    /// (dependency, summary) if one exists, otherwise opens a new one.
    /// Payload and details are redacted before anything is stored.
    pub async fn report(&self, report: IncidentReport) -> Result<Incident> {
        let redactor = PayloadRedactor::global();
        let mut payload = report.payload;
        redactor.redact_map(&mut payload);
        let details = report.details.map(|d| redactor.redact_text(&d));

        let _guard = self.write_lock.lock().await;
        let now = Utc::now();

        if let Some(mut existing) = self
            .store
            .find_active(report.dependency, &report.summary)
            .await?
        {
            existing.last_seen_at = now;
            existing.severity = report.severity;
            existing.payload = payload;
            if details.is_some() {
                existing.details = details;
            }
            self.store.update(&existing).await?;
            return Ok(existing);
        }

        let incident = Incident {
            id: Uuid::new_v4(),
            dependency: report.dependency,
            severity: report.severity,
            status: IncidentStatus::Open,
            summary: report.summary,
            details,
            payload,
            remediation: report.remediation,
            first_seen_at: now,
            last_seen_at: now,
            resolved_at: None,
        };
        self.store.insert(&incident).await?;

        counter!(
            "offertory_incidents_opened_total",
            "dependency" => incident.dependency.as_str(),
            "severity" => incident.severity.as_str()
        )
        .increment(1);
        warn!(
            incident_id = %incident.id,
            dependency = %incident.dependency,
            severity = incident.severity.as_str(),
            summary = %incident.summary,
            "Incident opened"
        );

        Ok(incident)
    }

    /// Resolve one incident by id. Idempotent: resolving an already
    /// resolved incident returns it unchanged.
    pub async fn resolve(&self, id: Uuid) -> Result<Incident> {
        let _guard = self.write_lock.lock().await;

        let mut incident = self
            .store
            .get(id)
            .await?
            .ok_or_else(|| OffertoryError::incident_not_found(id))?;

        if incident.status == IncidentStatus::Resolved {
            return Ok(incident);
        }

        incident.status = IncidentStatus::Resolved;
        incident.resolved_at = Some(Utc::now());
        self.store.update(&incident).await?;

        counter!(
            "offertory_incidents_resolved_total",
            "dependency" => incident.dependency.as_str()
        )
        .increment(1);
        info!(incident_id = %incident.id, dependency = %incident.dependency, "Incident resolved");

        Ok(incident)
    }

    /// Resolve every active incident for a dependency. Used when a
    /// probe reports healthy again. Returns how many were resolved.
    pub async fn resolve_all_for(&self, dependency: Dependency) -> Result<u64> {
        let _guard = self.write_lock.lock().await;

        let active = self.store.active_for(dependency).await?;
        let count = active.len() as u64;
        let now = Utc::now();

        for mut incident in active {
            incident.status = IncidentStatus::Resolved;
            incident.resolved_at = Some(now);
            self.store.update(&incident).await?;
        }

        if count > 0 {
            counter!(
                "offertory_incidents_resolved_total",
                "dependency" => dependency.as_str()
            )
            .increment(count);
            info!(dependency = %dependency, count, "Auto-resolved incidents after recovery");
        }

        Ok(count)
    }

    /// List incidents, most recently seen first.
    pub async fn list(&self, status: Option<IncidentStatus>) -> Result<Vec<Incident>> {
        self.store.list(status).await
    }

    /// Number of unresolved incidents.
    pub async fn active_count(&self) -> Result<u64> {
        self.store.count_active().await
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    async fn file_ledger(dir: &tempfile::TempDir) -> IncidentLedger {
        let store = FileIncidentStore::open(dir.path().join("incidents.json")).await;
        IncidentLedger::new(Arc::new(store))
    }

    fn report(dependency: Dependency, summary: &str) -> IncidentReport {
        IncidentReport::new(dependency, IncidentSeverity::Warn, summary)
    }

    #[tokio::test]
    async fn test_report_opens_incident() {
        let dir = tempdir().unwrap();
        let ledger = file_ledger(&dir).await;

        let incident = ledger
            .report(report(Dependency::Drafts, "server error"))
            .await
            .unwrap();

        assert_eq!(incident.status, IncidentStatus::Open);
        assert_eq!(incident.dependency, Dependency::Drafts);
        assert!(incident.resolved_at.is_none());
        assert_eq!(ledger.active_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_repeated_report_updates_not_duplicates() {
        let dir = tempdir().unwrap();
        let ledger = file_ledger(&dir).await;

        let first = ledger
            .report(report(Dependency::Payments, "rate limited"))
            .await
            .unwrap();
        let second = ledger
            .report(report(Dependency::Payments, "rate limited"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert!(second.last_seen_at >= first.last_seen_at);
        assert_eq!(ledger.active_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_different_summary_is_distinct_incident() {
        let dir = tempdir().unwrap();
        let ledger = file_ledger(&dir).await;

        let a = ledger
            .report(report(Dependency::Payments, "rate limited"))
            .await
            .unwrap();
        let b = ledger
            .report(report(Dependency::Payments, "authentication failed"))
            .await
            .unwrap();

        assert_ne!(a.id, b.id);
        assert_eq!(ledger.active_count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_resolve_is_idempotent() {
        let dir = tempdir().unwrap();
        let ledger = file_ledger(&dir).await;

        let incident = ledger
            .report(report(Dependency::Drafts, "check timed out"))
            .await
            .unwrap();

        let resolved = ledger.resolve(incident.id).await.unwrap();
        assert_eq!(resolved.status, IncidentStatus::Resolved);
        let resolved_at = resolved.resolved_at.unwrap();

        let again = ledger.resolve(incident.id).await.unwrap();
        assert_eq!(again.resolved_at.unwrap(), resolved_at);
    }

    #[tokio::test]
    async fn test_resolve_unknown_id_is_not_found() {
        let dir = tempdir().unwrap();
        let ledger = file_ledger(&dir).await;

        let err = ledger.resolve(Uuid::new_v4()).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::IncidentNotFound);
    }

    #[tokio::test]
    async fn test_resolve_all_for_dependency() {
        let dir = tempdir().unwrap();
        let ledger = file_ledger(&dir).await;

        ledger
            .report(report(Dependency::Database, "network error"))
            .await
            .unwrap();
        ledger
            .report(report(Dependency::Database, "check timed out"))
            .await
            .unwrap();
        ledger
            .report(report(Dependency::Drafts, "server error"))
            .await
            .unwrap();

        let resolved = ledger.resolve_all_for(Dependency::Database).await.unwrap();
        assert_eq!(resolved, 2);

        let open = ledger.list(Some(IncidentStatus::Open)).await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].dependency, Dependency::Drafts);

        let resolved = ledger.list(Some(IncidentStatus::Resolved)).await.unwrap();
        assert!(resolved.iter().all(|i| i.resolved_at.is_some()));
    }

    #[tokio::test]
    async fn test_payload_redacted_before_storage() {
        let dir = tempdir().unwrap();
        let ledger = file_ledger(&dir).await;

        let mut payload = Map::new();
        payload.insert("apiKey".to_string(), json!("sk_live_abc123"));
        payload.insert("http_status".to_string(), json!(401));

        let incident = ledger
            .report(
                report(Dependency::Payments, "authentication failed")
                    .with_payload(payload)
                    .with_details("rejected key sk_live_abc123 at /v1/balance"),
            )
            .await
            .unwrap();

        let serialized = serde_json::to_string(&incident).unwrap();
        assert!(!serialized.contains("sk_live_abc123"));
        assert_eq!(incident.payload["apiKey"], "[REDACTED]");
        assert_eq!(incident.payload["http_status"], 401);
    }

    #[tokio::test]
    async fn test_file_store_survives_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("incidents.json");

        {
            let store = FileIncidentStore::open(&path).await;
            let ledger = IncidentLedger::new(Arc::new(store));
            ledger
                .report(report(Dependency::Drafts, "server error"))
                .await
                .unwrap();
        }

        let store = FileIncidentStore::open(&path).await;
        let ledger = IncidentLedger::new(Arc::new(store));
        assert_eq!(ledger.active_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_file_starts_fresh() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("incidents.json");
        tokio::fs::write(&path, b"not json").await.unwrap();

        let store = FileIncidentStore::open(&path).await;
        assert_eq!(store.count_active().await.unwrap(), 0);
    }

    // Store that fails every operation, standing in for a broken
    // database during fallback tests.
    struct BrokenStore;

    #[async_trait]
    impl IncidentStore for BrokenStore {
        async fn find_active(&self, _: Dependency, _: &str) -> Result<Option<Incident>> {
            Err(broken())
        }
        async fn insert(&self, _: &Incident) -> Result<()> {
            Err(broken())
        }
        async fn update(&self, _: &Incident) -> Result<()> {
            Err(broken())
        }
        async fn get(&self, _: Uuid) -> Result<Option<Incident>> {
            Err(broken())
        }
        async fn active_for(&self, _: Dependency) -> Result<Vec<Incident>> {
            Err(broken())
        }
        async fn list(&self, _: Option<IncidentStatus>) -> Result<Vec<Incident>> {
            Err(broken())
        }
        async fn count_active(&self) -> Result<u64> {
            Err(broken())
        }
    }

    fn broken() -> OffertoryError {
        OffertoryError::new(ErrorCode::IncidentStoreError, "store is down")
    }

    #[tokio::test]
    async fn test_fallback_switches_permanently_to_file() {
        let dir = tempdir().unwrap();
        let file = Arc::new(FileIncidentStore::open(dir.path().join("incidents.json")).await);
        let fallback = Arc::new(FallbackIncidentStore::new(Arc::new(BrokenStore), file));
        assert!(!fallback.is_failed_over());

        let ledger = IncidentLedger::new(fallback.clone());
        let incident = ledger
            .report(report(Dependency::Database, "network error"))
            .await
            .unwrap();

        assert!(fallback.is_failed_over());
        assert_eq!(incident.status, IncidentStatus::Open);

        // Subsequent operations keep using the file store.
        assert_eq!(ledger.active_count().await.unwrap(), 1);
    }
}
