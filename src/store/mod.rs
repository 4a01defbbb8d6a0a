//! Persistence seams for the import pipeline.
//!
//! The orchestrator and reconciliation engine only talk to these traits.
//! `MemoryStore`/`MemoryBlobStore` back tests and the CLI; `PgScanStore`/
//! `FsBlobStore` are the production pair.

pub mod blob;
pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::ImportError;
use crate::models::asset::{NormalizedAsset, StoredAsset};
use crate::models::finding::{NormalizedFinding, StoredFinding};
use crate::models::scan::{NewScanImport, Occurrence, ScanImport, Scope};

pub use blob::{BlobStore, FsBlobStore, MemoryBlobStore};
pub use memory::MemoryStore;
pub use postgres::PgScanStore;

/// Counters and scan metadata written onto an import record once
/// reconciliation finishes.
#[derive(Debug, Clone, Default)]
pub struct ImportFinalize {
    pub hosts_total: i32,
    pub findings_total: i32,
    pub findings_new: i32,
    pub findings_updated: i32,
    pub findings_reopened: i32,
    pub scanner_version: Option<String>,
    pub scan_started_at: Option<DateTime<Utc>>,
    pub scan_finished_at: Option<DateTime<Utc>>,
}

/// Relational persistence used by import and reconciliation.
///
/// All lookups are scoped: a fingerprint or content hash only collides
/// within the same workspace/project pair.
#[async_trait]
pub trait ScanStore: Send + Sync {
    /// Earlier import of the same file content in this scope, if any.
    async fn find_import_by_hash(
        &self,
        scope: &Scope,
        file_hash: &str,
    ) -> Result<Option<ScanImport>, ImportError>;

    async fn create_import(&self, new: NewScanImport) -> Result<ScanImport, ImportError>;

    async fn mark_import_failed(&self, id: Uuid, error: &str) -> Result<(), ImportError>;

    /// Mark the import processed and write the reconciliation counters.
    async fn finalize_import(
        &self,
        id: Uuid,
        update: &ImportFinalize,
    ) -> Result<ScanImport, ImportError>;

    async fn get_import(&self, id: Uuid) -> Result<ScanImport, ImportError>;

    /// Most recent processed import in the same scope that predates the
    /// given one. Baseline for diffing.
    async fn previous_import(
        &self,
        import: &ScanImport,
    ) -> Result<Option<ScanImport>, ImportError>;

    /// Insert the asset or refresh `last_seen` on the existing row keyed
    /// by (scope, identifier). The flag is `true` when a row was created.
    async fn upsert_asset(
        &self,
        scope: &Scope,
        asset: &NormalizedAsset,
        now: DateTime<Utc>,
    ) -> Result<(StoredAsset, bool), ImportError>;

    async fn find_finding_by_fingerprint(
        &self,
        scope: &Scope,
        fingerprint: &str,
    ) -> Result<Option<StoredFinding>, ImportError>;

    async fn insert_finding(
        &self,
        scope: &Scope,
        asset_id: Uuid,
        finding: &NormalizedFinding,
        now: DateTime<Utc>,
    ) -> Result<StoredFinding, ImportError>;

    /// Refresh `last_seen` on a re-observed finding.
    async fn touch_finding(&self, id: Uuid, last_seen: DateTime<Utc>)
        -> Result<(), ImportError>;

    /// Move a closed finding back to Open, set the reopened flag and bump
    /// the reopen counter.
    async fn reopen_finding(
        &self,
        id: Uuid,
        last_seen: DateTime<Utc>,
    ) -> Result<(), ImportError>;

    /// Append-only observation linking a finding to an import.
    async fn record_occurrence(&self, occurrence: &Occurrence) -> Result<(), ImportError>;

    /// Distinct finding ids observed in an import.
    async fn occurrence_finding_ids(
        &self,
        scan_import_id: Uuid,
    ) -> Result<Vec<Uuid>, ImportError>;

    async fn findings_by_ids(&self, ids: &[Uuid]) -> Result<Vec<StoredFinding>, ImportError>;
}
