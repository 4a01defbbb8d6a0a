//! Postgres-backed `ScanStore` built on sqlx.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ImportError;
use crate::models::asset::{NormalizedAsset, StoredAsset};
use crate::models::finding::{NormalizedFinding, StoredFinding};
use crate::models::scan::{ImportStatus, NewScanImport, Occurrence, ScanImport, Scope};
use crate::store::{ImportFinalize, ScanStore};

const IMPORT_COLUMNS: &str = "id, workspace_id, project_id, file_name, storage_path, \
     file_size, file_hash, scanner, scanner_version, status, hosts_total, findings_total, \
     findings_new, findings_updated, findings_reopened, scan_started_at, scan_finished_at, \
     error_message, imported_at, processed_at";

const FINDING_COLUMNS: &str = "id, workspace_id, project_id, asset_id, fingerprint, title, \
     severity, status, is_reopened, reopen_count, first_seen, last_seen";

#[derive(Debug, Clone)]
pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, ImportError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), ImportError> {
        sqlx::migrate!()
            .run(&self.pool)
            .await
            .map_err(|e| ImportError::Storage {
                operation: "migrate".to_string(),
                message: e.to_string(),
            })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct UpsertedAsset {
    #[sqlx(flatten)]
    asset: StoredAsset,
    inserted: bool,
}

#[async_trait]
impl ScanStore for PgScanStore {
    async fn find_import_by_hash(
        &self,
        scope: &Scope,
        file_hash: &str,
    ) -> Result<Option<ScanImport>, ImportError> {
        let import = sqlx::query_as::<_, ScanImport>(&format!(
            "SELECT {IMPORT_COLUMNS} FROM scan_imports \
             WHERE workspace_id = $1 AND project_id IS NOT DISTINCT FROM $2 \
               AND file_hash = $3 \
             LIMIT 1"
        ))
        .bind(scope.workspace_id)
        .bind(scope.project_id)
        .bind(file_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(import)
    }

    async fn create_import(&self, new: NewScanImport) -> Result<ScanImport, ImportError> {
        let import = sqlx::query_as::<_, ScanImport>(&format!(
            "INSERT INTO scan_imports \
             (id, workspace_id, project_id, file_name, storage_path, file_size, file_hash, \
              scanner, status, imported_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, now()) \
             RETURNING {IMPORT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(new.workspace_id)
        .bind(new.project_id)
        .bind(&new.file_name)
        .bind(&new.storage_path)
        .bind(new.file_size)
        .bind(&new.file_hash)
        .bind(&new.scanner)
        .bind(new.status)
        .fetch_one(&self.pool)
        .await?;
        Ok(import)
    }

    async fn mark_import_failed(&self, id: Uuid, error: &str) -> Result<(), ImportError> {
        sqlx::query(
            "UPDATE scan_imports \
             SET status = $2, error_message = $3, processed_at = now() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(ImportStatus::Failed)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_import(
        &self,
        id: Uuid,
        update: &ImportFinalize,
    ) -> Result<ScanImport, ImportError> {
        let import = sqlx::query_as::<_, ScanImport>(&format!(
            "UPDATE scan_imports SET \
               status = $2, hosts_total = $3, findings_total = $4, findings_new = $5, \
               findings_updated = $6, findings_reopened = $7, scanner_version = $8, \
               scan_started_at = $9, scan_finished_at = $10, processed_at = now() \
             WHERE id = $1 \
             RETURNING {IMPORT_COLUMNS}"
        ))
        .bind(id)
        .bind(ImportStatus::Processed)
        .bind(update.hosts_total)
        .bind(update.findings_total)
        .bind(update.findings_new)
        .bind(update.findings_updated)
        .bind(update.findings_reopened)
        .bind(&update.scanner_version)
        .bind(update.scan_started_at)
        .bind(update.scan_finished_at)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ImportError::NotFound(format!("scan import {id}")))?;
        Ok(import)
    }

    async fn get_import(&self, id: Uuid) -> Result<ScanImport, ImportError> {
        sqlx::query_as::<_, ScanImport>(&format!(
            "SELECT {IMPORT_COLUMNS} FROM scan_imports WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| ImportError::NotFound(format!("scan import {id}")))
    }

    async fn previous_import(
        &self,
        import: &ScanImport,
    ) -> Result<Option<ScanImport>, ImportError> {
        let previous = sqlx::query_as::<_, ScanImport>(&format!(
            "SELECT {IMPORT_COLUMNS} FROM scan_imports \
             WHERE workspace_id = $1 AND project_id IS NOT DISTINCT FROM $2 \
               AND status = $3 AND id <> $4 AND imported_at < $5 \
             ORDER BY imported_at DESC \
             LIMIT 1"
        ))
        .bind(import.workspace_id)
        .bind(import.project_id)
        .bind(ImportStatus::Processed)
        .bind(import.id)
        .bind(import.imported_at)
        .fetch_optional(&self.pool)
        .await?;
        Ok(previous)
    }

    async fn upsert_asset(
        &self,
        scope: &Scope,
        asset: &NormalizedAsset,
        now: DateTime<Utc>,
    ) -> Result<(StoredAsset, bool), ImportError> {
        let row = sqlx::query_as::<_, UpsertedAsset>(
            "INSERT INTO assets \
             (id, workspace_id, project_id, identifier, asset_type, name, first_seen, last_seen) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $7) \
             ON CONFLICT (workspace_id, project_id, identifier) DO UPDATE SET \
               last_seen = EXCLUDED.last_seen, \
               name = COALESCE(assets.name, EXCLUDED.name) \
             RETURNING id, workspace_id, project_id, identifier, asset_type, name, \
                       first_seen, last_seen, (xmax = 0) AS inserted",
        )
        .bind(Uuid::new_v4())
        .bind(scope.workspace_id)
        .bind(scope.project_id)
        .bind(&asset.identifier)
        .bind(asset.asset_type)
        .bind(asset.display_name())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        Ok((row.asset, row.inserted))
    }

    async fn find_finding_by_fingerprint(
        &self,
        scope: &Scope,
        fingerprint: &str,
    ) -> Result<Option<StoredFinding>, ImportError> {
        let finding = sqlx::query_as::<_, StoredFinding>(&format!(
            "SELECT {FINDING_COLUMNS} FROM findings \
             WHERE workspace_id = $1 AND project_id IS NOT DISTINCT FROM $2 \
               AND fingerprint = $3 \
             LIMIT 1"
        ))
        .bind(scope.workspace_id)
        .bind(scope.project_id)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        Ok(finding)
    }

    async fn insert_finding(
        &self,
        scope: &Scope,
        asset_id: Uuid,
        finding: &NormalizedFinding,
        now: DateTime<Utc>,
    ) -> Result<StoredFinding, ImportError> {
        let details = serde_json::to_value(finding).map_err(|e| ImportError::Storage {
            operation: "serialize finding".to_string(),
            message: e.to_string(),
        })?;
        let stored = sqlx::query_as::<_, StoredFinding>(&format!(
            "INSERT INTO findings \
             (id, workspace_id, project_id, asset_id, fingerprint, title, severity, status, \
              is_reopened, reopen_count, first_seen, last_seen, details) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'Open', false, 0, $8, $8, $9) \
             RETURNING {FINDING_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(scope.workspace_id)
        .bind(scope.project_id)
        .bind(asset_id)
        .bind(&finding.fingerprint)
        .bind(&finding.title)
        .bind(finding.severity)
        .bind(now)
        .bind(details)
        .fetch_one(&self.pool)
        .await?;
        Ok(stored)
    }

    async fn touch_finding(
        &self,
        id: Uuid,
        last_seen: DateTime<Utc>,
    ) -> Result<(), ImportError> {
        sqlx::query("UPDATE findings SET last_seen = $2 WHERE id = $1")
            .bind(id)
            .bind(last_seen)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn reopen_finding(
        &self,
        id: Uuid,
        last_seen: DateTime<Utc>,
    ) -> Result<(), ImportError> {
        sqlx::query(
            "UPDATE findings SET \
               status = 'Open', is_reopened = true, reopen_count = reopen_count + 1, \
               last_seen = $2 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(last_seen)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_occurrence(&self, occurrence: &Occurrence) -> Result<(), ImportError> {
        sqlx::query(
            "INSERT INTO finding_occurrences \
             (finding_id, scan_import_id, port, protocol, raw_output, seen_at) \
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(occurrence.finding_id)
        .bind(occurrence.scan_import_id)
        .bind(occurrence.port)
        .bind(&occurrence.protocol)
        .bind(&occurrence.raw_output)
        .bind(occurrence.seen_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn occurrence_finding_ids(
        &self,
        scan_import_id: Uuid,
    ) -> Result<Vec<Uuid>, ImportError> {
        let ids = sqlx::query_scalar::<_, Uuid>(
            "SELECT DISTINCT finding_id FROM finding_occurrences WHERE scan_import_id = $1",
        )
        .bind(scan_import_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    async fn findings_by_ids(&self, ids: &[Uuid]) -> Result<Vec<StoredFinding>, ImportError> {
        let findings = sqlx::query_as::<_, StoredFinding>(&format!(
            "SELECT {FINDING_COLUMNS} FROM findings WHERE id = ANY($1)"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;
        Ok(findings)
    }
}
