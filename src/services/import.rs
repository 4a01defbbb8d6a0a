//! Import orchestration: dedupe, resolve, validate, store, parse,
//! reconcile, finalize.
//!
//! Failure handling is asymmetric on purpose: anything up to and
//! including the duplicate check fails without leaving a record, while a
//! parse or reconcile failure after the import record exists marks that
//! record failed and keeps the stored blob for inspection.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::errors::ImportError;
use crate::models::scan::{ImportStatus, NewScanImport, ScanImport, ScanResult, Scope};
use crate::parsers::{AdapterRegistry, ParserConfig};
use crate::services::fingerprint;
use crate::services::reconcile::{ReconcileEngine, ReconcileSummary};
use crate::store::{BlobStore, ImportFinalize, ScanStore};

/// Per-upload options supplied by the caller.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub project_id: Option<Uuid>,
    /// Adapter name to try first, bypassing auto-detection.
    pub scanner_hint: Option<String>,
    pub mime_type: Option<String>,
    /// Import even when the same content was already imported here.
    pub force: bool,
}

/// Everything a caller learns from a completed import.
#[derive(Debug, Clone, Serialize)]
pub struct ImportOutcome {
    pub import: ScanImport,
    pub summary: ReconcileSummary,
    /// Non-fatal per-host extraction failures.
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

pub struct ImportService {
    registry: AdapterRegistry,
    store: Arc<dyn ScanStore>,
    blobs: Arc<dyn BlobStore>,
    parser_config: ParserConfig,
    reconcile: ReconcileEngine,
}

impl ImportService {
    pub fn new(
        registry: AdapterRegistry,
        store: Arc<dyn ScanStore>,
        blobs: Arc<dyn BlobStore>,
        config: &AppConfig,
    ) -> Self {
        let reconcile = ReconcileEngine::new(
            store.clone(),
            config.batch_threshold,
            config.batch_size,
            config.occurrence_output_cap,
        );
        Self {
            registry,
            store,
            blobs,
            parser_config: config.parser_config(),
            reconcile,
        }
    }

    /// Run the full pipeline for one uploaded scan file.
    pub async fn process_scan(
        &self,
        content: &[u8],
        filename: &str,
        workspace_id: Uuid,
        options: ImportOptions,
    ) -> Result<ImportOutcome, ImportError> {
        let scope = Scope::new(workspace_id, options.project_id);

        let file_hash = fingerprint::content_hash(content);
        if !options.force {
            if let Some(existing) = self.store.find_import_by_hash(&scope, &file_hash).await? {
                tracing::info!(
                    existing_import = %existing.id,
                    %filename,
                    "rejecting duplicate upload"
                );
                return Err(ImportError::Duplicate {
                    filename: filename.to_string(),
                });
            }
        }

        let adapter = self.registry.resolve(
            filename,
            Some(content),
            options.mime_type.as_deref(),
            options.scanner_hint.as_deref(),
        )?;
        if !adapter.validate(content, filename) {
            return Err(ImportError::Validation {
                scanner: adapter.name().to_string(),
                filename: filename.to_string(),
            });
        }

        let storage_path = build_storage_path(workspace_id, filename);
        self.blobs.put(&storage_path, content).await?;

        let import = self
            .store
            .create_import(NewScanImport {
                workspace_id,
                project_id: options.project_id,
                file_name: filename.to_string(),
                storage_path,
                file_size: content.len() as i64,
                file_hash,
                scanner: adapter.name().to_string(),
                status: ImportStatus::Processing,
            })
            .await?;
        tracing::info!(
            import = %import.id,
            scanner = adapter.name(),
            %filename,
            size = content.len(),
            "import started"
        );

        let result = match adapter.parse(content, filename, &self.parser_config) {
            Ok(result) => result,
            Err(e) => return self.fail(import.id, e).await,
        };

        let summary = match self.reconcile.reconcile(&scope, import.id, &result).await {
            Ok(summary) => summary,
            Err(e) => return self.fail(import.id, e).await,
        };

        let import = self
            .store
            .finalize_import(import.id, &finalize_update(&result, &summary))
            .await?;
        tracing::info!(
            import = %import.id,
            hosts = import.hosts_total,
            findings = import.findings_total,
            new = import.findings_new,
            "import processed"
        );

        Ok(ImportOutcome {
            import,
            summary,
            errors: result.errors,
            warnings: result.warnings,
        })
    }

    async fn fail(
        &self,
        import_id: Uuid,
        error: ImportError,
    ) -> Result<ImportOutcome, ImportError> {
        tracing::error!(import = %import_id, error = %error, "import failed");
        self.store
            .mark_import_failed(import_id, &error.to_string())
            .await?;
        Err(error)
    }
}

fn finalize_update(result: &ScanResult, summary: &ReconcileSummary) -> ImportFinalize {
    ImportFinalize {
        hosts_total: result.total_hosts as i32,
        findings_total: result.total_findings as i32,
        findings_new: summary.findings_created as i32,
        findings_updated: summary.findings_updated as i32,
        findings_reopened: summary.findings_reopened as i32,
        scanner_version: result.scanner_version.clone(),
        scan_started_at: result.scan_start,
        scan_finished_at: result.scan_end,
    }
}

/// `{workspace}/scans/{timestamp}_{uuid8}_{filename}`; the random part
/// keeps re-uploads of the same name from colliding.
fn build_storage_path(workspace_id: Uuid, filename: &str) -> String {
    let timestamp = Utc::now().format("%Y%m%d%H%M%S");
    let unique = Uuid::new_v4().simple().to_string();
    format!("{workspace_id}/scans/{timestamp}_{}_{filename}", &unique[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_path_shape() {
        let workspace = Uuid::new_v4();
        let path = build_storage_path(workspace, "scan.nessus");
        assert!(path.starts_with(&format!("{workspace}/scans/")));
        assert!(path.ends_with("_scan.nessus"));

        let other = build_storage_path(workspace, "scan.nessus");
        assert_ne!(path, other);
    }
}
