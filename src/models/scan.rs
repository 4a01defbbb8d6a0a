//! Scan-level aggregates: parse results, import records, occurrences, diffs.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::asset::NormalizedAsset;
use crate::models::finding::{NormalizedFinding, Severity};

/// Output of one parse invocation. Created and consumed per call,
/// never persisted itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanResult {
    pub scanner: String,
    pub scanner_version: Option<String>,

    pub scan_name: Option<String>,
    pub scan_policy: Option<String>,
    pub scan_start: Option<DateTime<Utc>>,
    pub scan_end: Option<DateTime<Utc>>,

    pub assets: Vec<NormalizedAsset>,
    pub findings: Vec<NormalizedFinding>,

    pub total_hosts: usize,
    pub total_findings: usize,
    pub findings_by_severity: BTreeMap<String, usize>,

    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ScanResult {
    pub fn new(scanner: impl Into<String>) -> Self {
        let findings_by_severity = Severity::ALL
            .iter()
            .map(|s| (s.to_string(), 0))
            .collect();
        Self {
            scanner: scanner.into(),
            scanner_version: None,
            scan_name: None,
            scan_policy: None,
            scan_start: None,
            scan_end: None,
            assets: Vec::new(),
            findings: Vec::new(),
            total_hosts: 0,
            total_findings: 0,
            findings_by_severity,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Append a finding, keeping `total_findings` and the per-severity
    /// counts partitioned over `findings`.
    pub fn push_finding(&mut self, finding: NormalizedFinding) {
        *self
            .findings_by_severity
            .entry(finding.severity.to_string())
            .or_insert(0) += 1;
        self.findings.push(finding);
        self.total_findings = self.findings.len();
    }

    /// Widen the scan time window to cover a host's start/end times.
    pub fn extend_scan_window(
        &mut self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) {
        if let Some(start) = start {
            if self.scan_start.map_or(true, |s| start < s) {
                self.scan_start = Some(start);
            }
        }
        if let Some(end) = end {
            if self.scan_end.map_or(true, |e| end > e) {
                self.scan_end = Some(end);
            }
        }
    }
}

/// Scope within which identifiers, content hashes and fingerprints
/// are unique.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    pub workspace_id: Uuid,
    pub project_id: Option<Uuid>,
}

impl Scope {
    pub fn new(workspace_id: Uuid, project_id: Option<Uuid>) -> Self {
        Self {
            workspace_id,
            project_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "import_status", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ImportStatus {
    Queued,
    Processing,
    Processed,
    Failed,
}

/// One record per uploaded scan file. Created before parsing, finalized
/// after reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ScanImport {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Option<Uuid>,
    pub file_name: String,
    pub storage_path: String,
    pub file_size: i64,
    pub file_hash: String,
    pub scanner: String,
    pub scanner_version: Option<String>,
    pub status: ImportStatus,

    pub hosts_total: i32,
    pub findings_total: i32,
    pub findings_new: i32,
    pub findings_updated: i32,
    pub findings_reopened: i32,

    pub scan_started_at: Option<DateTime<Utc>>,
    pub scan_finished_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub imported_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

/// Fields the orchestrator supplies when creating an import record.
#[derive(Debug, Clone)]
pub struct NewScanImport {
    pub workspace_id: Uuid,
    pub project_id: Option<Uuid>,
    pub file_name: String,
    pub storage_path: String,
    pub file_size: i64,
    pub file_hash: String,
    pub scanner: String,
    pub status: ImportStatus,
}

/// Append-only link between a stored finding and the import in which it
/// was observed.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Occurrence {
    pub finding_id: Uuid,
    pub scan_import_id: Uuid,
    pub port: Option<i32>,
    pub protocol: Option<String>,
    pub raw_output: Option<String>,
    pub seen_at: DateTime<Utc>,
}

/// Lifecycle category of a finding between two successive imports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffCategory {
    New,
    Resolved,
    Persistent,
    Reopened,
}

/// Counts-only diff between an import and its predecessor.
#[derive(Debug, Clone, Serialize)]
pub struct DiffSummary {
    pub scan_id: Uuid,
    pub previous_scan_id: Option<Uuid>,
    pub new: usize,
    pub resolved: usize,
    pub persistent: usize,
    pub reopened: usize,
}
