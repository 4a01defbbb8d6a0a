//! In-memory `ScanStore` used by tests and the store-less CLI path.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::ImportError;
use crate::models::asset::{NormalizedAsset, StoredAsset};
use crate::models::finding::{FindingStatus, NormalizedFinding, StoredFinding};
use crate::models::scan::{ImportStatus, NewScanImport, Occurrence, ScanImport, Scope};
use crate::store::{ImportFinalize, ScanStore};

type ScopeKey = (Uuid, Option<Uuid>);

fn scope_key(scope: &Scope) -> ScopeKey {
    (scope.workspace_id, scope.project_id)
}

#[derive(Default)]
struct Inner {
    imports: HashMap<Uuid, ScanImport>,
    /// Insertion order; the baseline for `previous_import`.
    import_order: Vec<Uuid>,
    assets: HashMap<(ScopeKey, String), StoredAsset>,
    findings: HashMap<Uuid, StoredFinding>,
    findings_by_fingerprint: HashMap<(ScopeKey, String), Uuid>,
    occurrences: Vec<Occurrence>,
}

/// Hash-map backed store. All state lives behind one mutex; no lock is
/// held across an await point.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directly set a stored finding's status. Stands in for the external
    /// lifecycle collaborator when exercising reopen behavior.
    pub fn force_status(&self, id: Uuid, status: FindingStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(finding) = inner.findings.get_mut(&id) {
            finding.status = status;
        }
    }

    pub fn occurrence_count(&self) -> usize {
        self.inner.lock().unwrap().occurrences.len()
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn find_import_by_hash(
        &self,
        scope: &Scope,
        file_hash: &str,
    ) -> Result<Option<ScanImport>, ImportError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .imports
            .values()
            .find(|i| {
                i.workspace_id == scope.workspace_id
                    && i.project_id == scope.project_id
                    && i.file_hash == file_hash
            })
            .cloned())
    }

    async fn create_import(&self, new: NewScanImport) -> Result<ScanImport, ImportError> {
        let mut inner = self.inner.lock().unwrap();
        let import = ScanImport {
            id: Uuid::new_v4(),
            workspace_id: new.workspace_id,
            project_id: new.project_id,
            file_name: new.file_name,
            storage_path: new.storage_path,
            file_size: new.file_size,
            file_hash: new.file_hash,
            scanner: new.scanner,
            scanner_version: None,
            status: new.status,
            hosts_total: 0,
            findings_total: 0,
            findings_new: 0,
            findings_updated: 0,
            findings_reopened: 0,
            scan_started_at: None,
            scan_finished_at: None,
            error_message: None,
            imported_at: Utc::now(),
            processed_at: None,
        };
        inner.import_order.push(import.id);
        inner.imports.insert(import.id, import.clone());
        Ok(import)
    }

    async fn mark_import_failed(&self, id: Uuid, error: &str) -> Result<(), ImportError> {
        let mut inner = self.inner.lock().unwrap();
        let import = inner
            .imports
            .get_mut(&id)
            .ok_or_else(|| ImportError::NotFound(format!("scan import {id}")))?;
        import.status = ImportStatus::Failed;
        import.error_message = Some(error.to_string());
        import.processed_at = Some(Utc::now());
        Ok(())
    }

    async fn finalize_import(
        &self,
        id: Uuid,
        update: &ImportFinalize,
    ) -> Result<ScanImport, ImportError> {
        let mut inner = self.inner.lock().unwrap();
        let import = inner
            .imports
            .get_mut(&id)
            .ok_or_else(|| ImportError::NotFound(format!("scan import {id}")))?;
        import.status = ImportStatus::Processed;
        import.hosts_total = update.hosts_total;
        import.findings_total = update.findings_total;
        import.findings_new = update.findings_new;
        import.findings_updated = update.findings_updated;
        import.findings_reopened = update.findings_reopened;
        import.scanner_version = update.scanner_version.clone();
        import.scan_started_at = update.scan_started_at;
        import.scan_finished_at = update.scan_finished_at;
        import.processed_at = Some(Utc::now());
        Ok(import.clone())
    }

    async fn get_import(&self, id: Uuid) -> Result<ScanImport, ImportError> {
        let inner = self.inner.lock().unwrap();
        inner
            .imports
            .get(&id)
            .cloned()
            .ok_or_else(|| ImportError::NotFound(format!("scan import {id}")))
    }

    async fn previous_import(
        &self,
        import: &ScanImport,
    ) -> Result<Option<ScanImport>, ImportError> {
        let inner = self.inner.lock().unwrap();
        let position = inner
            .import_order
            .iter()
            .position(|id| *id == import.id)
            .unwrap_or(inner.import_order.len());
        Ok(inner.import_order[..position]
            .iter()
            .rev()
            .filter_map(|id| inner.imports.get(id))
            .find(|candidate| {
                candidate.workspace_id == import.workspace_id
                    && candidate.project_id == import.project_id
                    && candidate.status == ImportStatus::Processed
            })
            .cloned())
    }

    async fn upsert_asset(
        &self,
        scope: &Scope,
        asset: &NormalizedAsset,
        now: DateTime<Utc>,
    ) -> Result<(StoredAsset, bool), ImportError> {
        let mut inner = self.inner.lock().unwrap();
        let key = (scope_key(scope), asset.identifier.clone());
        if let Some(existing) = inner.assets.get_mut(&key) {
            existing.last_seen = now;
            if existing.name.is_none() {
                existing.name = asset.name.clone();
            }
            return Ok((existing.clone(), false));
        }
        let stored = StoredAsset {
            id: Uuid::new_v4(),
            workspace_id: scope.workspace_id,
            project_id: scope.project_id,
            identifier: asset.identifier.clone(),
            asset_type: asset.asset_type,
            name: asset.name.clone(),
            first_seen: now,
            last_seen: now,
        };
        inner.assets.insert(key, stored.clone());
        Ok((stored, true))
    }

    async fn find_finding_by_fingerprint(
        &self,
        scope: &Scope,
        fingerprint: &str,
    ) -> Result<Option<StoredFinding>, ImportError> {
        let inner = self.inner.lock().unwrap();
        let key = (scope_key(scope), fingerprint.to_string());
        Ok(inner
            .findings_by_fingerprint
            .get(&key)
            .and_then(|id| inner.findings.get(id))
            .cloned())
    }

    async fn insert_finding(
        &self,
        scope: &Scope,
        asset_id: Uuid,
        finding: &NormalizedFinding,
        now: DateTime<Utc>,
    ) -> Result<StoredFinding, ImportError> {
        let mut inner = self.inner.lock().unwrap();
        let stored = StoredFinding {
            id: Uuid::new_v4(),
            workspace_id: scope.workspace_id,
            project_id: scope.project_id,
            asset_id: Some(asset_id),
            fingerprint: finding.fingerprint.clone(),
            title: finding.title.clone(),
            severity: finding.severity,
            status: FindingStatus::Open,
            is_reopened: false,
            reopen_count: 0,
            first_seen: now,
            last_seen: now,
        };
        inner.findings_by_fingerprint.insert(
            (scope_key(scope), finding.fingerprint.clone()),
            stored.id,
        );
        inner.findings.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn touch_finding(
        &self,
        id: Uuid,
        last_seen: DateTime<Utc>,
    ) -> Result<(), ImportError> {
        let mut inner = self.inner.lock().unwrap();
        let finding = inner
            .findings
            .get_mut(&id)
            .ok_or_else(|| ImportError::NotFound(format!("finding {id}")))?;
        finding.last_seen = last_seen;
        Ok(())
    }

    async fn reopen_finding(
        &self,
        id: Uuid,
        last_seen: DateTime<Utc>,
    ) -> Result<(), ImportError> {
        let mut inner = self.inner.lock().unwrap();
        let finding = inner
            .findings
            .get_mut(&id)
            .ok_or_else(|| ImportError::NotFound(format!("finding {id}")))?;
        finding.status = FindingStatus::Open;
        finding.is_reopened = true;
        finding.reopen_count += 1;
        finding.last_seen = last_seen;
        Ok(())
    }

    async fn record_occurrence(&self, occurrence: &Occurrence) -> Result<(), ImportError> {
        let mut inner = self.inner.lock().unwrap();
        inner.occurrences.push(occurrence.clone());
        Ok(())
    }

    async fn occurrence_finding_ids(
        &self,
        scan_import_id: Uuid,
    ) -> Result<Vec<Uuid>, ImportError> {
        let inner = self.inner.lock().unwrap();
        let mut ids: Vec<Uuid> = inner
            .occurrences
            .iter()
            .filter(|o| o.scan_import_id == scan_import_id)
            .map(|o| o.finding_id)
            .collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn findings_by_ids(&self, ids: &[Uuid]) -> Result<Vec<StoredFinding>, ImportError> {
        let inner = self.inner.lock().unwrap();
        Ok(ids
            .iter()
            .filter_map(|id| inner.findings.get(id))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_import(scope: &Scope, hash: &str) -> NewScanImport {
        NewScanImport {
            workspace_id: scope.workspace_id,
            project_id: scope.project_id,
            file_name: "scan.nessus".to_string(),
            storage_path: "ws/scans/scan.nessus".to_string(),
            file_size: 10,
            file_hash: hash.to_string(),
            scanner: "nessus".to_string(),
            status: ImportStatus::Processing,
        }
    }

    #[tokio::test]
    async fn duplicate_hash_lookup_is_scoped() {
        let store = MemoryStore::new();
        let scope_a = Scope::new(Uuid::new_v4(), None);
        let scope_b = Scope::new(Uuid::new_v4(), None);
        store.create_import(new_import(&scope_a, "abc")).await.unwrap();

        assert!(store
            .find_import_by_hash(&scope_a, "abc")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_import_by_hash(&scope_b, "abc")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_import_by_hash(&scope_a, "other")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn previous_import_skips_failed_and_other_scopes() {
        let store = MemoryStore::new();
        let scope = Scope::new(Uuid::new_v4(), None);
        let other = Scope::new(Uuid::new_v4(), None);

        let first = store.create_import(new_import(&scope, "h1")).await.unwrap();
        store
            .finalize_import(first.id, &ImportFinalize::default())
            .await
            .unwrap();

        let foreign = store.create_import(new_import(&other, "h2")).await.unwrap();
        store
            .finalize_import(foreign.id, &ImportFinalize::default())
            .await
            .unwrap();

        let failed = store.create_import(new_import(&scope, "h3")).await.unwrap();
        store.mark_import_failed(failed.id, "boom").await.unwrap();

        let current = store.create_import(new_import(&scope, "h4")).await.unwrap();
        let previous = store.previous_import(&current).await.unwrap().unwrap();
        assert_eq!(previous.id, first.id);
    }

    #[tokio::test]
    async fn asset_upsert_creates_then_updates() {
        let store = MemoryStore::new();
        let scope = Scope::new(Uuid::new_v4(), None);
        let asset = NormalizedAsset::new("10.0.0.1", "nessus");
        let t1 = Utc::now();

        let (stored, created) = store.upsert_asset(&scope, &asset, t1).await.unwrap();
        assert!(created);

        let t2 = Utc::now();
        let (again, created) = store.upsert_asset(&scope, &asset, t2).await.unwrap();
        assert!(!created);
        assert_eq!(again.id, stored.id);
        assert_eq!(again.last_seen, t2);
        assert_eq!(again.first_seen, t1);
    }

    #[tokio::test]
    async fn reopen_bumps_counter_and_reopens() {
        let store = MemoryStore::new();
        let scope = Scope::new(Uuid::new_v4(), None);
        let asset = NormalizedAsset::new("10.0.0.1", "nessus");
        let now = Utc::now();
        let (stored_asset, _) = store.upsert_asset(&scope, &asset, now).await.unwrap();

        let normalized = sample_finding();
        let stored = store
            .insert_finding(&scope, stored_asset.id, &normalized, now)
            .await
            .unwrap();
        assert_eq!(stored.status, FindingStatus::Open);

        store.force_status(stored.id, FindingStatus::Mitigated);
        store.reopen_finding(stored.id, Utc::now()).await.unwrap();

        let found = store
            .find_finding_by_fingerprint(&scope, &normalized.fingerprint)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.status, FindingStatus::Open);
        assert!(found.is_reopened);
        assert_eq!(found.reopen_count, 1);
    }

    fn sample_finding() -> NormalizedFinding {
        NormalizedFinding {
            title: "SMB Signing Not Required".to_string(),
            description: None,
            solution: None,
            synopsis: None,
            severity: crate::models::finding::Severity::Medium,
            original_severity: None,
            asset_identifier: "10.0.0.1".to_string(),
            location: None,
            port: Some(445),
            protocol: Some("tcp".to_string()),
            service: None,
            cwe: None,
            cves: vec![],
            cvss_score: None,
            cvss_vector: None,
            cvss3_score: None,
            cvss3_vector: None,
            references: vec![],
            reference_ids: std::collections::BTreeMap::new(),
            plugin_id: Some("77777".to_string()),
            plugin_name: None,
            plugin_family: None,
            plugin_type: None,
            plugin_output: None,
            scanner: "nessus".to_string(),
            scanner_finding_id: Some("77777".to_string()),
            fingerprint: "f".repeat(32),
            extras: std::collections::BTreeMap::new(),
        }
    }
}
