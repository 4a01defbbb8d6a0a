//! Diffing an import against the previous one in its scope.
//!
//! The diff is computed from occurrence sets, not stored on write:
//! findings observed now but not in the baseline are new (or reopened,
//! when their stored state carries the reopened flag), findings in both
//! are persistent, findings only in the baseline are resolved.

use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use crate::errors::ImportError;
use crate::models::finding::StoredFinding;
use crate::models::pagination::{PagedResult, Pagination};
use crate::models::scan::{DiffCategory, DiffSummary};
use crate::store::ScanStore;

pub struct DiffService {
    store: Arc<dyn ScanStore>,
}

struct DiffSets {
    scan_id: Uuid,
    previous_scan_id: Option<Uuid>,
    new: Vec<Uuid>,
    resolved: Vec<Uuid>,
    persistent: Vec<Uuid>,
    reopened: Vec<Uuid>,
}

impl DiffService {
    pub fn new(store: Arc<dyn ScanStore>) -> Self {
        Self { store }
    }

    async fn compute(&self, scan_import_id: Uuid) -> Result<DiffSets, ImportError> {
        let import = self.store.get_import(scan_import_id).await?;
        let previous = self.store.previous_import(&import).await?;

        let current: HashSet<Uuid> = self
            .store
            .occurrence_finding_ids(import.id)
            .await?
            .into_iter()
            .collect();
        let baseline: HashSet<Uuid> = match &previous {
            Some(previous) => self
                .store
                .occurrence_finding_ids(previous.id)
                .await?
                .into_iter()
                .collect(),
            None => HashSet::new(),
        };

        let appeared: Vec<Uuid> = current.difference(&baseline).copied().collect();
        let appeared_findings = self.store.findings_by_ids(&appeared).await?;
        let mut new = Vec::new();
        let mut reopened = Vec::new();
        for finding in &appeared_findings {
            if finding.is_reopened {
                reopened.push(finding.id);
            } else {
                new.push(finding.id);
            }
        }

        Ok(DiffSets {
            scan_id: import.id,
            previous_scan_id: previous.map(|p| p.id),
            new,
            resolved: baseline.difference(&current).copied().collect(),
            persistent: current.intersection(&baseline).copied().collect(),
            reopened,
        })
    }

    /// Counts-only diff against the previous processed import. With no
    /// baseline everything observed counts as new.
    pub async fn diff(&self, scan_import_id: Uuid) -> Result<DiffSummary, ImportError> {
        let sets = self.compute(scan_import_id).await?;
        Ok(DiffSummary {
            scan_id: sets.scan_id,
            previous_scan_id: sets.previous_scan_id,
            new: sets.new.len(),
            resolved: sets.resolved.len(),
            persistent: sets.persistent.len(),
            reopened: sets.reopened.len(),
        })
    }

    /// Page through the findings of one diff category, worst severity
    /// first.
    pub async fn category_findings(
        &self,
        scan_import_id: Uuid,
        category: DiffCategory,
        pagination: &Pagination,
    ) -> Result<PagedResult<StoredFinding>, ImportError> {
        let sets = self.compute(scan_import_id).await?;
        let ids = match category {
            DiffCategory::New => sets.new,
            DiffCategory::Resolved => sets.resolved,
            DiffCategory::Persistent => sets.persistent,
            DiffCategory::Reopened => sets.reopened,
        };

        let mut findings = self.store.findings_by_ids(&ids).await?;
        findings.sort_by(|a, b| {
            b.severity
                .rank()
                .cmp(&a.severity.rank())
                .then_with(|| a.title.cmp(&b.title))
        });

        let total = findings.len() as i64;
        let items: Vec<StoredFinding> = findings
            .into_iter()
            .skip(pagination.offset() as usize)
            .take(pagination.limit() as usize)
            .collect();
        Ok(PagedResult::new(items, total, pagination))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::asset::NormalizedAsset;
    use crate::models::finding::{FindingStatus, NormalizedFinding, Severity};
    use crate::models::scan::{ImportStatus, NewScanImport, ScanResult, Scope};
    use crate::services::fingerprint;
    use crate::services::reconcile::ReconcileEngine;
    use crate::store::{ImportFinalize, MemoryStore};
    use std::collections::BTreeMap;

    fn finding(asset: &str, plugin: &str) -> NormalizedFinding {
        NormalizedFinding {
            title: format!("Plugin {plugin}"),
            description: None,
            solution: None,
            synopsis: None,
            severity: Severity::High,
            original_severity: None,
            asset_identifier: asset.to_string(),
            location: None,
            port: Some(443),
            protocol: Some("tcp".to_string()),
            service: None,
            cwe: None,
            cves: vec![],
            cvss_score: None,
            cvss_vector: None,
            cvss3_score: None,
            cvss3_vector: None,
            references: vec![],
            reference_ids: BTreeMap::new(),
            plugin_id: Some(plugin.to_string()),
            plugin_name: None,
            plugin_family: None,
            plugin_type: None,
            plugin_output: None,
            scanner: "nessus".to_string(),
            scanner_finding_id: Some(plugin.to_string()),
            fingerprint: fingerprint::compute(asset, plugin, Some(443), Some("tcp"), &[]),
            extras: BTreeMap::new(),
        }
    }

    fn scan(findings: Vec<NormalizedFinding>) -> ScanResult {
        let mut result = ScanResult::new("nessus");
        result
            .assets
            .push(NormalizedAsset::new("10.0.0.1", "nessus"));
        result.total_hosts = 1;
        for f in findings {
            result.push_finding(f);
        }
        result
    }

    /// Run one import end to end against the store and return its id.
    async fn run_import(
        store: &Arc<MemoryStore>,
        scope: &Scope,
        hash: &str,
        findings: Vec<NormalizedFinding>,
    ) -> Uuid {
        let import = store
            .create_import(NewScanImport {
                workspace_id: scope.workspace_id,
                project_id: scope.project_id,
                file_name: "scan.nessus".to_string(),
                storage_path: "p".to_string(),
                file_size: 1,
                file_hash: hash.to_string(),
                scanner: "nessus".to_string(),
                status: ImportStatus::Processing,
            })
            .await
            .unwrap();
        let engine = ReconcileEngine::new(store.clone() as Arc<dyn ScanStore>, 1000, 100, 5_000);
        engine
            .reconcile(scope, import.id, &scan(findings))
            .await
            .unwrap();
        store
            .finalize_import(import.id, &ImportFinalize::default())
            .await
            .unwrap();
        import.id
    }

    #[tokio::test]
    async fn first_import_is_all_new() {
        let store = Arc::new(MemoryStore::new());
        let scope = Scope::new(Uuid::new_v4(), None);
        let id = run_import(
            &store,
            &scope,
            "h1",
            vec![finding("10.0.0.1", "1"), finding("10.0.0.1", "2")],
        )
        .await;

        let diff = DiffService::new(store.clone())
            .diff(id)
            .await
            .unwrap();
        assert_eq!(diff.previous_scan_id, None);
        assert_eq!(diff.new, 2);
        assert_eq!(diff.resolved, 0);
        assert_eq!(diff.persistent, 0);
        assert_eq!(diff.reopened, 0);
    }

    #[tokio::test]
    async fn categories_partition_between_two_imports() {
        let store = Arc::new(MemoryStore::new());
        let scope = Scope::new(Uuid::new_v4(), None);

        // Baseline: plugins 1 and 2. Next scan: 2 stays, 1 drops, 3 appears.
        let first = run_import(
            &store,
            &scope,
            "h1",
            vec![finding("10.0.0.1", "1"), finding("10.0.0.1", "2")],
        )
        .await;
        let second = run_import(
            &store,
            &scope,
            "h2",
            vec![finding("10.0.0.1", "2"), finding("10.0.0.1", "3")],
        )
        .await;

        let service = DiffService::new(store.clone());
        let diff = service.diff(second).await.unwrap();
        assert_eq!(diff.previous_scan_id, Some(first));
        assert_eq!(diff.new, 1);
        assert_eq!(diff.persistent, 1);
        assert_eq!(diff.resolved, 1);
        assert_eq!(diff.reopened, 0);

        let new_page = service
            .category_findings(second, DiffCategory::New, &Pagination::default())
            .await
            .unwrap();
        assert_eq!(new_page.total, 1);
        assert_eq!(new_page.items[0].title, "Plugin 3");

        let resolved_page = service
            .category_findings(second, DiffCategory::Resolved, &Pagination::default())
            .await
            .unwrap();
        assert_eq!(resolved_page.items[0].title, "Plugin 1");
    }

    #[tokio::test]
    async fn reopened_findings_classify_separately() {
        let store = Arc::new(MemoryStore::new());
        let scope = Scope::new(Uuid::new_v4(), None);

        let f = finding("10.0.0.1", "1");
        run_import(&store, &scope, "h1", vec![f.clone()]).await;

        // Close it, let one scan miss it, then it comes back.
        let stored = store
            .find_finding_by_fingerprint(&scope, &f.fingerprint)
            .await
            .unwrap()
            .unwrap();
        store.force_status(stored.id, FindingStatus::Mitigated);
        run_import(&store, &scope, "h2", vec![finding("10.0.0.1", "2")]).await;
        let third = run_import(
            &store,
            &scope,
            "h3",
            vec![f.clone(), finding("10.0.0.1", "2")],
        )
        .await;

        let diff = DiffService::new(store.clone()).diff(third).await.unwrap();
        assert_eq!(diff.reopened, 1);
        assert_eq!(diff.new, 0);
        assert_eq!(diff.persistent, 1);
    }
}
