//! Scan-to-scan reconciliation.
//!
//! Matches each normalized finding against stored state by fingerprint
//! and classifies it as created, updated (re-observed) or reopened. Large
//! result sets are committed in batches so a late failure keeps the work
//! already done; the import record is only finalized once every batch
//! lands.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::errors::ImportError;
use crate::models::finding::NormalizedFinding;
use crate::models::scan::{Occurrence, ScanResult, Scope};
use crate::store::ScanStore;

/// Counters produced by one reconciliation run.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ReconcileSummary {
    pub assets_created: usize,
    pub assets_updated: usize,
    pub findings_created: usize,
    pub findings_updated: usize,
    pub findings_reopened: usize,
}

pub struct ReconcileEngine {
    store: Arc<dyn ScanStore>,
    /// Finding count above which commits are split into batches.
    batch_threshold: usize,
    batch_size: usize,
    /// Cap on raw output retained per occurrence row.
    output_cap: usize,
}

impl ReconcileEngine {
    pub fn new(
        store: Arc<dyn ScanStore>,
        batch_threshold: usize,
        batch_size: usize,
        output_cap: usize,
    ) -> Self {
        Self {
            store,
            batch_threshold,
            batch_size: batch_size.max(1),
            output_cap,
        }
    }

    /// Reconcile a parsed scan against stored state.
    ///
    /// Assets are upserted up front so every finding batch can link by
    /// identifier; one `now` covers the whole run so first/last-seen
    /// stamps agree across batches.
    pub async fn reconcile(
        &self,
        scope: &Scope,
        scan_import_id: Uuid,
        result: &ScanResult,
    ) -> Result<ReconcileSummary, ImportError> {
        let now = Utc::now();
        let mut summary = ReconcileSummary::default();

        let mut asset_ids: HashMap<&str, Uuid> = HashMap::with_capacity(result.assets.len());
        for asset in &result.assets {
            let (stored, created) = self.store.upsert_asset(scope, asset, now).await?;
            if created {
                summary.assets_created += 1;
            } else {
                summary.assets_updated += 1;
            }
            asset_ids.insert(asset.identifier.as_str(), stored.id);
        }

        let batched = result.findings.len() > self.batch_threshold;
        if batched {
            let batches = result.findings.len().div_ceil(self.batch_size);
            tracing::info!(
                findings = result.findings.len(),
                batches,
                batch_size = self.batch_size,
                "reconciling in batches"
            );
            for (index, batch) in result.findings.chunks(self.batch_size).enumerate() {
                self.reconcile_batch(scope, scan_import_id, batch, &asset_ids, now, &mut summary)
                    .await
                    .map_err(|source| ImportError::Batch {
                        index,
                        source: Box::new(source),
                    })?;
            }
        } else {
            self.reconcile_batch(
                scope,
                scan_import_id,
                &result.findings,
                &asset_ids,
                now,
                &mut summary,
            )
            .await?;
        }

        tracing::info!(
            created = summary.findings_created,
            updated = summary.findings_updated,
            reopened = summary.findings_reopened,
            assets_created = summary.assets_created,
            "reconciliation complete"
        );
        Ok(summary)
    }

    async fn reconcile_batch(
        &self,
        scope: &Scope,
        scan_import_id: Uuid,
        findings: &[NormalizedFinding],
        asset_ids: &HashMap<&str, Uuid>,
        now: DateTime<Utc>,
        summary: &mut ReconcileSummary,
    ) -> Result<(), ImportError> {
        for finding in findings {
            let Some(asset_id) = asset_ids.get(finding.asset_identifier.as_str()) else {
                tracing::warn!(
                    asset = %finding.asset_identifier,
                    fingerprint = %finding.fingerprint,
                    "finding references unknown asset, skipping"
                );
                continue;
            };

            let existing = self
                .store
                .find_finding_by_fingerprint(scope, &finding.fingerprint)
                .await?;
            let finding_id = match existing {
                None => {
                    let stored = self
                        .store
                        .insert_finding(scope, *asset_id, finding, now)
                        .await?;
                    summary.findings_created += 1;
                    stored.id
                }
                Some(stored) if stored.status.is_closed() => {
                    self.store.reopen_finding(stored.id, now).await?;
                    summary.findings_reopened += 1;
                    stored.id
                }
                Some(stored) => {
                    self.store.touch_finding(stored.id, now).await?;
                    summary.findings_updated += 1;
                    stored.id
                }
            };

            self.store
                .record_occurrence(&Occurrence {
                    finding_id,
                    scan_import_id,
                    port: finding.port.map(i32::from),
                    protocol: finding.protocol.clone(),
                    raw_output: finding
                        .plugin_output
                        .as_deref()
                        .map(|o| cap_output(o, self.output_cap)),
                    seen_at: now,
                })
                .await?;
        }
        Ok(())
    }
}

fn cap_output(output: &str, cap: usize) -> String {
    if output.len() <= cap {
        return output.to_string();
    }
    let mut end = cap;
    while end > 0 && !output.is_char_boundary(end) {
        end -= 1;
    }
    output[..end].to_string()
}
