//! Normalized finding model and the stored-finding status machine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq, Hash)]
#[sqlx(type_name = "severity_level")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    /// Numeric rank used for minimum-severity filtering. Higher is worse.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Critical => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Low => 1,
            Self::Info => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "Critical",
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
            Self::Info => "Info",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            "info" => Ok(Self::Info),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Status state machine of a stored finding. This core only ever moves
/// closed findings back to `Open` on re-detection; every other transition
/// belongs to the external lifecycle collaborator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "finding_status")]
pub enum FindingStatus {
    Open,
    #[sqlx(rename = "In Progress")]
    #[serde(rename = "In Progress")]
    InProgress,
    Waiting,
    Mitigated,
    #[sqlx(rename = "Accepted Risk")]
    #[serde(rename = "Accepted Risk")]
    AcceptedRisk,
    #[sqlx(rename = "False Positive")]
    #[serde(rename = "False Positive")]
    FalsePositive,
    #[sqlx(rename = "Not Observed")]
    #[serde(rename = "Not Observed")]
    NotObserved,
}

impl FindingStatus {
    /// Closed statuses that re-detection transitions back to `Open`.
    pub fn is_closed(&self) -> bool {
        matches!(
            self,
            Self::Mitigated | Self::AcceptedRisk | Self::FalsePositive | Self::NotObserved
        )
    }
}

/// Normalized vulnerability finding extracted from a scan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedFinding {
    pub title: String,
    pub description: Option<String>,
    pub solution: Option<String>,
    pub synopsis: Option<String>,

    pub severity: Severity,
    pub original_severity: Option<String>,

    /// Identifier of the owning asset, used to link after asset upsert.
    pub asset_identifier: String,
    pub location: Option<String>,
    pub port: Option<u16>,
    pub protocol: Option<String>,
    pub service: Option<String>,

    pub cwe: Option<String>,
    pub cves: Vec<String>,
    pub cvss_score: Option<f32>,
    pub cvss_vector: Option<String>,
    pub cvss3_score: Option<f32>,
    pub cvss3_vector: Option<String>,

    pub references: Vec<String>,
    pub reference_ids: BTreeMap<String, Vec<String>>,

    pub plugin_id: Option<String>,
    pub plugin_name: Option<String>,
    pub plugin_family: Option<String>,
    pub plugin_type: Option<String>,
    /// Verbose scanner output, truncated at the configured cap.
    pub plugin_output: Option<String>,

    pub scanner: String,
    pub scanner_finding_id: Option<String>,
    pub fingerprint: String,

    pub extras: BTreeMap<String, serde_json::Value>,
}

impl NormalizedFinding {
    /// Synthesize a location string from port/protocol/service when none
    /// was explicit, e.g. `"443/tcp (https)"`.
    pub fn location_string(&self) -> Option<String> {
        if let Some(location) = &self.location {
            return Some(location.clone());
        }
        let mut out = String::new();
        if let Some(port) = self.port {
            out.push_str(&port.to_string());
            if let Some(protocol) = &self.protocol {
                out.push('/');
                out.push_str(protocol);
            }
        }
        if let Some(service) = &self.service {
            if out.is_empty() {
                out.push_str(service);
            } else {
                out.push_str(&format!(" ({service})"));
            }
        }
        if out.is_empty() {
            None
        } else {
            Some(out)
        }
    }

    /// Preferred CVSS score: v3 when present, else v2.
    pub fn effective_cvss(&self) -> Option<f32> {
        self.cvss3_score.or(self.cvss_score)
    }
}

/// Finding record as held by the persistence collaborator, keyed by
/// (project scope, fingerprint). This core writes `last_seen`, `status`
/// (Open, on reopen), `is_reopened` and `reopen_count`; it never deletes.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredFinding {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Option<Uuid>,
    pub asset_id: Option<Uuid>,
    pub fingerprint: String,
    pub title: String,
    pub severity: Severity,
    pub status: FindingStatus,
    pub is_reopened: bool,
    pub reopen_count: i32,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finding() -> NormalizedFinding {
        NormalizedFinding {
            title: "Test finding".to_string(),
            description: None,
            solution: None,
            synopsis: None,
            severity: Severity::High,
            original_severity: None,
            asset_identifier: "10.0.0.1".to_string(),
            location: None,
            port: None,
            protocol: None,
            service: None,
            cwe: None,
            cves: vec![],
            cvss_score: None,
            cvss_vector: None,
            cvss3_score: None,
            cvss3_vector: None,
            references: vec![],
            reference_ids: BTreeMap::new(),
            plugin_id: None,
            plugin_name: None,
            plugin_family: None,
            plugin_type: None,
            plugin_output: None,
            scanner: "nessus".to_string(),
            scanner_finding_id: None,
            fingerprint: String::new(),
            extras: BTreeMap::new(),
        }
    }

    #[test]
    fn severity_rank_ordering() {
        assert!(Severity::Critical.rank() > Severity::High.rank());
        assert!(Severity::High.rank() > Severity::Medium.rank());
        assert!(Severity::Medium.rank() > Severity::Low.rank());
        assert!(Severity::Low.rank() > Severity::Info.rank());
    }

    #[test]
    fn severity_from_str_case_insensitive() {
        assert_eq!("CRITICAL".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!("info".parse::<Severity>().unwrap(), Severity::Info);
        assert!("bogus".parse::<Severity>().is_err());
    }

    #[test]
    fn closed_statuses() {
        assert!(FindingStatus::Mitigated.is_closed());
        assert!(FindingStatus::AcceptedRisk.is_closed());
        assert!(FindingStatus::FalsePositive.is_closed());
        assert!(FindingStatus::NotObserved.is_closed());
        assert!(!FindingStatus::Open.is_closed());
        assert!(!FindingStatus::InProgress.is_closed());
        assert!(!FindingStatus::Waiting.is_closed());
    }

    #[test]
    fn status_serialization_uses_spaced_names() {
        let json = serde_json::to_string(&FindingStatus::AcceptedRisk).unwrap();
        assert_eq!(json, "\"Accepted Risk\"");
        let back: FindingStatus = serde_json::from_str("\"Not Observed\"").unwrap();
        assert_eq!(back, FindingStatus::NotObserved);
    }

    #[test]
    fn location_string_synthesis() {
        let mut f = finding();
        assert_eq!(f.location_string(), None);

        f.port = Some(443);
        f.protocol = Some("tcp".to_string());
        assert_eq!(f.location_string().as_deref(), Some("443/tcp"));

        f.service = Some("https".to_string());
        assert_eq!(f.location_string().as_deref(), Some("443/tcp (https)"));

        f.port = None;
        f.protocol = None;
        assert_eq!(f.location_string().as_deref(), Some("https"));

        f.location = Some("explicit".to_string());
        assert_eq!(f.location_string().as_deref(), Some("explicit"));
    }

    #[test]
    fn effective_cvss_prefers_v3() {
        let mut f = finding();
        f.cvss_score = Some(5.0);
        assert_eq!(f.effective_cvss(), Some(5.0));
        f.cvss3_score = Some(7.5);
        assert_eq!(f.effective_cvss(), Some(7.5));
    }
}
