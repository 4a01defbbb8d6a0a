//! Normalized asset model shared by all scanner adapters.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "asset_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AssetType {
    Ip,
    Host,
    Url,
    App,
    Network,
    Cloud,
}

impl AssetType {
    /// Classify an identifier: `Ip` only when it is a syntactically valid
    /// IPv4 address, `Host` otherwise.
    pub fn for_identifier(identifier: &str) -> Self {
        if is_valid_ipv4(identifier) {
            Self::Ip
        } else {
            Self::Host
        }
    }
}

/// Check whether a string is a syntactically valid IPv4 address.
pub fn is_valid_ipv4(value: &str) -> bool {
    value.parse::<Ipv4Addr>().is_ok()
}

/// Normalized asset/host information extracted from a scan file.
///
/// Scanner-specific fields that do not fit the fixed schema go into
/// `metadata` so new scanners need no schema change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedAsset {
    /// Primary identifier (IP or hostname). Never empty.
    pub identifier: String,
    pub asset_type: AssetType,
    pub name: Option<String>,

    pub ip_address: Option<String>,
    pub hostname: Option<String>,
    pub mac_address: Option<String>,
    pub fqdn: Option<String>,
    pub netbios_name: Option<String>,

    pub os_name: Option<String>,
    pub os_version: Option<String>,
    pub os_family: Option<String>,

    pub scanner: String,
    pub scan_start: Option<DateTime<Utc>>,
    pub scan_end: Option<DateTime<Utc>>,

    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl NormalizedAsset {
    /// Build an asset for an identifier with everything else defaulted.
    /// `asset_type` is derived from the identifier shape.
    pub fn new(identifier: impl Into<String>, scanner: impl Into<String>) -> Self {
        let identifier = identifier.into();
        let asset_type = AssetType::for_identifier(&identifier);
        Self {
            identifier,
            asset_type,
            name: None,
            ip_address: None,
            hostname: None,
            mac_address: None,
            fqdn: None,
            netbios_name: None,
            os_name: None,
            os_version: None,
            os_family: None,
            scanner: scanner.into(),
            scan_start: None,
            scan_end: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Display name: explicit name, else hostname, else identifier.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .or(self.hostname.as_deref())
            .unwrap_or(&self.identifier)
    }
}

/// Asset record as held by the persistence collaborator, keyed by
/// (workspace, identifier).
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct StoredAsset {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub project_id: Option<Uuid>,
    pub identifier: String,
    pub asset_type: AssetType,
    pub name: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_ipv4_detection() {
        assert!(is_valid_ipv4("192.168.1.1"));
        assert!(is_valid_ipv4("10.0.0.255"));
        assert!(!is_valid_ipv4("256.1.1.1"));
        assert!(!is_valid_ipv4("server01.corp.local"));
        assert!(!is_valid_ipv4(""));
        assert!(!is_valid_ipv4("192.168.1"));
    }

    #[test]
    fn asset_type_follows_identifier_shape() {
        assert_eq!(AssetType::for_identifier("10.1.2.3"), AssetType::Ip);
        assert_eq!(AssetType::for_identifier("web01"), AssetType::Host);
        assert_eq!(NormalizedAsset::new("10.1.2.3", "nessus").asset_type, AssetType::Ip);
        assert_eq!(NormalizedAsset::new("web01", "nessus").asset_type, AssetType::Host);
    }

    #[test]
    fn display_name_fallback_chain() {
        let mut asset = NormalizedAsset::new("10.1.2.3", "nessus");
        assert_eq!(asset.display_name(), "10.1.2.3");
        asset.hostname = Some("web01".to_string());
        assert_eq!(asset.display_name(), "web01");
        asset.name = Some("Production web".to_string());
        assert_eq!(asset.display_name(), "Production web");
    }
}
