//! Stable finding identity and file content hashing.
//!
//! A fingerprint names a finding across imports: the same weakness on the
//! same asset and port hashes to the same value no matter which scan file
//! it arrived in, so reconciliation can match new observations to stored
//! findings without fuzzy title comparison.

use sha2::{Digest, Sha256};

/// Hex length of a finding fingerprint.
pub const FINGERPRINT_LEN: usize = 32;

/// Compute the scoped identity of a finding.
///
/// Components, in order:
/// 1. asset identifier, lowercased
/// 2. check id (plugin id, falling back to title at the call site)
/// 3. `port/protocol`, only when a port is present, protocol defaulting
///    to `tcp`
/// 4. CVE list, uppercased, sorted, comma-joined, only when non-empty
///
/// Joined with `|`, SHA-256 hashed, truncated to 32 hex chars. Absent
/// components are omitted entirely, never emitted as empty slots; the
/// CVE list is order-insensitive by construction. Canonicalization is an
/// identity contract against stored fingerprints, so the component order
/// and omission rules must not drift.
pub fn compute(
    asset_identifier: &str,
    check_id: &str,
    port: Option<u16>,
    protocol: Option<&str>,
    cves: &[String],
) -> String {
    let mut components = vec![asset_identifier.to_lowercase(), check_id.to_string()];
    if let Some(port) = port {
        components.push(format!("{port}/{}", protocol.unwrap_or("tcp")));
    }
    if !cves.is_empty() {
        let mut sorted_cves: Vec<String> = cves.iter().map(|c| c.to_uppercase()).collect();
        sorted_cves.sort();
        components.push(sorted_cves.join(","));
    }

    let digest = Sha256::digest(components.join("|").as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Full SHA-256 hex digest of a file's bytes, used for duplicate upload
/// detection.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}
