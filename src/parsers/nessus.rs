//! Nessus scan file adapter (.nessus XML).
//!
//! Handles exports from Nessus Professional/Essentials and Tenable.io/.sc.
//! The whole document is deserialized with lenient string-typed fields so
//! only malformed container XML is fatal; per-host and per-item problems
//! degrade to error log entries on the result.
//!
//! File structure:
//! ```text
//! <NessusClientData_v2>
//!   <Policy>...</Policy>
//!   <Report name="scan_name">
//!     <ReportHost name="192.168.1.1">
//!       <HostProperties><tag name="host-ip">192.168.1.1</tag>...</HostProperties>
//!       <ReportItem port="445" protocol="tcp" pluginID="66334" ...>...</ReportItem>
//!     </ReportHost>
//!   </Report>
//! </NessusClientData_v2>
//! ```

use std::collections::BTreeMap;
use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use serde::Deserialize;

use crate::errors::ImportError;
use crate::models::asset::{is_valid_ipv4, NormalizedAsset};
use crate::models::finding::{NormalizedFinding, Severity};
use crate::models::scan::ScanResult;
use crate::parsers::{ParserConfig, ScannerAdapter};
use crate::services::fingerprint;

/// Informational/noise plugins skipped by default (scan info, port scanners).
pub const DEFAULT_NOISE_PLUGINS: &[&str] = &[
    "19506", // Nessus Scan Information
    "10180", // Ping the remote host
    "11219", // Nessus SYN scanner
    "34220", // Netstat Portscanner (SSH)
    "14272", // Netstat Portscanner (WMI)
    "34277", // Nessus UDP scanner
];

/// Textual risk_factor mapping, checked before the numeric attribute.
const RISK_FACTOR_SEVERITIES: &[(&str, Severity)] = &[
    ("critical", Severity::Critical),
    ("high", Severity::High),
    ("medium", Severity::Medium),
    ("low", Severity::Low),
    ("none", Severity::Info),
    ("informational", Severity::Info),
    ("info", Severity::Info),
];

/// Numeric severity attribute fallback.
const NUMERIC_SEVERITIES: &[(&str, Severity)] = &[
    ("4", Severity::Critical),
    ("3", Severity::High),
    ("2", Severity::Medium),
    ("1", Severity::Low),
    ("0", Severity::Info),
];

/// OS family detection patterns, first match wins.
const OS_FAMILY_PATTERNS: &[(&str, &str)] = &[
    (r"windows", "Windows"),
    (r"linux", "Linux"),
    (r"ubuntu", "Linux"),
    (r"debian", "Linux"),
    (r"centos", "Linux"),
    (r"red\s*hat", "Linux"),
    (r"rhel", "Linux"),
    (r"fedora", "Linux"),
    (r"suse", "Linux"),
    (r"mac\s*os|darwin|osx", "macOS"),
    (r"freebsd", "BSD"),
    (r"openbsd", "BSD"),
    (r"netbsd", "BSD"),
    (r"solaris|sunos", "Solaris"),
    (r"aix", "AIX"),
    (r"hp-ux", "HP-UX"),
    (r"cisco\s*ios", "Cisco IOS"),
    (r"junos", "Juniper JunOS"),
    (r"vmware\s*esx", "VMware ESXi"),
];

/// Candidate timestamp formats, native Nessus format first.
const TIMESTAMP_FORMATS: &[&str] = &[
    "%a %b %d %H:%M:%S %Y",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%d %H:%M:%S",
];

// -- Lenient XML shapes --

#[derive(Debug, Deserialize)]
struct NessusFile {
    #[serde(rename = "Policy", default)]
    policy: Option<PolicyXml>,
    #[serde(rename = "Report", default)]
    report: Option<ReportXml>,
}

#[derive(Debug, Deserialize)]
struct PolicyXml {
    #[serde(rename = "policyName", default)]
    policy_name: Option<String>,
    #[serde(rename = "Preferences", default)]
    preferences: Option<PreferencesXml>,
}

#[derive(Debug, Deserialize)]
struct PreferencesXml {
    #[serde(rename = "ServerPreferences", default)]
    server: Option<ServerPreferencesXml>,
}

#[derive(Debug, Deserialize)]
struct ServerPreferencesXml {
    #[serde(rename = "preference", default)]
    preferences: Vec<PreferenceXml>,
}

#[derive(Debug, Deserialize)]
struct PreferenceXml {
    #[serde(default)]
    name: String,
    #[serde(default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ReportXml {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "ReportHost", default)]
    hosts: Vec<ReportHostXml>,
}

#[derive(Debug, Deserialize)]
struct ReportHostXml {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "HostProperties", default)]
    properties: Option<HostPropertiesXml>,
    #[serde(rename = "ReportItem", default)]
    items: Vec<ReportItemXml>,
}

impl ReportHostXml {
    /// Flatten the property bag into a map.
    fn property_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        if let Some(props) = &self.properties {
            for tag in &props.tags {
                if !tag.name.is_empty() {
                    map.insert(tag.name.clone(), tag.value.clone());
                }
            }
        }
        map
    }
}

#[derive(Debug, Deserialize)]
struct HostPropertiesXml {
    #[serde(rename = "tag", default)]
    tags: Vec<HostTagXml>,
}

#[derive(Debug, Deserialize)]
struct HostTagXml {
    #[serde(rename = "@name", default)]
    name: String,
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct ReportItemXml {
    #[serde(rename = "@pluginID", default)]
    plugin_id: String,
    #[serde(rename = "@port", default)]
    port: String,
    #[serde(rename = "@protocol", default)]
    protocol: String,
    #[serde(rename = "@svc_name", default)]
    svc_name: String,
    #[serde(rename = "@pluginName", default)]
    plugin_name: String,
    #[serde(rename = "@pluginFamily", default)]
    plugin_family: String,
    #[serde(rename = "@severity", default)]
    severity: String,

    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    synopsis: Option<String>,
    #[serde(default)]
    solution: Option<String>,
    #[serde(default)]
    risk_factor: Option<String>,
    #[serde(default)]
    plugin_output: Option<String>,
    #[serde(default)]
    plugin_type: Option<String>,
    #[serde(default)]
    see_also: Option<String>,

    #[serde(default)]
    cvss_base_score: Option<String>,
    #[serde(default)]
    cvss_vector: Option<String>,
    #[serde(default)]
    cvss3_base_score: Option<String>,
    #[serde(default)]
    cvss3_vector: Option<String>,

    #[serde(rename = "cve", default)]
    cves: Vec<String>,
    #[serde(rename = "cwe", default)]
    cwes: Vec<String>,
    #[serde(rename = "bid", default)]
    bids: Vec<String>,
    #[serde(rename = "msft", default)]
    msfts: Vec<String>,
    #[serde(rename = "xref", default)]
    xrefs: Vec<String>,

    #[serde(default)]
    exploit_available: Option<String>,
    #[serde(default)]
    exploitability_ease: Option<String>,
    #[serde(default)]
    patch_publication_date: Option<String>,
    #[serde(default)]
    vuln_publication_date: Option<String>,
    #[serde(default)]
    plugin_publication_date: Option<String>,
    #[serde(default)]
    plugin_modification_date: Option<String>,
}

/// Adapter for Nessus scan files.
#[derive(Debug, Default)]
pub struct NessusAdapter;

impl NessusAdapter {
    pub fn new() -> Self {
        Self
    }

    fn extract_metadata(&self, doc: &NessusFile, result: &mut ScanResult) {
        if let Some(report) = &doc.report {
            result.scan_name = non_empty(&report.name);
        }
        if let Some(policy) = &doc.policy {
            result.scan_policy = policy.policy_name.as_deref().and_then(non_empty);
            result.scanner_version = policy
                .preferences
                .as_ref()
                .and_then(|p| p.server.as_ref())
                .and_then(|s| {
                    s.preferences
                        .iter()
                        .find(|p| p.name == "sc_version")
                        .and_then(|p| non_empty(&p.value))
                });
        }
    }

    fn convert_host(
        &self,
        host: &ReportHostXml,
        config: &ParserConfig,
    ) -> Result<(NormalizedAsset, Vec<NormalizedFinding>), String> {
        let props = host.property_map();

        let ip_candidate = props
            .get("host-ip")
            .and_then(|v| non_empty(v))
            .unwrap_or_else(|| host.name.clone());
        let identifier = if is_valid_ipv4(&ip_candidate) {
            ip_candidate.clone()
        } else {
            host.name.trim().to_string()
        };
        if identifier.is_empty() {
            return Err("host has no usable identifier (no name or host-ip)".to_string());
        }

        let mut asset = NormalizedAsset::new(identifier, self.name());
        asset.ip_address = is_valid_ipv4(&ip_candidate).then_some(ip_candidate);
        asset.hostname = props
            .get("hostname")
            .or_else(|| props.get("netbios-name"))
            .and_then(|v| non_empty(v));
        asset.fqdn = props.get("host-fqdn").and_then(|v| non_empty(v));
        asset.netbios_name = props.get("netbios-name").and_then(|v| non_empty(v));
        asset.mac_address = props.get("mac-address").and_then(|v| non_empty(v));
        asset.os_name = props.get("operating-system").and_then(|v| non_empty(v));
        asset.os_family = asset.os_name.as_deref().and_then(detect_os_family);
        asset.scan_start = props.get("HOST_START").and_then(|v| parse_timestamp(v));
        asset.scan_end = props.get("HOST_END").and_then(|v| parse_timestamp(v));

        for key in [
            "system-type",
            "local-checks-proto",
            "smb-login-used",
            "ssh-auth-meth",
            "Credentialed_Scan",
            "traceroute-hop-0",
        ] {
            if let Some(value) = props.get(key).and_then(|v| non_empty(v)) {
                asset
                    .metadata
                    .insert(key.to_string(), serde_json::Value::String(value));
            }
        }

        let findings = host
            .items
            .iter()
            .filter_map(|item| self.convert_item(item, &asset, config))
            .collect();

        Ok((asset, findings))
    }

    fn convert_item(
        &self,
        item: &ReportItemXml,
        asset: &NormalizedAsset,
        config: &ParserConfig,
    ) -> Option<NormalizedFinding> {
        // Noise deny-list applies regardless of severity.
        if config.noise_checks.contains(&item.plugin_id) {
            return None;
        }

        let risk_factor = item.risk_factor.as_deref().and_then(non_empty);
        let severity = resolve_severity(risk_factor.as_deref(), &item.severity);
        if severity.rank() < config.min_severity.rank() {
            return None;
        }

        let plugin_name = non_empty(&item.plugin_name);
        let description = item.description.as_deref().and_then(non_empty);
        // No reportable content.
        if plugin_name.is_none() && description.is_none() {
            return None;
        }

        let cves: Vec<String> = item
            .cves
            .iter()
            .filter_map(|c| non_empty(c))
            .map(|c| c.to_uppercase())
            .collect();
        let cwe = item
            .cwes
            .iter()
            .find_map(|c| non_empty(c))
            .map(|c| format!("CWE-{c}"));

        let references: Vec<String> = item
            .see_also
            .as_deref()
            .map(|see_also| {
                see_also
                    .lines()
                    .map(str::trim)
                    .filter(|line| line.starts_with("http://") || line.starts_with("https://"))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let mut reference_ids: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (key, values) in [
            ("bugtraq", &item.bids),
            ("microsoft", &item.msfts),
            ("xref", &item.xrefs),
        ] {
            let collected: Vec<String> = values.iter().filter_map(|v| non_empty(v)).collect();
            if !collected.is_empty() {
                reference_ids.insert(key.to_string(), collected);
            }
        }

        let port = item.port.parse::<u16>().ok().filter(|p| *p > 0);
        let protocol = non_empty(&item.protocol);
        let service = non_empty(&item.svc_name).filter(|s| s != "general");

        let location = match (port, &service) {
            (Some(port), Some(service)) => {
                Some(format!("{port}/{} ({service})", item.protocol))
            }
            (Some(port), None) => Some(format!("{port}/{}", item.protocol)),
            (None, Some(service)) => Some(service.clone()),
            (None, None) => None,
        };

        let plugin_output = item
            .plugin_output
            .as_deref()
            .and_then(non_empty)
            .map(|output| truncate_output(&output, config.max_output_len));

        let mut extras = BTreeMap::new();
        for (key, value) in [
            ("exploit_available", &item.exploit_available),
            ("exploitability_ease", &item.exploitability_ease),
            ("patch_publication_date", &item.patch_publication_date),
            ("vuln_publication_date", &item.vuln_publication_date),
            ("plugin_publication_date", &item.plugin_publication_date),
            ("plugin_modification_date", &item.plugin_modification_date),
        ] {
            if let Some(value) = value.as_deref().and_then(non_empty) {
                extras.insert(key.to_string(), serde_json::Value::String(value));
            }
        }

        let plugin_id = non_empty(&item.plugin_id);
        let title = plugin_name.clone().unwrap_or_default();
        let check_id = plugin_id.clone().unwrap_or_else(|| title.clone());
        let computed = fingerprint::compute(
            &asset.identifier,
            &check_id,
            port,
            protocol.as_deref(),
            &cves,
        );

        Some(NormalizedFinding {
            title,
            description,
            solution: item.solution.as_deref().and_then(non_empty),
            synopsis: item.synopsis.as_deref().and_then(non_empty),
            severity,
            original_severity: risk_factor
                .clone()
                .or_else(|| Some(format!("severity_{}", item.severity))),
            asset_identifier: asset.identifier.clone(),
            location,
            port,
            protocol,
            service,
            cwe,
            cves,
            cvss_score: parse_f32(item.cvss_base_score.as_deref()),
            cvss_vector: item.cvss_vector.as_deref().and_then(non_empty),
            cvss3_score: parse_f32(item.cvss3_base_score.as_deref()),
            cvss3_vector: item.cvss3_vector.as_deref().and_then(non_empty),
            references,
            reference_ids,
            plugin_id: plugin_id.clone(),
            plugin_name,
            plugin_family: non_empty(&item.plugin_family),
            plugin_type: item.plugin_type.as_deref().and_then(non_empty),
            plugin_output,
            scanner: self.name().to_string(),
            scanner_finding_id: plugin_id,
            fingerprint: computed,
            extras,
        })
    }
}

impl ScannerAdapter for NessusAdapter {
    fn name(&self) -> &'static str {
        "nessus"
    }

    fn display_name(&self) -> &'static str {
        "Nessus / Tenable"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &[".nessus", ".xml"]
    }

    fn mime_types(&self) -> &'static [&'static str] {
        &["application/xml", "text/xml"]
    }

    fn sniff(&self, content: &[u8]) -> bool {
        let head = String::from_utf8_lossy(&content[..content.len().min(1000)]).to_lowercase();
        head.contains("nessusclientdata") || head.contains("<nessusreport")
    }

    fn validate(&self, content: &[u8], _filename: &str) -> bool {
        let head = String::from_utf8_lossy(&content[..content.len().min(2000)]).to_string();
        if head.contains("NessusClientData") {
            return true;
        }
        if head.contains("<Report ") && head.contains("ReportHost") {
            return true;
        }
        head.to_lowercase().contains("nessus") && head.contains("<Policy")
    }

    fn parse(
        &self,
        content: &[u8],
        filename: &str,
        config: &ParserConfig,
    ) -> Result<ScanResult, ImportError> {
        let text = String::from_utf8_lossy(content);
        let doc: NessusFile =
            quick_xml::de::from_str(&text).map_err(|e| ImportError::Parse {
                scanner: self.name().to_string(),
                filename: filename.to_string(),
                message: format!("invalid XML: {e}"),
            })?;

        let mut result = ScanResult::new(self.name());
        self.extract_metadata(&doc, &mut result);

        let hosts: &[ReportHostXml] = doc
            .report
            .as_ref()
            .map(|r| r.hosts.as_slice())
            .unwrap_or(&[]);
        if hosts.is_empty() {
            result.warnings.push("No hosts found in scan file".to_string());
            return Ok(result);
        }
        result.total_hosts = hosts.len();
        tracing::info!(hosts = hosts.len(), file = %filename, "parsing Nessus report");

        for host in hosts {
            match self.convert_host(host, config) {
                Ok((asset, findings)) => {
                    result.extend_scan_window(asset.scan_start, asset.scan_end);
                    result.assets.push(asset);
                    for finding in findings {
                        result.push_finding(finding);
                    }
                }
                Err(message) => {
                    let host_name = non_empty(&host.name).unwrap_or_else(|| "unknown".to_string());
                    tracing::warn!(host = %host_name, error = %message, "skipping host");
                    result
                        .errors
                        .push(format!("Error parsing host '{host_name}': {message}"));
                }
            }
        }

        tracing::info!(
            findings = result.total_findings,
            hosts = result.total_hosts,
            errors = result.errors.len(),
            "parsed Nessus report"
        );
        Ok(result)
    }
}

/// Severity resolution: textual risk_factor first, then the numeric
/// attribute, else Info.
fn resolve_severity(risk_factor: Option<&str>, numeric: &str) -> Severity {
    if let Some(risk) = risk_factor {
        let lowered = risk.to_lowercase();
        for (label, severity) in RISK_FACTOR_SEVERITIES {
            if lowered == *label {
                return *severity;
            }
        }
    }
    for (label, severity) in NUMERIC_SEVERITIES {
        if numeric == *label {
            return *severity;
        }
    }
    Severity::Info
}

/// Detect an OS family from the OS name string; no match means no family.
fn detect_os_family(os_name: &str) -> Option<String> {
    static PATTERNS: OnceLock<Vec<(Regex, &'static str)>> = OnceLock::new();
    let patterns = PATTERNS.get_or_init(|| {
        OS_FAMILY_PATTERNS
            .iter()
            .map(|(pattern, family)| (Regex::new(pattern).expect("static pattern"), *family))
            .collect()
    });

    let lowered = os_name.to_lowercase();
    patterns
        .iter()
        .find(|(pattern, _)| pattern.is_match(&lowered))
        .map(|(_, family)| family.to_string())
}

/// Try each candidate format in order; unparsable values are absent, not fatal.
fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(trimmed, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_f32(value: Option<&str>) -> Option<f32> {
    value.and_then(|v| v.trim().parse::<f32>().ok())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Truncate on a char boundary, appending a marker when content was cut.
fn truncate_output(value: &str, max_len: usize) -> String {
    if value.len() <= max_len {
        return value.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &value[..end])
}
