use std::collections::HashSet;
use std::env;
use std::path::PathBuf;

use crate::models::finding::Severity;
use crate::parsers::ParserConfig;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Postgres connection string; absent when running store-less (CLI).
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    /// Root directory for the filesystem blob store.
    pub storage_root: PathBuf,
    /// Finding count above which reconciliation switches to batched commits.
    pub batch_threshold: usize,
    /// Findings per batch once batching kicks in.
    pub batch_size: usize,
    /// Minimum severity a parsed finding must have to be kept.
    pub min_severity: Severity,
    /// Scanner check ids dropped as noise before normalization.
    pub noise_checks: HashSet<String>,
    /// Cap on retained verbose scanner output, in bytes.
    pub max_output_len: usize,
    /// Cap on raw output stored per occurrence row, in bytes. Occurrence
    /// rows accumulate one per finding per import, so they carry a
    /// tighter cap than the per-finding output.
    pub occurrence_output_cap: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").ok(),
            database_max_connections: parse_env("DATABASE_MAX_CONNECTIONS", 10),
            storage_root: env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("scan-artifacts")),
            batch_threshold: parse_env("RECONCILE_BATCH_THRESHOLD", 1000),
            batch_size: parse_env("RECONCILE_BATCH_SIZE", 100).max(1),
            min_severity: env::var("MIN_SEVERITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(Severity::Info),
            noise_checks: env::var("NOISE_CHECK_IDS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| ParserConfig::default().noise_checks),
            max_output_len: parse_env("MAX_PLUGIN_OUTPUT_LEN", 10_000),
            occurrence_output_cap: parse_env("OCCURRENCE_OUTPUT_LEN", 5_000),
        }
    }

    /// Parser-facing slice of the configuration surface.
    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            min_severity: self.min_severity,
            noise_checks: self.noise_checks.clone(),
            max_output_len: self.max_output_len,
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
