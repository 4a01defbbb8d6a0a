//! Scan ingest and reconciliation engine.
//!
//! Takes raw vulnerability scanner exports, normalizes them into a
//! scanner-agnostic model, fingerprints each finding with a stable
//! identity, and reconciles successive scans so findings accumulate
//! history instead of duplicating: re-observed findings are touched,
//! closed ones reopen on re-detection, and imports can be diffed against
//! their predecessor.

pub mod config;
pub mod errors;
pub mod models;
pub mod parsers;
pub mod services;
pub mod store;
