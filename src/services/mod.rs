//! Pipeline services: identity, import orchestration, reconciliation,
//! diffing.

pub mod diff;
pub mod fingerprint;
pub mod import;
pub mod reconcile;
