//! Normalized data model shared by parsers, reconciliation, and stores.

pub mod asset;
pub mod finding;
pub mod pagination;
pub mod scan;
