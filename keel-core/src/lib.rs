//! Keel Core
//!
//! Configuration model and resource reconciliation for a declarative
//! deployment tool: what the user declares, what the remote side has
//! deployed, and how the two are merged.

pub mod config;
pub mod export;
pub mod reconcile;
pub mod resource;
