//! Sentiment aggregation and risk escalation for clinical intake responses.
//!
//! Per-response classifications are reduced into an [`models::AggregateReport`]
//! either from a live batch ([`aggregate::aggregate`]) or from persisted rows
//! ([`reconcile::Reconciler`]); both paths share the same reduction.

pub mod aggregate;
pub mod db;
pub mod error;
pub mod labels;
pub mod models;
pub mod reconcile;
pub mod report;
pub mod risk;
