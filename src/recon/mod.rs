// src/recon/mod.rs
// The reconciliation engine: policy predicates, the per-account pass
// pipeline, and the orchestrator that drives it across accounts.

pub mod enforce;
pub mod lifecycle;
pub mod orchestrator;
pub mod policy;
pub mod sltp;
pub mod snapshot;
pub mod unit;
