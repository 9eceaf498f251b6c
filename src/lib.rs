// src/lib.rs
// Main library module declarations

pub mod commands;
pub mod config;
pub mod domain;
pub mod exchange;
pub mod ledger;
pub mod recon;
