// src/domain/mod.rs
// Domain models and error types

pub mod errors;
pub mod models;
