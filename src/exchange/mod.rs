// src/exchange/mod.rs
// Exchange gateway trait, payload normalization, and the paper gateway

pub mod gateway;
pub mod normalize;
pub mod paper;
