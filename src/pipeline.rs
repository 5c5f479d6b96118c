// src/pipeline.rs
pub mod aggregator;
pub mod config;
pub mod state;
pub mod stream;
