//! Relation Optimizer: iterative prompt optimization for related
//! prediction-market pairs.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry points.

pub mod config;
pub mod types;
pub mod platforms;
pub mod llm;
pub mod engine;
pub mod dataset;
pub mod storage;
pub mod logging;
