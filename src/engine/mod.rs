//! Core engine: template → run → evaluate → synthesize feedback → repeat.

pub mod template;
pub mod runner;
pub mod evaluator;
pub mod feedback;
pub mod optimizer;
