//! End-to-end tests for the optimization loop against scripted
//! collaborators. No network access.

mod mock_llm;
mod mock_source;
mod optimizer_flow;
