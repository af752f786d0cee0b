//! frm-daemon library target.
//!
//! Exposes the engine, CLI resolution, router and state for integration
//! tests. The binary `main.rs` depends on this library target.

pub mod api_types;
pub mod cli;
pub mod engine;
pub mod routes;
pub mod state;
