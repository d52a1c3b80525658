//! API Module
//!
//! Surface consumed by the upload pipeline, the asset store and the admin
//! settings page.
//!
//! Structure:
//! - commands.rs: engine lifecycle + commands
//! - engine_status.rs: dashboard status payload

pub mod commands;
pub mod engine_status;

pub use commands::*;
pub use engine_status::EngineStatus;
