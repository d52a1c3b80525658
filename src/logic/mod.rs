//! Logic Module - Analysis Engines
//!
//! Decoder -> Heuristic -> CNN -> Decision -> Moderation, with the scheduler
//! wrapping everything up to the decision as one unit of work.

// Pipeline stages
pub mod decoder;
pub mod skin;
pub mod model;
pub mod decision;
pub mod analyzer;
pub mod moderation;

// Runtime
pub mod scheduler;
pub mod config;

// Shared
pub mod error;
pub mod types;

pub use analyzer::{Analyzer, ImageAnalyzer, InferenceFailure};
pub use error::{AnalyzerError, AnalyzerResult};
pub use types::{AnalysisMode, AnalysisResult};
