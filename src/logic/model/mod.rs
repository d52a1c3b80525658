//! Model Module - CNN Fusion
//!
//! Region classifier, fusion rules and the thresholds everything decides on.

pub mod fusion;
pub mod inference;
pub mod threshold;

// Re-export common types
pub use inference::{CnnSettings, ModelStatus, OnnxClassifier, RegionClassifier, SessionGate};
pub use threshold::ModerationThresholds;
