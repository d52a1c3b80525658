//! Image Risk Core
//!
//! Offline image content risk analysis: skin/garment heuristics, optional CNN
//! fusion, threshold decisions, moderation fusion with text signals, and a
//! load-shedding scheduler around it all.

pub mod api;
pub mod constants;
pub mod logic;
