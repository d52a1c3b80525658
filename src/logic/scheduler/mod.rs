//! Scheduler / Runtime Governor
//!
//! - `state`    - per work-item state machine
//! - `governor` - pressure tracking, fast-mode downgrade with cooldown
//! - `pool`     - worker pool, bounded queue, retries, cancellation, batches
//! - `metrics`  - counters exposed to the operations dashboard

pub mod governor;
pub mod metrics;
pub mod pool;
pub mod state;


pub use governor::{Governor, PressureLevel, PressureState};
pub use metrics::MetricsSnapshot;
pub use pool::{Scheduler, WorkHandle};
pub use state::{WorkEvent, WorkLifecycle, WorkState};
