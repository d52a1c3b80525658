//! Runtime Governor
//!
//! Decides the analysis mode for each admission from queue depth. Shedding
//! starts as soon as depth exceeds the soft limit; full mode only comes back
//! after depth has stayed at or below it for the whole cooldown.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::logic::types::AnalysisMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PressureState {
    Normal,
    Shedding,
    /// Depth is back under the soft limit since `since`
    Cooldown { since: Instant },
}

/// Serializable view of `PressureState`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureLevel {
    Normal,
    Shedding,
    Cooldown,
}

impl From<PressureState> for PressureLevel {
    fn from(state: PressureState) -> Self {
        match state {
            PressureState::Normal => PressureLevel::Normal,
            PressureState::Shedding => PressureLevel::Shedding,
            PressureState::Cooldown { .. } => PressureLevel::Cooldown,
        }
    }
}

#[derive(Debug)]
pub struct Governor {
    state: PressureState,
}

impl Default for Governor {
    fn default() -> Self {
        Self::new()
    }
}

impl Governor {
    pub fn new() -> Self {
        Self {
            state: PressureState::Normal,
        }
    }

    pub fn state(&self) -> PressureState {
        self.state
    }

    /// Feed the current queue depth
    pub fn observe(&mut self, depth: usize, soft_limit: usize, cooldown: Duration, now: Instant) -> PressureState {
        let over = depth > soft_limit;
        let next = match self.state {
            _ if over => PressureState::Shedding,
            PressureState::Normal => PressureState::Normal,
            PressureState::Shedding => PressureState::Cooldown { since: now },
            PressureState::Cooldown { since } if now.duration_since(since) >= cooldown => PressureState::Normal,
            cooling @ PressureState::Cooldown { .. } => cooling,
        };

        match (self.state, next) {
            (PressureState::Normal, PressureState::Shedding) => {
                log::info!("Queue depth {} over soft limit {}, entering fast mode", depth, soft_limit);
            }
            (PressureState::Cooldown { .. }, PressureState::Normal) => {
                log::info!("Pressure cooldown elapsed, leaving fast mode");
            }
            _ => {}
        }

        self.state = next;
        next
    }

    /// Mode for an item admitted at `depth`
    pub fn admit(&mut self, depth: usize, soft_limit: usize, cooldown: Duration, now: Instant) -> AnalysisMode {
        match self.observe(depth, soft_limit, cooldown, now) {
            PressureState::Normal => AnalysisMode::Full,
            PressureState::Shedding | PressureState::Cooldown { .. } => AnalysisMode::Fast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SOFT: usize = 4;
    const COOLDOWN: Duration = Duration::from_millis(500);

    #[test]
    fn test_full_mode_under_soft_limit() {
        let mut gov = Governor::new();
        let now = Instant::now();
        assert_eq!(gov.admit(0, SOFT, COOLDOWN, now), AnalysisMode::Full);
        // at the limit is not over it
        assert_eq!(gov.admit(SOFT, SOFT, COOLDOWN, now), AnalysisMode::Full);
    }

    #[test]
    fn test_sheds_over_soft_limit() {
        let mut gov = Governor::new();
        let now = Instant::now();
        assert_eq!(gov.admit(SOFT + 1, SOFT, COOLDOWN, now), AnalysisMode::Fast);
        assert_eq!(gov.state(), PressureState::Shedding);
    }

    #[test]
    fn test_cooldown_before_full_mode_returns() {
        let mut gov = Governor::new();
        let t0 = Instant::now();
        gov.admit(SOFT + 3, SOFT, COOLDOWN, t0);

        // pressure gone, still fast while cooling down
        let t1 = t0 + Duration::from_millis(10);
        assert_eq!(gov.admit(0, SOFT, COOLDOWN, t1), AnalysisMode::Fast);
        assert_eq!(PressureLevel::from(gov.state()), PressureLevel::Cooldown);

        let t2 = t1 + Duration::from_millis(100);
        assert_eq!(gov.admit(1, SOFT, COOLDOWN, t2), AnalysisMode::Fast);

        let t3 = t1 + COOLDOWN;
        assert_eq!(gov.admit(1, SOFT, COOLDOWN, t3), AnalysisMode::Full);
        assert_eq!(gov.state(), PressureState::Normal);
    }

    #[test]
    fn test_new_pressure_during_cooldown_restarts_it() {
        let mut gov = Governor::new();
        let t0 = Instant::now();
        gov.admit(SOFT + 1, SOFT, COOLDOWN, t0);
        gov.observe(0, SOFT, COOLDOWN, t0 + Duration::from_millis(100));

        gov.admit(SOFT + 1, SOFT, COOLDOWN, t0 + Duration::from_millis(400));
        assert_eq!(gov.state(), PressureState::Shedding);

        let t1 = t0 + Duration::from_millis(700);
        gov.observe(0, SOFT, COOLDOWN, t1);
        assert_eq!(gov.admit(0, SOFT, COOLDOWN, t1 + Duration::from_millis(200)), AnalysisMode::Fast);
    }
}
