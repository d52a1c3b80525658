//! Work-item state machine
//!
//! queued -> running -> completed
//!                   -> retrying -> running ...
//!                   -> failed (terminal)
//! queued | retrying -> cancelled

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    /// Admitted, waiting for a worker
    Queued,
    /// An attempt is executing
    Running,
    /// Last attempt failed with a retryable error; backing off
    Retrying,
    Completed,
    /// Terminal failure, surfaced to the caller
    Failed,
    Cancelled,
}

impl WorkState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for WorkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Queued => write!(f, "queued"),
            Self::Running => write!(f, "running"),
            Self::Retrying => write!(f, "retrying"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkEvent {
    Start,
    Succeed,
    Fail { retryable: bool },
    Cancel,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition from {from} on {event:?}")]
pub struct TransitionError {
    pub from: WorkState,
    pub event: WorkEvent,
}

/// State plus attempt bookkeeping for one work item
#[derive(Debug, Clone)]
pub struct WorkLifecycle {
    state: WorkState,
    attempts: u32,
    max_retries: u32,
}

impl WorkLifecycle {
    pub fn new(max_retries: u32) -> Self {
        Self {
            state: WorkState::Queued,
            attempts: 0,
            max_retries,
        }
    }

    pub fn state(&self) -> WorkState {
        self.state
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retries already granted
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn apply(&mut self, event: WorkEvent) -> Result<WorkState, TransitionError> {
        use WorkEvent::*;
        use WorkState::*;

        let next = match (self.state, event) {
            (Queued | Retrying, Start) => {
                self.attempts += 1;
                Running
            }
            (Running, Succeed) => Completed,
            (Running, Fail { retryable: true }) if self.retries() < self.max_retries => Retrying,
            (Running, Fail { .. }) => Failed,
            (Queued | Retrying, Cancel) => Cancelled,
            (from, event) => return Err(TransitionError { from, event }),
        };
        self.state = next;
        Ok(next)
    }
}
