use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::timeline::TimelineError;

/// Session lifecycle.
///
/// `Created → Running ↔ Paused → Finished`, with `Errored` as a distinct
/// terminal state for internal invariant breaches. Both terminal states
/// accept no further mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Created,
    Running,
    Paused,
    Finished,
    Errored,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Finished => "finished",
            Self::Errored => "errored",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Errored)
    }
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Session-level errors
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("session not started")]
    NotStarted,

    #[error(transparent)]
    Timeline(#[from] TimelineError),
}
