//! Degraded-mode behaviour when a backing store is unreachable

use serde::{Deserialize, Serialize};

/// What the gateway does when a store call fails or times out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Skip the check and admit, flagging the request
    FailOpen,
    /// Surface the failure to the caller
    FailClosed,
}

impl FailureMode {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::FailOpen)
    }
}

impl std::fmt::Display for FailureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FailOpen => write!(f, "fail_open"),
            Self::FailClosed => write!(f, "fail_closed"),
        }
    }
}
