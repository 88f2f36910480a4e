//! Dialog lifecycle states.

use serde::{Deserialize, Serialize};

/// Where a dialog sits in its lifecycle (RFC 3261 Section 12).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogState {
    /// Created locally, no response seen yet.
    Initial,
    /// Established by a provisional response carrying a To tag.
    Early,
    /// Established by a 2xx.
    Confirmed,
    /// Torn down; kept only until deregistered.
    Terminated,
}

impl DialogState {
    pub fn is_active(&self) -> bool {
        matches!(self, DialogState::Early | DialogState::Confirmed)
    }
}
