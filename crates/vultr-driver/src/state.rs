use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::ServerStatus;

/// Canonical machine state reported to the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MachineState {
    /// Any provider status combination not recognised below.
    None,
    Starting,
    Running,
    Stopped,
    /// The provider could not be queried.
    Error,
}

impl MachineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Starting => "Starting",
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Error => "Error",
        }
    }
}

impl fmt::Display for MachineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Map raw provider status fields to a [`MachineState`].
///
/// `status` decides first; only an `active` server is inspected further.
/// Unknown values never fail, they map to [`MachineState::None`].
pub fn translate(status: &str, server_state: &str, power_status: &str) -> MachineState {
    match status {
        "pending" => MachineState::Starting,
        "active" => match server_state {
            "ok" => match power_status {
                "running" => MachineState::Running,
                "stopped" => MachineState::Stopped,
                _ => MachineState::None,
            },
            _ => MachineState::Starting,
        },
        _ => MachineState::None,
    }
}

impl From<&ServerStatus> for MachineState {
    fn from(s: &ServerStatus) -> Self {
        translate(&s.status, &s.server_state, &s.power_status)
    }
}
