use core::fmt;

use serde::{Deserialize, Serialize};

/// Connectivity mode of the station. Exactly one is active at a time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConnectionMode {
    /// Device hosts its own network and waits for operator configuration
    #[default]
    AccessPoint,
    /// Device joined an existing network and streams telemetry
    Station,
    /// Placeholder, no transport behind it
    Bluetooth,
    /// Placeholder, no transport behind it
    Sms,
}

impl ConnectionMode {
    /// Whether the firmware can actually bring this mode up.
    pub fn is_implemented(&self) -> bool {
        matches!(self, ConnectionMode::AccessPoint | ConnectionMode::Station)
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionMode::AccessPoint => write!(f, "AccessPoint"),
            ConnectionMode::Station => write!(f, "Station"),
            ConnectionMode::Bluetooth => write!(f, "Bluetooth"),
            ConnectionMode::Sms => write!(f, "SMS"),
        }
    }
}
