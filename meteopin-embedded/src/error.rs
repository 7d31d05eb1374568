use core::fmt;

use meteopin_api::{ConnectionMode, FieldGroup, ValidationError};

#[derive(Debug, Clone, PartialEq)]
pub enum Error {
    /// A required field group is not persisted
    ConfigMissing(FieldGroup),
    /// A persisted field group failed validation or could not be read
    ConfigCorrupt(FieldGroup),
    NetworkJoinFailure,
    /// Radio driver refused to host the access point
    RadioFailure,
    AuthFailure,
    TransientDeliveryFailure,
    PayloadRejected,
    /// Backing medium absent, unmounted or refusing writes
    StorageFailure,
    TimeUnavailable,
    SensorFailure,
    /// Mode exists only as a placeholder
    UnsupportedMode(ConnectionMode),
    InvalidSchedule(&'static str),
    Validation(ValidationError),
    InvalidSubmission(&'static str),
    GatewayClosed,
    QueueFull,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ConfigMissing(group) => write!(f, "Missing {} configuration", group),
            Error::ConfigCorrupt(group) => write!(f, "Corrupt {} configuration", group),
            Error::NetworkJoinFailure => write!(f, "Failed to join network"),
            Error::RadioFailure => write!(f, "Radio failure"),
            Error::AuthFailure => write!(f, "Remote authentication failed"),
            Error::TransientDeliveryFailure => write!(f, "Remote store unavailable"),
            Error::PayloadRejected => write!(f, "Payload rejected by remote store"),
            Error::StorageFailure => write!(f, "Storage failure"),
            Error::TimeUnavailable => write!(f, "Network time unavailable"),
            Error::SensorFailure => write!(f, "Sensor read failed"),
            Error::UnsupportedMode(mode) => write!(f, "{} mode is not implemented", mode),
            Error::InvalidSchedule(reason) => write!(f, "Invalid schedule: {}", reason),
            Error::Validation(e) => write!(f, "Validation error: {}", e),
            Error::InvalidSubmission(reason) => write!(f, "Invalid submission: {}", reason),
            Error::GatewayClosed => write!(f, "Reconfiguration gateway is not listening"),
            Error::QueueFull => write!(f, "Queue full"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Error::Validation(err)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
