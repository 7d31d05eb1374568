use alloc::string::String;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Timestamp used when no network time could be obtained
pub const UNSYNCED_TIMESTAMP: u64 = 0;

/// One environmental sample. Produced by the sample tick, consumed once by
/// the uploader.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Relative humidity percentage
    pub humidity: f32,
    /// Barometric pressure in hPa
    pub pressure: f32,
    /// Air temperature in Celsius
    pub temperature: f32,
    /// Rain gauge accumulation in mm
    pub precipitation: f32,
    /// Epoch seconds, [`UNSYNCED_TIMESTAMP`] until stamped
    pub timestamp: u64,
}

impl SensorReading {
    pub fn new(humidity: f32, pressure: f32, temperature: f32, precipitation: f32) -> Self {
        Self {
            humidity,
            pressure,
            temperature,
            precipitation,
            timestamp: UNSYNCED_TIMESTAMP,
        }
    }

    /// Copy of this reading carrying `timestamp`.
    pub fn stamped(&self, timestamp: u64) -> Self {
        Self { timestamp, ..*self }
    }

    pub fn is_stamped(&self) -> bool {
        self.timestamp != UNSYNCED_TIMESTAMP
    }

    pub fn recorded_at(&self) -> Option<OffsetDateTime> {
        if !self.is_stamped() {
            return None;
        }
        OffsetDateTime::from_unix_timestamp(self.timestamp as i64).ok()
    }

    /// Rejects values no working sensor can produce.
    pub fn is_plausible(&self) -> bool {
        let values = [
            self.humidity,
            self.pressure,
            self.temperature,
            self.precipitation,
        ];
        values.iter().all(|v| v.is_finite())
            && (0.0..=100.0).contains(&self.humidity)
            && (300.0..=1100.0).contains(&self.pressure)
            && (-60.0..=85.0).contains(&self.temperature)
            && self.precipitation >= 0.0
    }
}

/// Payload written to the remote store for one reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub timestamp: u64,
    pub humidity: f32,
    pub pressure: f32,
    #[serde(rename = "pluviometer")]
    pub precipitation: f32,
    pub temperature: f32,
}

impl TelemetryRecord {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<SensorReading> for TelemetryRecord {
    fn from(reading: SensorReading) -> Self {
        Self {
            timestamp: reading.timestamp,
            humidity: reading.humidity,
            pressure: reading.pressure,
            precipitation: reading.precipitation,
            temperature: reading.temperature,
        }
    }
}
