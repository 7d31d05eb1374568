//! Boundaries to the sensor drivers and the platform.

use core::fmt::Debug;

use meteopin_api::SensorReading;

/// Acquires one combined sample from the environmental sensors.
#[allow(async_fn_in_trait)]
pub trait SensorSource {
    type Error: Debug;

    /// Returned readings are unstamped, the uploader assigns the timestamp.
    async fn read(&mut self) -> Result<SensorReading, Self::Error>;
}

pub trait SystemMonitor {
    fn free_heap_bytes(&self) -> usize;
}
