use std::collections::BTreeMap;
use std::convert::Infallible;
use std::f64::consts::PI;
use std::net::Ipv4Addr;

use meteopin_api::{
    OperatorAccount, SensorReading, StaticAddressing, StationCredentials, TelemetryRecord,
};
use meteopin_embedded::clock::NtpClient;
use meteopin_embedded::network::WifiController;
use meteopin_embedded::sensor::{SensorSource, SystemMonitor};
use meteopin_embedded::telemetry::{AuthHandle, RemoteError, RemoteStore};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;
use time::OffsetDateTime;

use crate::clock::SimulatedClock;

const MS_PER_DAY: f64 = 86_400_000.0;

pub fn day_fraction(now_ms: u64) -> f64 {
    (now_ms as f64 % MS_PER_DAY) / MS_PER_DAY
}

/// Coolest just before sunrise, warmest mid-afternoon.
pub fn simulated_temperature(day_fraction: f64) -> f64 {
    let radians = (day_fraction - 0.375) * 2.0 * PI;
    24.0 + radians.sin() * 7.0
}

pub fn simulated_humidity(day_fraction: f64) -> f64 {
    let radians = day_fraction * 2.0 * PI;

    if (0.3..=0.7).contains(&day_fraction) {
        ((radians.sin().max(0.0) * 15.0) + 55.0).round()
    } else {
        ((radians.cos().max(0.0) * 25.0) + 65.0).round()
    }
}

#[derive(Debug, Error)]
pub enum SimulationError {
    #[error("sensor bus timeout")]
    SensorBus,
    #[error("join refused by {0}")]
    JoinRefused(String),
    #[error("radio busy")]
    RadioBusy,
}

/// Weather sensors following a daily cycle with noise. Rain arrives in
/// showers and accumulates in the gauge.
pub struct SimulatedSensor {
    clock: SimulatedClock,
    failure_probability: f64,
    gauge_mm: f64,
    raining: bool,
}

impl SimulatedSensor {
    pub fn new(clock: SimulatedClock, failure_probability: f64) -> Self {
        Self {
            clock,
            failure_probability,
            gauge_mm: 0.0,
            raining: false,
        }
    }
}

impl SensorSource for SimulatedSensor {
    type Error = SimulationError;

    async fn read(&mut self) -> Result<SensorReading, Self::Error> {
        let mut rng = rand::rng();
        if rng.random_bool(self.failure_probability) {
            return Err(SimulationError::SensorBus);
        }

        let fraction = day_fraction(self.clock.now_ms());
        let noise = Normal::new(0.0, 0.3).map_err(|_| SimulationError::SensorBus)?;

        if rng.random_bool(if self.raining { 0.05 } else { 0.01 }) {
            self.raining = !self.raining;
        }
        if self.raining {
            self.gauge_mm += rng.random_range(0.0..0.4);
        }

        let humidity = if self.raining {
            95.0
        } else {
            simulated_humidity(fraction)
        };

        Ok(SensorReading::new(
            (humidity + noise.sample(&mut rng)).clamp(0.0, 100.0) as f32,
            (1013.25 + rng.random_range(-3.0..3.0)) as f32,
            (simulated_temperature(fraction) + noise.sample(&mut rng)) as f32,
            self.gauge_mm as f32,
        ))
    }
}

/// Radio that refuses the first `join_failures` joins.
#[derive(Debug, Default)]
pub struct SimulatedWifi {
    join_failures: u32,
    hosted: Option<String>,
    joined: Option<String>,
}

impl SimulatedWifi {
    pub fn new(join_failures: u32) -> Self {
        Self {
            join_failures,
            ..Self::default()
        }
    }
}

impl WifiController for SimulatedWifi {
    type Error = SimulationError;

    async fn start_ap(
        &mut self,
        ssid: &str,
        _password: &str,
        address: Ipv4Addr,
    ) -> Result<(), Self::Error> {
        if self.hosted.is_some() {
            return Err(SimulationError::RadioBusy);
        }
        tracing::info!("Hosting {} at {}", ssid, address);
        self.hosted = Some(ssid.to_string());
        Ok(())
    }

    async fn stop_ap(&mut self) -> Result<(), Self::Error> {
        if let Some(ssid) = self.hosted.take() {
            tracing::info!("Stopped hosting {}", ssid);
        }
        Ok(())
    }

    async fn connect_station(
        &mut self,
        credentials: &StationCredentials,
        addressing: Option<StaticAddressing>,
    ) -> Result<(), Self::Error> {
        if self.join_failures > 0 {
            self.join_failures -= 1;
            return Err(SimulationError::JoinRefused(credentials.identity.clone()));
        }

        match addressing {
            Some(static_addr) => tracing::info!(
                "Joined {} as {}/{}",
                credentials.identity,
                static_addr.address,
                static_addr.mask
            ),
            None => tracing::info!("Joined {} using DHCP", credentials.identity),
        }
        self.joined = Some(credentials.identity.clone());
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), Self::Error> {
        self.joined = None;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.joined.is_some()
    }
}

/// In-memory remote store with random outages and rejections.
#[derive(Debug, Default)]
pub struct SimulatedRemote {
    auth_failures: u32,
    outage_probability: f64,
    reject_probability: f64,
    sessions: u32,
    records: BTreeMap<String, TelemetryRecord>,
}

impl SimulatedRemote {
    pub fn new(auth_failures: u32, outage_probability: f64, reject_probability: f64) -> Self {
        Self {
            auth_failures,
            outage_probability,
            reject_probability,
            ..Self::default()
        }
    }

    pub fn records(&self) -> &BTreeMap<String, TelemetryRecord> {
        &self.records
    }
}

impl RemoteStore for SimulatedRemote {
    async fn sign_in(&mut self, account: &OperatorAccount) -> Result<AuthHandle, RemoteError> {
        if self.auth_failures > 0 {
            self.auth_failures -= 1;
            return Err(RemoteError::Unavailable);
        }

        self.sessions += 1;
        Ok(AuthHandle {
            user_id: format!("{}#{}", account.identity, self.sessions),
            token: format!("token-{}", self.sessions),
        })
    }

    async fn push(
        &mut self,
        auth: &AuthHandle,
        path: &str,
        record: &TelemetryRecord,
    ) -> Result<(), RemoteError> {
        if auth.token != format!("token-{}", self.sessions) {
            return Err(RemoteError::AuthExpired);
        }

        let mut rng = rand::rng();
        if rng.random_bool(self.outage_probability) {
            return Err(RemoteError::Unavailable);
        }
        if rng.random_bool(self.reject_probability) {
            return Err(RemoteError::Rejected);
        }

        let json = record.to_json().map_err(|_| RemoteError::Rejected)?;
        tracing::debug!("{} <- {}", path, json);
        self.records.insert(path.to_string(), *record);
        Ok(())
    }

    async fn sign_out(&mut self, auth: &AuthHandle) {
        tracing::debug!("Signed out {}", auth.user_id);
    }
}

/// Network time derived from the simulated clock.
pub struct SimulatedNtp {
    clock: SimulatedClock,
    epoch: OffsetDateTime,
}

impl SimulatedNtp {
    pub fn new(clock: SimulatedClock, epoch: OffsetDateTime) -> Self {
        Self { clock, epoch }
    }
}

impl NtpClient for SimulatedNtp {
    type Error = Infallible;

    async fn query(&mut self, _server: &str) -> Result<OffsetDateTime, Self::Error> {
        let elapsed = time::Duration::milliseconds(self.clock.now_ms() as i64);
        Ok(self.epoch + elapsed)
    }
}

pub struct FixedMonitor {
    pub free_heap_bytes: usize,
}

impl SystemMonitor for FixedMonitor {
    fn free_heap_bytes(&self) -> usize {
        self.free_heap_bytes
    }
}
