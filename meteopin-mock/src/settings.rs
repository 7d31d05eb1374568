use std::error::Error;
use std::path::PathBuf;
use std::{env, io};

use meteopin_embedded::scheduler::SchedulePlan;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Logger {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Station {
    pub model: String,
    pub token: String,
    pub location: String,
    pub storage_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Simulation {
    pub time_scale: u64,
    pub duration_secs: u64,
    pub join_failures: u32,
    pub auth_failures: u32,
    pub outage_probability: f64,
    pub reject_probability: f64,
    pub sensor_failure_probability: f64,
    pub free_heap_bytes: usize,
}

/// Values the simulated operator types into the reconfiguration form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operator {
    pub station_identity: String,
    pub station_secret: String,
    pub station_address: String,
    pub gateway: String,
    pub mask: String,
    pub operator_identity: String,
    pub operator_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub logger: Logger,
    pub station: Station,
    pub schedule: SchedulePlan,
    pub simulation: Simulation,
    pub operator: Operator,
}

impl Settings {
    pub fn new() -> Result<Self, Box<dyn Error>> {
        let mut settings: Settings = toml::from_str(include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/../",
            "configs/default.toml"
        )))?;

        settings.station.storage_dir = Self::normalize_path(&settings.station.storage_dir)?
            .to_string_lossy()
            .to_string();
        settings.schedule.validate()?;

        Ok(settings)
    }

    fn normalize_path(path: &str) -> io::Result<PathBuf> {
        let path_buf = PathBuf::from(path);

        Ok(if path_buf.is_absolute() {
            path_buf
        } else {
            env::current_dir()?.join(path_buf)
        })
    }
}
