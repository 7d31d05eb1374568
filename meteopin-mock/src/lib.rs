use std::sync::Arc;
use std::time::Duration;

use meteopin_api::{ConnectionMode, DeviceIdentity};
use meteopin_embedded::WeatherStation;
use meteopin_embedded::clock::TimeSource;
use meteopin_embedded::network::ModeController;
use meteopin_embedded::scheduler::Scheduler;
use meteopin_embedded::storage::ConfigStore;
use meteopin_embedded::telemetry::TelemetryUploader;
use time::OffsetDateTime;

use crate::clock::SimulatedClock;
use crate::settings::{Operator, Settings};
use crate::simulate::{FixedMonitor, SimulatedNtp, SimulatedRemote, SimulatedSensor, SimulatedWifi};
use crate::storage::FileStorage;

pub mod clock;
pub mod settings;
pub mod simulate;
pub mod storage;

/// How often the simulated operator checks the reconfiguration page
const OPERATOR_VISIT_MS: u64 = 5_000;

pub type SimulatedStation = WeatherStation<
    FileStorage,
    SimulatedWifi,
    SimulatedRemote,
    SimulatedNtp,
    SimulatedSensor,
    FixedMonitor,
>;

pub async fn build_station(settings: &Settings, clock: &SimulatedClock) -> Option<SimulatedStation> {
    let sim = &settings.simulation;

    let scheduler = match Scheduler::new(settings.schedule, clock.now_ms()) {
        Ok(scheduler) => scheduler,
        Err(e) => {
            tracing::error!("Invalid schedule: {}", e);
            return None;
        }
    };

    let store = ConfigStore::mount(FileStorage::open(&settings.station.storage_dir)).await;
    let controller = ModeController::new(
        SimulatedWifi::new(sim.join_failures),
        SimulatedRemote::new(
            sim.auth_failures,
            sim.outage_probability,
            sim.reject_probability,
        ),
    );
    let identity = DeviceIdentity::new(
        &settings.station.model,
        &settings.station.token,
        &settings.station.location,
    );
    let uploader = TelemetryUploader::new(
        identity,
        TimeSource::new(SimulatedNtp::new(clock.clone(), OffsetDateTime::now_utc())),
    );

    Some(WeatherStation::new(
        store,
        controller,
        uploader,
        SimulatedSensor::new(clock.clone(), sim.sensor_failure_probability),
        FixedMonitor {
            free_heap_bytes: sim.free_heap_bytes,
        },
        scheduler,
    ))
}

pub async fn run(settings: &Arc<Settings>) {
    let clock = SimulatedClock::new();
    let Some(mut station) = build_station(settings, &clock).await else {
        return;
    };

    if let Err(e) = station.boot().await {
        tracing::error!("Boot failed: {}", e);
    }

    let scale = settings.simulation.time_scale.max(1);
    let end_ms = settings.simulation.duration_secs * 1_000;
    let mut operator = OperatorScript::new(settings.operator.clone());
    let mut now_ms = clock.now_ms();

    loop {
        station.service(now_ms).await;
        operator.visit(&mut station, now_ms).await;

        let next = station.scheduler().next_deadline().max(now_ms + 1);
        if end_ms > 0 && next > end_ms {
            break;
        }

        tokio::time::sleep(Duration::from_millis((next - now_ms) / scale)).await;
        now_ms = next;
        clock.advance_to(now_ms);
    }

    report(&station).await;
}

async fn report(station: &SimulatedStation) {
    let status = station.status().await;
    match serde_json::to_string_pretty(&status) {
        Ok(json) => tracing::info!("Final status: {}", json),
        Err(e) => tracing::warn!("Failed to encode status: {}", e),
    }

    tracing::info!(
        "Upload stats: {:?}, {} records stored remotely",
        station.uploader().stats(),
        station.controller().remote().records().len()
    );
    for activity in meteopin_embedded::scheduler::Activity::ALL {
        let missed = station.scheduler().missed(activity);
        if missed > 0 {
            tracing::warn!("{:?} missed {} slots", activity, missed);
        }
    }
}

/// Plays the operator: fills in whatever the device is missing through the
/// reconfiguration form, and resubmits the station form when the device asks
/// for reconfiguration.
struct OperatorScript {
    form: Operator,
    next_visit_ms: u64,
}

impl OperatorScript {
    fn new(form: Operator) -> Self {
        Self {
            form,
            next_visit_ms: 0,
        }
    }

    async fn visit(&mut self, station: &mut SimulatedStation, now_ms: u64) {
        if now_ms < self.next_visit_ms || !station.gateway_mut().is_listening() {
            return;
        }
        self.next_visit_ms = now_ms + OPERATOR_VISIT_MS;

        let status = station.status().await;
        if status.mode == ConnectionMode::Station && !status.reconfiguration_required {
            return;
        }

        let form = &self.form;
        let fields: Vec<(&str, &str)> = if status.field("station-identity").is_none() {
            vec![
                ("station-identity", form.station_identity.as_str()),
                ("station-secret", form.station_secret.as_str()),
                ("station-address", form.station_address.as_str()),
                ("gateway", form.gateway.as_str()),
                ("mask", form.mask.as_str()),
            ]
        } else if status.field("operator-identity").is_none() {
            vec![
                ("operator-identity", form.operator_identity.as_str()),
                ("operator-secret", form.operator_secret.as_str()),
            ]
        } else if status.reconfiguration_required {
            vec![
                ("station-identity", form.station_identity.as_str()),
                ("station-secret", form.station_secret.as_str()),
                ("station-address", form.station_address.as_str()),
                ("gateway", form.gateway.as_str()),
                ("mask", form.mask.as_str()),
            ]
        } else {
            return;
        };

        match station.gateway_mut().submit_form(fields) {
            Ok(()) => tracing::info!("Operator submitted the reconfiguration form"),
            Err(e) => tracing::warn!("Reconfiguration form rejected: {}", e),
        }
    }
}
