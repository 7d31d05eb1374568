use embassy_time::{Duration, with_timeout};
use meteopin_api::{ConnectionMode, SensorReading};

use crate::clock::NtpClient;
use crate::config::MIN_FREE_HEAP_BYTES;
use crate::error::{Error, Result};
use crate::gateway::{ConfigStatus, ReconfigurationGateway, Submission};
use crate::network::{FallbackReason, ModeController, TransitionRequest, WifiController};
use crate::scheduler::{Activity, Scheduler};
use crate::sensor::{SensorSource, SystemMonitor};
use crate::storage::{ConfigStore, LocalStorage};
use crate::telemetry::{RemoteStore, TelemetryUploader, UploadOutcome};

/// The whole device: owns every piece of mutable state and runs the
/// scheduled activities against it.
///
/// The buffered reading has one producer (sample) and one consumer (send).
/// A new sample overwrites an unsent one.
pub struct WeatherStation<S, W, R, C, P, M>
where
    S: LocalStorage,
    W: WifiController,
    R: RemoteStore,
    C: NtpClient,
    P: SensorSource,
    M: SystemMonitor,
{
    store: ConfigStore<S>,
    controller: ModeController<W, R>,
    gateway: ReconfigurationGateway,
    uploader: TelemetryUploader<C>,
    sensor: P,
    monitor: M,
    scheduler: Scheduler,
    latest: Option<SensorReading>,
    min_free_heap: usize,
}

impl<S, W, R, C, P, M> WeatherStation<S, W, R, C, P, M>
where
    S: LocalStorage,
    W: WifiController,
    R: RemoteStore,
    C: NtpClient,
    P: SensorSource,
    M: SystemMonitor,
{
    pub fn new(
        store: ConfigStore<S>,
        controller: ModeController<W, R>,
        uploader: TelemetryUploader<C>,
        sensor: P,
        monitor: M,
        scheduler: Scheduler,
    ) -> Self {
        Self {
            store,
            controller,
            gateway: ReconfigurationGateway::new(),
            uploader,
            sensor,
            monitor,
            scheduler,
            latest: None,
            min_free_heap: MIN_FREE_HEAP_BYTES,
        }
    }

    pub fn with_min_free_heap(mut self, bytes: usize) -> Self {
        self.min_free_heap = bytes;
        self
    }

    pub fn store(&self) -> &ConfigStore<S> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ConfigStore<S> {
        &mut self.store
    }

    pub fn controller(&self) -> &ModeController<W, R> {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut ModeController<W, R> {
        &mut self.controller
    }

    /// Entry point for the form handler.
    pub fn gateway_mut(&mut self) -> &mut ReconfigurationGateway {
        &mut self.gateway
    }

    pub fn uploader(&self) -> &TelemetryUploader<C> {
        &self.uploader
    }

    pub fn sensor_mut(&mut self) -> &mut P {
        &mut self.sensor
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn mode(&self) -> ConnectionMode {
        self.controller.mode()
    }

    /// Reading waiting for the next send, if any.
    pub fn latest(&self) -> Option<&SensorReading> {
        self.latest.as_ref()
    }

    pub async fn boot(&mut self) -> Result<()> {
        log::info!("Booting station {}", self.uploader.identity().parent_path());
        self.controller.boot(&mut self.store).await
    }

    pub async fn status(&self) -> ConfigStatus {
        ConfigStatus::collect(
            &self.store,
            self.controller.mode(),
            self.controller.reconfiguration_required(),
        )
        .await
    }

    /// Runs every activity due at `now_ms`. Failures are logged and
    /// absorbed; recovery is the mode controller's business.
    pub async fn service(&mut self, now_ms: u64) {
        for activity in self.scheduler.due(now_ms) {
            let result = match activity {
                Activity::Control => self.control(now_ms).await,
                Activity::Reconfigure => self.reconfigure().await,
                Activity::Housekeeping => self.housekeeping().await,
                Activity::Sample => self.sample().await,
                Activity::Send => self.send(now_ms).await,
            };

            if let Err(e) = result {
                log::warn!("{:?} activity failed: {}", activity, e);
            }
        }
    }

    async fn control(&mut self, now_ms: u64) -> Result<()> {
        let result = self.controller.tick(now_ms, &mut self.store).await;
        self.gateway.set_listening(self.controller.is_network_up());
        result
    }

    async fn sample(&mut self) -> Result<()> {
        let budget = Duration::from_millis(self.scheduler.plan().sample_interval_ms);

        let reading = match with_timeout(budget, self.sensor.read()).await {
            Ok(Ok(reading)) => reading,
            Ok(Err(e)) => {
                log::warn!("Sensor read failed: {:?}", e);
                return Err(Error::SensorFailure);
            }
            Err(_) => {
                log::warn!("Sensor read timed out");
                return Err(Error::SensorFailure);
            }
        };

        if !reading.is_plausible() {
            log::warn!("Discarding implausible reading {:?}", reading);
            return Err(Error::SensorFailure);
        }

        if self.latest.replace(reading).is_some() {
            log::debug!("Replaced unsent reading");
        }
        Ok(())
    }

    async fn send(&mut self, now_ms: u64) -> Result<()> {
        if self.controller.mode() != ConnectionMode::Station {
            return Ok(());
        }
        let Some(reading) = self.latest else {
            log::debug!("Nothing to send");
            return Ok(());
        };
        let Some((session, remote)) = self.controller.upload_context() else {
            return Ok(());
        };
        if !session.ready(now_ms) {
            log::debug!("Upload backing off, keeping reading");
            return Ok(());
        }

        match self.uploader.upload(&reading, session, remote, now_ms).await {
            UploadOutcome::Delivered => {
                self.latest = None;
                Ok(())
            }
            UploadOutcome::Rejected => {
                self.latest = None;
                Err(Error::PayloadRejected)
            }
            UploadOutcome::AuthExpired => Ok(()),
            UploadOutcome::TransientFailure => Err(Error::TransientDeliveryFailure),
        }
    }

    async fn reconfigure(&mut self) -> Result<()> {
        let Some(submission) = self.gateway.take_pending() else {
            return Ok(());
        };

        if let Some(group) = submission.group() {
            if let Err(e) = self.store.write_group(group, &submission.values()).await {
                // The group was reset on the way.
                if e == Error::StorageFailure {
                    self.controller.request_if_absent(TransitionRequest::Fallback(
                        FallbackReason::StorageFailure,
                    ))?;
                }
                return Err(e);
            }
        }

        if matches!(submission, Submission::Station(_) | Submission::Operator(_)) {
            self.controller.clear_reconfiguration_required();
        }

        let station_configured = self.store.station().await.is_ok();
        self.controller.request(submission.transition(station_configured))
    }

    async fn housekeeping(&mut self) -> Result<()> {
        let free = self.monitor.free_heap_bytes();
        if free < self.min_free_heap {
            log::warn!("Low memory: {} bytes free", free);
        }

        let reason = match self.store.verify().await {
            Ok(()) => return Ok(()),
            Err(Error::StorageFailure) => {
                // Already parked in access point mode waiting for the operator.
                if self.controller.mode() == ConnectionMode::AccessPoint
                    && self.controller.reconfiguration_required()
                    && self.controller.pending() == 0
                {
                    return Ok(());
                }
                FallbackReason::StorageFailure
            }
            Err(Error::ConfigCorrupt(group)) => {
                log::error!("Persisted {} configuration is corrupt", group);
                FallbackReason::ConfigCorrupt
            }
            Err(e) => return Err(e),
        };

        self.controller
            .request_if_absent(TransitionRequest::Fallback(reason))
    }
}

#[cfg(test)]
mod tests {
    use meteopin_api::{ConfigKey, DeviceIdentity, FieldGroup};

    use super::*;
    use crate::clock::TimeSource;
    use crate::config::{DEVICE_LOCATION, DEVICE_MODEL, DEVICE_TOKEN};
    use crate::mock::{MockMonitor, MockNtp, MockRemote, MockSensor, MockWifi};
    use crate::network::ControllerState;
    use crate::scheduler::SchedulePlan;
    use crate::storage::MemoryStorage;
    use crate::telemetry::RemoteError;

    type TestStation =
        WeatherStation<MemoryStorage, MockWifi, MockRemote, MockNtp, MockSensor, MockMonitor>;

    const STATION_FORM: [(&str, &str); 5] = [
        ("station-identity", "HomeWiFi"),
        ("station-secret", "secret123"),
        ("station-address", "192.168.1.50"),
        ("gateway", "192.168.1.1"),
        ("mask", "255.255.255.0"),
    ];

    fn reading() -> SensorReading {
        SensorReading::new(65.0, 1012.5, 24.0, 0.0)
    }

    fn station_with(store: ConfigStore<MemoryStorage>, controller_ceiling: u8) -> TestStation {
        let controller = ModeController::new(MockWifi::new(), MockRemote::new())
            .with_backoff(0, 0)
            .with_retry_ceiling(controller_ceiling);
        let uploader = TelemetryUploader::new(
            DeviceIdentity::new(DEVICE_MODEL, DEVICE_TOKEN, DEVICE_LOCATION),
            TimeSource::new(MockNtp::at(1_700_000_000)),
        );
        let scheduler = Scheduler::new(SchedulePlan::default(), 0).unwrap();

        WeatherStation::new(
            store,
            controller,
            uploader,
            MockSensor::new(reading()),
            MockMonitor { free: 64 * 1024 },
            scheduler,
        )
    }

    async fn configured_store() -> ConfigStore<MemoryStorage> {
        let mut store = ConfigStore::mount(MemoryStorage::new()).await;
        let station = Submission::from_form(STATION_FORM).unwrap();
        store
            .write_group(FieldGroup::Station, &station.values())
            .await
            .unwrap();
        let operator = Submission::from_form([
            ("operator-identity", "op@example.com"),
            ("operator-secret", "hunter22"),
        ])
        .unwrap();
        store
            .write_group(FieldGroup::Operator, &operator.values())
            .await
            .unwrap();
        store
    }

    /// Boots a configured station and runs it until it is committed to
    /// station mode.
    async fn online_station(ceiling: u8) -> TestStation {
        let mut station = station_with(configured_store().await, ceiling);
        station.boot().await.unwrap();
        for now in [0, 300, 600] {
            station.service(now).await;
        }
        assert_eq!(station.mode(), ConnectionMode::Station);
        station
    }

    #[tokio::test]
    async fn test_empty_boot_then_station_submission() {
        let store = ConfigStore::mount(MemoryStorage::new()).await;
        let mut station = station_with(store, 60);

        station.boot().await.unwrap();
        station.service(0).await;

        assert_eq!(station.mode(), ConnectionMode::AccessPoint);
        assert!(station.gateway_mut().is_listening());

        station.gateway_mut().submit_form(STATION_FORM).unwrap();
        station.service(500).await;

        for key in FieldGroup::Station.keys() {
            assert!(station.store().exists(*key).await);
        }
        assert_eq!(station.controller().pending(), 1);

        station.service(600).await;
        assert!(matches!(
            station.controller().state(),
            ControllerState::Joining { .. }
        ));
        assert_eq!(
            station.controller().wifi().addressing.map(|a| a.address),
            None
        );

        station.service(900).await;
        let addressing = station.controller().wifi().addressing.unwrap();
        assert_eq!(addressing.gateway, core::net::Ipv4Addr::new(192, 168, 1, 1));
    }

    #[tokio::test]
    async fn test_send_without_reading_is_noop() {
        let mut station = online_station(60).await;
        station.latest = None;

        station.send(60_000).await.unwrap();

        assert_eq!(station.controller().remote().push_calls, 0);
    }

    #[tokio::test]
    async fn test_reading_is_sent_once() {
        let mut station = online_station(60).await;
        assert!(station.latest().is_some());

        station.send(60_000).await.unwrap();
        assert!(station.latest().is_none());

        station.send(120_000).await.unwrap();
        let remote = station.controller().remote();
        assert_eq!(remote.push_calls, 1);
        assert_eq!(remote.pushes[0].1.timestamp, 1_700_000_000);
        assert_eq!(station.uploader().stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_transient_failure_keeps_reading() {
        let mut station = online_station(60).await;
        station
            .controller_mut()
            .remote_mut()
            .push_results
            .push_back(Err(RemoteError::Unavailable));

        assert_eq!(
            station.send(60_000).await,
            Err(Error::TransientDeliveryFailure)
        );
        assert!(station.latest().is_some());

        station.send(120_000).await.unwrap();
        assert!(station.latest().is_none());
        assert_eq!(station.controller().remote().pushes.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_reading_is_dropped() {
        let mut station = online_station(60).await;
        station
            .controller_mut()
            .remote_mut()
            .push_results
            .push_back(Err(RemoteError::Rejected));

        assert_eq!(station.send(60_000).await, Err(Error::PayloadRejected));
        assert!(station.latest().is_none());
        assert_eq!(station.controller().session().unwrap().retries_left(), 60);
    }

    #[tokio::test]
    async fn test_exhausted_uploads_fall_back() {
        let mut station = online_station(2).await;
        let remote = station.controller_mut().remote_mut();
        remote.push_results.push_back(Err(RemoteError::Unavailable));
        remote.push_results.push_back(Err(RemoteError::Unavailable));

        let _ = station.send(60_000).await;
        let _ = station.send(61_000).await;
        assert!(station.latest().is_some());

        station.service(900).await;
        assert_eq!(station.mode(), ConnectionMode::AccessPoint);
        assert!(station.controller().reconfiguration_required());
        assert!(station.status().await.reconfiguration_required);
    }

    #[tokio::test]
    async fn test_sample_overwrites_and_filters() {
        let store = ConfigStore::mount(MemoryStorage::new()).await;
        let mut station = station_with(store, 60);
        let newer = SensorReading::new(40.0, 1000.0, 18.0, 1.5);
        let broken = SensorReading::new(140.0, 1000.0, 18.0, 0.0);
        let script = &mut station.sensor_mut().script;
        script.push_back(Some(reading()));
        script.push_back(Some(newer));
        script.push_back(Some(broken));
        script.push_back(None);

        station.sample().await.unwrap();
        station.sample().await.unwrap();
        assert_eq!(station.latest(), Some(&newer));

        assert_eq!(station.sample().await, Err(Error::SensorFailure));
        assert_eq!(station.sample().await, Err(Error::SensorFailure));
        assert_eq!(station.latest(), Some(&newer));
    }

    #[tokio::test]
    async fn test_corruption_detected_by_housekeeping() {
        let mut station = online_station(60).await;
        station
            .store_mut()
            .storage_mut()
            .set_item(ConfigKey::StationMask.storage_key(), "255.0.255.0")
            .await
            .unwrap();

        station.housekeeping().await.unwrap();
        assert_eq!(station.controller().pending(), 1);

        station.service(900).await;
        assert_eq!(station.mode(), ConnectionMode::AccessPoint);
        for key in ConfigKey::ALL {
            assert!(!station.store().exists(key).await);
        }
        assert!(station.controller().session().is_none());
    }

    #[tokio::test]
    async fn test_storage_failure_falls_back_once() {
        let store = ConfigStore::mount(MemoryStorage::unmounted()).await;
        let mut station = station_with(store, 60);

        station.boot().await.unwrap();
        station.service(0).await;
        assert_eq!(station.mode(), ConnectionMode::AccessPoint);
        assert_eq!(station.controller().pending(), 1);

        station.service(300).await;
        assert!(station.controller().reconfiguration_required());
        let ap_starts = station.controller().wifi().ap_starts;

        for now in (400..=4_000).step_by(100) {
            station.service(now).await;
        }
        assert_eq!(station.controller().wifi().ap_starts, ap_starts);
        assert_eq!(station.controller().pending(), 0);
    }

    #[tokio::test]
    async fn test_operator_submission_clears_flag() {
        let mut store = configured_store().await;
        store.reset_group(FieldGroup::Operator).await.unwrap();
        let mut station = station_with(store, 60);

        station.boot().await.unwrap();
        for now in [0, 300] {
            station.service(now).await;
        }
        assert!(station.controller().reconfiguration_required());

        station
            .gateway_mut()
            .submit_form([
                ("operator-identity", "op@example.com"),
                ("operator-secret", "hunter22"),
            ])
            .unwrap();
        station.reconfigure().await.unwrap();
        assert!(!station.controller().reconfiguration_required());

        for now in [600, 900, 1_200] {
            station.service(now).await;
        }
        assert_eq!(station.mode(), ConnectionMode::Station);
    }

    #[tokio::test]
    async fn test_corruption_while_parked_is_reset() {
        let mut station = station_with(configured_store().await, 60);
        station.controller_mut().wifi_mut().join_failures = u32::MAX;

        station.boot().await.unwrap();
        for now in (0..=4_000).step_by(100) {
            station.service(now).await;
        }
        assert_eq!(station.mode(), ConnectionMode::AccessPoint);
        assert!(station.controller().reconfiguration_required());
        assert_eq!(station.controller().pending(), 0);

        station
            .store_mut()
            .storage_mut()
            .set_item(ConfigKey::OperatorSecret.storage_key(), "bad\nsecret")
            .await
            .unwrap();
        for now in (4_100..=6_000).step_by(100) {
            station.service(now).await;
        }

        assert!(!station.store().exists(ConfigKey::OperatorSecret).await);
        assert_eq!(station.store().verify().await, Ok(()));
        assert_eq!(station.mode(), ConnectionMode::AccessPoint);
        assert!(station.controller().reconfiguration_required());
        assert_eq!(station.controller().pending(), 0);
    }

    #[tokio::test]
    async fn test_failed_submission_write_falls_back() {
        let mut station = online_station(60).await;
        station.store_mut().storage_mut().set_reject_writes(true);

        station.gateway_mut().submit_form(STATION_FORM).unwrap();
        assert_eq!(station.reconfigure().await, Err(Error::StorageFailure));
        assert_eq!(station.controller().pending(), 1);

        station.service(900).await;
        assert_eq!(station.mode(), ConnectionMode::AccessPoint);
        assert!(station.controller().reconfiguration_required());
        assert_eq!(station.controller().remote().signed_out, 1);
        assert!(!station.store().exists(ConfigKey::StationIdentity).await);
    }

    #[tokio::test]
    async fn test_access_point_submission_keeps_station() {
        let mut station = online_station(60).await;

        station
            .gateway_mut()
            .submit_form([("ap-identity", "Station-7"), ("ap-secret", "apsecret1")])
            .unwrap();
        station.reconfigure().await.unwrap();
        assert_eq!(station.controller().pending(), 1);

        station.service(900).await;
        assert_eq!(station.controller().wifi().ap_ssid(), Some("Station-7"));

        for now in [1_200, 1_500] {
            station.service(now).await;
        }
        assert_eq!(station.mode(), ConnectionMode::Station);
        assert!(!station.controller().reconfiguration_required());
        assert!(station.controller().session().unwrap().is_signed_in());
        assert!(station.store().exists(ConfigKey::ApIdentity).await);
    }

    #[tokio::test]
    async fn test_factory_reset_submission() {
        let mut station = online_station(60).await;

        station
            .gateway_mut()
            .submit_form([("factory-reset-flag", "true")])
            .unwrap();
        station.reconfigure().await.unwrap();
        station.service(900).await;

        assert_eq!(station.mode(), ConnectionMode::AccessPoint);
        assert_eq!(station.controller().remote().signed_out, 1);
        for key in ConfigKey::ALL {
            assert!(!station.store().exists(key).await);
        }
    }
}
