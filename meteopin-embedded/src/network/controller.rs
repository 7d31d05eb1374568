use core::fmt;
use core::net::Ipv4Addr;

use alloc::string::{String, ToString};

use embassy_time::{Duration, with_timeout};
use heapless::Deque;
use meteopin_api::{
    ConnectionMode, DEFAULT_AP_ADDRESS, FieldGroup, StaticAddressing, StationCredentials,
};

use crate::config::{
    AUTH_RETRY_CEILING, AUTH_TIMEOUT_MS, BACKOFF_BASE_MS, BACKOFF_CAP_MS, DEFAULT_AP_PASSWORD,
    DEFAULT_AP_SSID, JOIN_ATTEMPT_CEILING, JOIN_TIMEOUT_MS, backoff_ms,
};
use crate::error::{Error, Result};
use crate::storage::{ConfigStore, LocalStorage};
use crate::telemetry::{RemoteStore, UploadSession};

use super::WifiController;

const REQUEST_QUEUE_DEPTH: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionRequest {
    EnterStation,
    EnterAccessPoint,
    FactoryReset,
    Fallback(FallbackReason),
}

impl TransitionRequest {
    /// Requests that make an in-flight station bring-up pointless.
    fn cancels_bring_up(&self) -> bool {
        !matches!(self, TransitionRequest::EnterStation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// Join attempts or the upload session's retry budget ran out
    RetriesExhausted,
    /// A group needed for station mode is absent or was reset on load
    ConfigUnusable(FieldGroup),
    /// Housekeeping found persisted configuration that no longer validates
    ConfigCorrupt,
    StorageFailure,
}

impl FallbackReason {
    /// Whether falling back wipes the whole store.
    fn resets_store(&self) -> bool {
        matches!(
            self,
            FallbackReason::ConfigCorrupt | FallbackReason::StorageFailure
        )
    }
}

impl fmt::Display for FallbackReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FallbackReason::RetriesExhausted => write!(f, "retries exhausted"),
            FallbackReason::ConfigUnusable(group) => write!(f, "unusable {} configuration", group),
            FallbackReason::ConfigCorrupt => write!(f, "corrupt configuration"),
            FallbackReason::StorageFailure => write!(f, "storage failure"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    /// Before the first transition after boot
    Unconfigured,
    AccessPoint,
    /// Station bring-up, waiting to try join number `attempt + 1`
    Joining { attempt: u8, retry_at: u64 },
    /// Joined, signing in to the remote store
    Authenticating,
    Station,
}

impl ControllerState {
    fn is_bringing_up(&self) -> bool {
        matches!(
            self,
            ControllerState::Joining { .. } | ControllerState::Authenticating
        )
    }
}

/// Connectivity state machine and sole owner of the radio, the remote store
/// client and the upload session.
///
/// Transitions are requested through a queue and performed one step per
/// [`tick`](Self::tick). The hosted access point stays up during station
/// bring-up and is only stopped once the station is committed, so
/// [`mode`](Self::mode) flips in a single step.
pub struct ModeController<W: WifiController, R: RemoteStore> {
    state: ControllerState,
    wifi: W,
    remote: R,
    pending: Deque<TransitionRequest, REQUEST_QUEUE_DEPTH>,
    station: Option<(StationCredentials, Option<StaticAddressing>)>,
    session: Option<UploadSession>,
    ap_active: bool,
    reconfiguration_required: bool,
    join_ceiling: u8,
    auth_ceiling: u8,
    join_timeout: Duration,
    auth_timeout: Duration,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
}

impl<W: WifiController, R: RemoteStore> ModeController<W, R> {
    pub fn new(wifi: W, remote: R) -> Self {
        Self {
            state: ControllerState::Unconfigured,
            wifi,
            remote,
            pending: Deque::new(),
            station: None,
            session: None,
            ap_active: false,
            reconfiguration_required: false,
            join_ceiling: JOIN_ATTEMPT_CEILING,
            auth_ceiling: AUTH_RETRY_CEILING,
            join_timeout: Duration::from_millis(JOIN_TIMEOUT_MS),
            auth_timeout: Duration::from_millis(AUTH_TIMEOUT_MS),
            backoff_base_ms: BACKOFF_BASE_MS,
            backoff_cap_ms: BACKOFF_CAP_MS,
        }
    }

    pub fn with_retry_ceiling(mut self, ceiling: u8) -> Self {
        self.auth_ceiling = ceiling;
        self
    }

    pub fn with_join_attempts(mut self, attempts: u8) -> Self {
        self.join_ceiling = attempts.max(1);
        self
    }

    pub fn with_timeouts(mut self, join_ms: u64, auth_ms: u64) -> Self {
        self.join_timeout = Duration::from_millis(join_ms);
        self.auth_timeout = Duration::from_millis(auth_ms);
        self
    }

    pub fn with_backoff(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_cap_ms = cap_ms;
        self
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    /// The committed mode. Anything short of a finished station bring-up is
    /// access point mode.
    pub fn mode(&self) -> ConnectionMode {
        match self.state {
            ControllerState::Station => ConnectionMode::Station,
            _ => ConnectionMode::AccessPoint,
        }
    }

    pub fn session(&self) -> Option<&UploadSession> {
        self.session.as_ref()
    }

    pub fn is_access_point_active(&self) -> bool {
        self.ap_active
    }

    /// Whether the operator can currently reach the device locally.
    pub fn is_network_up(&self) -> bool {
        self.ap_active || (self.state == ControllerState::Station && self.wifi.is_connected())
    }

    /// Set when the device fell back to access point mode on its own.
    pub fn reconfiguration_required(&self) -> bool {
        self.reconfiguration_required
    }

    pub fn clear_reconfiguration_required(&mut self) {
        if self.reconfiguration_required {
            log::info!("Reconfiguration received, clearing reconfiguration flag");
        }
        self.reconfiguration_required = false;
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn wifi(&self) -> &W {
        &self.wifi
    }

    pub fn wifi_mut(&mut self) -> &mut W {
        &mut self.wifi
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn remote_mut(&mut self) -> &mut R {
        &mut self.remote
    }

    /// Session and client for a send, only while committed to station mode
    /// with retries left.
    pub fn upload_context(&mut self) -> Option<(&mut UploadSession, &mut R)> {
        if self.state != ControllerState::Station {
            return None;
        }
        let session = self.session.as_mut()?;
        if session.is_exhausted() {
            return None;
        }
        Some((session, &mut self.remote))
    }

    /// Picks the initial target from persisted configuration. A corrupt
    /// station group is reset on the way.
    pub async fn boot<S: LocalStorage>(&mut self, store: &mut ConfigStore<S>) -> Result<()> {
        match store.load_station().await {
            Ok(creds) => {
                log::info!("Found station configuration for {}", creds.identity);
                self.request(TransitionRequest::EnterStation)
            }
            Err(e) => {
                log::info!("{}, starting in access point mode", e);
                self.request(TransitionRequest::EnterAccessPoint)
            }
        }
    }

    /// Queues a transition behind every request already waiting.
    pub fn request(&mut self, request: TransitionRequest) -> Result<()> {
        self.pending.push_back(request).map_err(|_| {
            log::error!("Transition queue full, dropping {:?}", request);
            Error::QueueFull
        })?;
        log::debug!("Queued transition {:?}", request);
        Ok(())
    }

    /// Like [`request`](Self::request), but does nothing while an identical
    /// request is still waiting. For conditions that are re-detected on every
    /// check until they are handled.
    pub fn request_if_absent(&mut self, request: TransitionRequest) -> Result<()> {
        if self.pending.iter().any(|queued| *queued == request) {
            return Ok(());
        }
        self.request(request)
    }

    pub fn request_mode(&mut self, mode: ConnectionMode) -> Result<()> {
        match mode {
            ConnectionMode::AccessPoint => self.request(TransitionRequest::EnterAccessPoint),
            ConnectionMode::Station => self.request(TransitionRequest::EnterStation),
            ConnectionMode::Bluetooth | ConnectionMode::Sms => {
                log::error!("Refusing transition to unimplemented {} mode", mode);
                Err(Error::UnsupportedMode(mode))
            }
        }
    }

    /// Advances the machine by one step: an in-flight bring-up first, then
    /// the oldest queued request, then link supervision.
    pub async fn tick<S: LocalStorage>(
        &mut self,
        now_ms: u64,
        store: &mut ConfigStore<S>,
    ) -> Result<()> {
        if self.state.is_bringing_up() && self.pending.iter().any(|r| r.cancels_bring_up()) {
            log::info!("Abandoning station bring-up for queued transition");
            self.teardown_station().await;
            self.transition(ControllerState::AccessPoint);
        }

        match self.state {
            ControllerState::Joining { attempt, retry_at } => {
                return self.step_join(attempt, retry_at, now_ms, store).await;
            }
            ControllerState::Authenticating => return self.step_auth(now_ms, store).await,
            _ => {}
        }

        if let Some(request) = self.pending.pop_front() {
            return self.begin(request, now_ms, store).await;
        }

        self.supervise(now_ms, store).await
    }

    async fn begin<S: LocalStorage>(
        &mut self,
        request: TransitionRequest,
        now_ms: u64,
        store: &mut ConfigStore<S>,
    ) -> Result<()> {
        log::debug!("Processing transition {:?} in {:?}", request, self.state);

        match request {
            TransitionRequest::EnterStation => self.enter_station(now_ms, store).await,
            TransitionRequest::EnterAccessPoint => {
                self.teardown_station().await;
                self.enter_access_point(store).await
            }
            TransitionRequest::FactoryReset => {
                log::warn!("Factory reset requested");
                self.teardown_station().await;
                if let Err(e) = store.reset_all().await {
                    log::error!("Factory reset incomplete: {}", e);
                }
                self.reconfiguration_required = false;
                self.enter_access_point(store).await
            }
            TransitionRequest::Fallback(reason) => self.fall_back(reason, store).await,
        }
    }

    async fn enter_station<S: LocalStorage>(
        &mut self,
        now_ms: u64,
        store: &mut ConfigStore<S>,
    ) -> Result<()> {
        let creds = match store.load_station().await {
            Ok(creds) => creds,
            Err(e) => {
                log::warn!("Cannot enter station mode: {}", e);
                return self
                    .fall_back(FallbackReason::ConfigUnusable(FieldGroup::Station), store)
                    .await;
            }
        };
        let addressing = match creds.static_addressing() {
            Ok(addressing) => addressing,
            Err(e) => {
                log::warn!("Cannot enter station mode: {}", e);
                return self
                    .fall_back(FallbackReason::ConfigUnusable(FieldGroup::Station), store)
                    .await;
            }
        };

        self.teardown_station().await;
        if !self.ap_active {
            self.start_access_point(store).await?;
        }

        log::info!("Joining network {}", creds.identity);
        self.station = Some((creds, addressing));
        self.transition(ControllerState::Joining {
            attempt: 0,
            retry_at: now_ms,
        });
        Ok(())
    }

    async fn step_join<S: LocalStorage>(
        &mut self,
        attempt: u8,
        retry_at: u64,
        now_ms: u64,
        store: &mut ConfigStore<S>,
    ) -> Result<()> {
        if now_ms < retry_at {
            return Ok(());
        }

        let joined = match &self.station {
            Some((creds, addressing)) => {
                with_timeout(
                    self.join_timeout,
                    self.wifi.connect_station(creds, *addressing),
                )
                .await
            }
            None => {
                return self
                    .fall_back(FallbackReason::ConfigUnusable(FieldGroup::Station), store)
                    .await;
            }
        };

        match joined {
            Ok(Ok(())) => {
                log::info!("Joined network on attempt {}", attempt + 1);
                let account = match store.load_operator().await {
                    Ok(account) => account,
                    Err(e) => {
                        log::warn!("Cannot authenticate: {}", e);
                        return self
                            .fall_back(FallbackReason::ConfigUnusable(FieldGroup::Operator), store)
                            .await;
                    }
                };
                self.session = Some(
                    UploadSession::new(account, self.auth_ceiling)
                        .with_backoff(self.backoff_base_ms, self.backoff_cap_ms),
                );
                self.transition(ControllerState::Authenticating);
                Ok(())
            }
            failed => {
                match failed {
                    Ok(Err(e)) => log::warn!("Join attempt {} failed: {:?}", attempt + 1, e),
                    _ => log::warn!("Join attempt {} timed out", attempt + 1),
                }

                let attempts = attempt.saturating_add(1);
                if attempts >= self.join_ceiling {
                    log::error!("Failed to join network after {} attempts", attempts);
                    self.fall_back(FallbackReason::RetriesExhausted, store).await?;
                    return Err(Error::NetworkJoinFailure);
                }

                let delay = backoff_ms(attempts as u32, self.backoff_base_ms, self.backoff_cap_ms);
                self.transition(ControllerState::Joining {
                    attempt: attempts,
                    retry_at: now_ms + delay,
                });
                Ok(())
            }
        }
    }

    async fn step_auth<S: LocalStorage>(
        &mut self,
        now_ms: u64,
        store: &mut ConfigStore<S>,
    ) -> Result<()> {
        if !self.wifi.is_connected() {
            return self.rejoin(now_ms, store).await;
        }

        let Some(session) = self.session.as_mut() else {
            return self
                .fall_back(FallbackReason::ConfigUnusable(FieldGroup::Operator), store)
                .await;
        };
        if !session.ready(now_ms) {
            return Ok(());
        }

        match with_timeout(self.auth_timeout, self.remote.sign_in(session.account())).await {
            Ok(Ok(handle)) => {
                session.signed_in(handle);
                self.commit_station().await;
                Ok(())
            }
            failed => {
                match failed {
                    Ok(Err(e)) => log::warn!("Authentication failed: {}", e),
                    _ => log::warn!("Authentication timed out"),
                }
                if session.record_failure(now_ms) {
                    log::error!(
                        "Authentication failed {} times, giving up",
                        session.ceiling()
                    );
                    self.fall_back(FallbackReason::RetriesExhausted, store).await?;
                    return Err(Error::AuthFailure);
                }
                Ok(())
            }
        }
    }

    async fn commit_station(&mut self) {
        if self.ap_active {
            if let Err(e) = self.wifi.stop_ap().await {
                log::warn!("Failed to stop access point: {:?}", e);
            }
            self.ap_active = false;
        }
        self.transition(ControllerState::Station);
        log::info!("Station mode active");
    }

    async fn supervise<S: LocalStorage>(
        &mut self,
        now_ms: u64,
        store: &mut ConfigStore<S>,
    ) -> Result<()> {
        match self.state {
            ControllerState::AccessPoint if !self.ap_active => {
                log::warn!("Access point down, restarting");
                self.start_access_point(store).await
            }
            ControllerState::Station => {
                if self.session.as_ref().is_some_and(|s| s.is_exhausted()) {
                    return self.fall_back(FallbackReason::RetriesExhausted, store).await;
                }
                if !self.wifi.is_connected() {
                    return self.rejoin(now_ms, store).await;
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Link dropped under an established or half-established station. The
    /// stale session is discarded and the bring-up starts over behind the
    /// access point.
    async fn rejoin<S: LocalStorage>(
        &mut self,
        now_ms: u64,
        store: &mut ConfigStore<S>,
    ) -> Result<()> {
        log::warn!("Network link lost, rejoining");
        self.session = None;
        if !self.ap_active {
            self.start_access_point(store).await?;
        }
        self.transition(ControllerState::Joining {
            attempt: 0,
            retry_at: now_ms,
        });
        Ok(())
    }

    async fn fall_back<S: LocalStorage>(
        &mut self,
        reason: FallbackReason,
        store: &mut ConfigStore<S>,
    ) -> Result<()> {
        log::warn!("Falling back to access point mode: {}", reason);
        self.teardown_station().await;

        if reason.resets_store() {
            if let Err(e) = store.reset_all().await {
                log::error!("Reset after {} incomplete: {}", reason, e);
            }
        }

        self.reconfiguration_required = true;
        self.enter_access_point(store).await
    }

    async fn enter_access_point<S: LocalStorage>(
        &mut self,
        store: &mut ConfigStore<S>,
    ) -> Result<()> {
        self.transition(ControllerState::AccessPoint);
        self.start_access_point(store).await
    }

    /// (Re)starts the hosted network, with built-in defaults when no valid
    /// access point configuration is stored.
    async fn start_access_point<S: LocalStorage>(
        &mut self,
        store: &mut ConfigStore<S>,
    ) -> Result<()> {
        let (ssid, password, address): (String, String, Ipv4Addr) =
            match store.load_access_point().await {
                Ok(ap) => {
                    let address = ap.address_or_default().unwrap_or(DEFAULT_AP_ADDRESS);
                    (ap.identity, ap.secret, address)
                }
                Err(e) => {
                    log::warn!("{}, using built-in access point defaults", e);
                    (
                        DEFAULT_AP_SSID.to_string(),
                        DEFAULT_AP_PASSWORD.to_string(),
                        DEFAULT_AP_ADDRESS,
                    )
                }
            };

        if self.ap_active {
            if let Err(e) = self.wifi.stop_ap().await {
                log::warn!("Failed to stop access point: {:?}", e);
            }
            self.ap_active = false;
        }

        self.wifi
            .start_ap(&ssid, &password, address)
            .await
            .map_err(|e| {
                log::error!("Failed to start access point {}: {:?}", ssid, e);
                Error::RadioFailure
            })?;

        self.ap_active = true;
        log::info!("Access point {} up at {}", ssid, address);
        Ok(())
    }

    /// Releases the session and the station link, if any.
    async fn teardown_station(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Some(handle) = session.take_handle() {
                if with_timeout(self.auth_timeout, self.remote.sign_out(&handle))
                    .await
                    .is_err()
                {
                    log::warn!("Sign out timed out");
                }
            }
            log::debug!("Upload session closed");
        }

        if self.station.take().is_some() || self.wifi.is_connected() {
            if let Err(e) = self.wifi.disconnect().await {
                log::warn!("Failed to disconnect: {:?}", e);
            }
        }
    }

    fn transition(&mut self, to: ControllerState) {
        log::debug!("Mode controller transition: {:?} -> {:?}", self.state, to);
        self.state = to;
    }
}
