use embassy_time::{Duration, with_timeout};
use meteopin_api::{DeviceIdentity, SensorReading, TelemetryRecord};

use crate::clock::{NtpClient, TimeSource};
use crate::config::{AUTH_TIMEOUT_MS, UPLOAD_TIMEOUT_MS};

use super::{RemoteError, RemoteStore, UploadSession};

/// Result of one delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Stored remotely, drop the buffered reading
    Delivered,
    /// Session had to sign in again, keep the reading for the next send
    AuthExpired,
    /// Remote unreachable, keep the reading for the next send
    TransientFailure,
    /// Remote refused the payload, retrying cannot help
    Rejected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    pub delivered: u32,
    pub auth_expired: u32,
    pub transient: u32,
    pub rejected: u32,
}

/// Stamps readings with network time and pushes them under the station's
/// parent path.
pub struct TelemetryUploader<C: NtpClient> {
    identity: DeviceIdentity,
    time: TimeSource<C>,
    upload_timeout: Duration,
    auth_timeout: Duration,
    stats: UploadStats,
}

impl<C: NtpClient> TelemetryUploader<C> {
    pub fn new(identity: DeviceIdentity, time: TimeSource<C>) -> Self {
        Self {
            identity,
            time,
            upload_timeout: Duration::from_millis(UPLOAD_TIMEOUT_MS),
            auth_timeout: Duration::from_millis(AUTH_TIMEOUT_MS),
            stats: UploadStats::default(),
        }
    }

    pub fn with_timeouts(mut self, upload_ms: u64, auth_ms: u64) -> Self {
        self.upload_timeout = Duration::from_millis(upload_ms);
        self.auth_timeout = Duration::from_millis(auth_ms);
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn stats(&self) -> UploadStats {
        self.stats
    }

    pub async fn upload<R: RemoteStore>(
        &mut self,
        reading: &SensorReading,
        session: &mut UploadSession,
        remote: &mut R,
        now_ms: u64,
    ) -> UploadOutcome {
        let Some(handle) = session.handle().cloned() else {
            return self.reauthenticate(session, remote, now_ms).await;
        };

        let reading = if reading.is_stamped() {
            *reading
        } else {
            reading.stamped(self.time.now_or_unsynced().await)
        };
        let path = if reading.is_stamped() {
            self.identity.record_path(reading.timestamp)
        } else {
            log::warn!("Network time unavailable, sending unsynced timestamp");
            self.identity.unsynced_record_path(now_ms)
        };
        let record = TelemetryRecord::from(reading);

        let pushed = with_timeout(self.upload_timeout, remote.push(&handle, &path, &record)).await;

        match pushed {
            Ok(Ok(())) => {
                log::info!("Delivered reading to {}", path);
                self.stats.delivered += 1;
                UploadOutcome::Delivered
            }
            Ok(Err(RemoteError::AuthExpired)) => {
                log::warn!("Remote session expired, signing in again");
                session.invalidate();
                self.reauthenticate(session, remote, now_ms).await
            }
            Ok(Err(RemoteError::Rejected)) => {
                log::error!("Remote store rejected reading for {}, dropping it", path);
                self.stats.rejected += 1;
                UploadOutcome::Rejected
            }
            Ok(Err(RemoteError::Unavailable)) | Err(_) => {
                log::warn!("Remote store unavailable, keeping reading for next send");
                self.stats.transient += 1;
                session.record_failure(now_ms);
                UploadOutcome::TransientFailure
            }
        }
    }

    /// One sign-in attempt. The reading stays buffered either way.
    async fn reauthenticate<R: RemoteStore>(
        &mut self,
        session: &mut UploadSession,
        remote: &mut R,
        now_ms: u64,
    ) -> UploadOutcome {
        self.stats.auth_expired += 1;

        match with_timeout(self.auth_timeout, remote.sign_in(session.account())).await {
            Ok(Ok(handle)) => session.signed_in(handle),
            Ok(Err(e)) => {
                log::warn!("Re-authentication failed: {}", e);
                session.record_failure(now_ms);
            }
            Err(_) => {
                log::warn!("Re-authentication timed out");
                session.record_failure(now_ms);
            }
        }

        UploadOutcome::AuthExpired
    }
}
