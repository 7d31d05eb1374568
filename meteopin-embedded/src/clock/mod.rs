//! Network time for stamping readings.

use core::fmt::Debug;

use alloc::string::{String, ToString};

use embassy_time::{Duration, with_timeout};
use meteopin_api::UNSYNCED_TIMESTAMP;
use time::OffsetDateTime;

use crate::config::{NTP_POOL, TIME_QUERY_TIMEOUT_MS};
use crate::error::{Error, Result};

/// Wire-level time protocol client (SNTP on the device).
#[allow(async_fn_in_trait)]
pub trait NtpClient {
    type Error: Debug;

    async fn query(&mut self, server: &str) -> core::result::Result<OffsetDateTime, Self::Error>;
}

/// Best-effort epoch clock. Every query is bounded by a timeout so a dead
/// time server can never stall a tick.
pub struct TimeSource<C: NtpClient> {
    client: C,
    server: String,
    timeout: Duration,
    last_synced: Option<u64>,
}

impl<C: NtpClient> TimeSource<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            server: NTP_POOL.to_string(),
            timeout: Duration::from_millis(TIME_QUERY_TIMEOUT_MS),
            last_synced: None,
        }
    }

    pub fn with_server(mut self, server: &str) -> Self {
        self.server = server.to_string();
        self
    }

    pub fn with_timeout(mut self, timeout_ms: u64) -> Self {
        self.timeout = Duration::from_millis(timeout_ms);
        self
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    /// Epoch seconds of the last successful query.
    pub fn last_synced(&self) -> Option<u64> {
        self.last_synced
    }

    /// Current epoch seconds.
    pub async fn now(&mut self) -> Result<u64> {
        let queried = with_timeout(self.timeout, self.client.query(&self.server)).await;

        let now = match queried {
            Ok(Ok(now)) => now,
            Ok(Err(e)) => {
                log::warn!("Time query to {} failed: {:?}", self.server, e);
                return Err(Error::TimeUnavailable);
            }
            Err(_) => {
                log::warn!("Time query to {} timed out", self.server);
                return Err(Error::TimeUnavailable);
            }
        };

        let seconds = now.unix_timestamp();
        if seconds <= 0 {
            log::warn!("Time server returned pre-epoch time {}", seconds);
            return Err(Error::TimeUnavailable);
        }

        self.last_synced = Some(seconds as u64);
        Ok(seconds as u64)
    }

    /// Current epoch seconds, or [`UNSYNCED_TIMESTAMP`] when unavailable.
    pub async fn now_or_unsynced(&mut self) -> u64 {
        self.now().await.unwrap_or(UNSYNCED_TIMESTAMP)
    }
}
