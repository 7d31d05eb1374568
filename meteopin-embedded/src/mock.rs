//! Test doubles shared across the crate's unit tests.

use core::net::Ipv4Addr;

use alloc::collections::VecDeque;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use meteopin_api::{
    OperatorAccount, SensorReading, StaticAddressing, StationCredentials, TelemetryRecord,
};
use time::OffsetDateTime;

use crate::clock::NtpClient;
use crate::network::WifiController;
use crate::sensor::{SensorSource, SystemMonitor};
use crate::telemetry::{AuthHandle, RemoteError, RemoteStore};

#[derive(Debug, Default)]
pub struct MockWifi {
    pub ap: Option<(String, String, Ipv4Addr)>,
    pub ap_starts: u32,
    pub fail_ap: bool,
    pub connected: bool,
    pub joins: u32,
    pub join_failures: u32,
    pub disconnects: u32,
    pub addressing: Option<StaticAddressing>,
}

impl MockWifi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ap_ssid(&self) -> Option<&str> {
        self.ap.as_ref().map(|(ssid, _, _)| ssid.as_str())
    }
}

impl WifiController for MockWifi {
    type Error = ();

    async fn start_ap(&mut self, ssid: &str, password: &str, address: Ipv4Addr) -> Result<(), ()> {
        if self.fail_ap {
            return Err(());
        }
        self.ap = Some((ssid.to_string(), password.to_string(), address));
        self.ap_starts += 1;
        Ok(())
    }

    async fn stop_ap(&mut self) -> Result<(), ()> {
        self.ap = None;
        Ok(())
    }

    async fn connect_station(
        &mut self,
        _credentials: &StationCredentials,
        addressing: Option<StaticAddressing>,
    ) -> Result<(), ()> {
        self.joins += 1;
        if self.join_failures > 0 {
            self.join_failures -= 1;
            return Err(());
        }
        self.connected = true;
        self.addressing = addressing;
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ()> {
        self.connected = false;
        self.disconnects += 1;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

#[derive(Debug, Default)]
pub struct MockRemote {
    /// Successful sign-ins
    pub sign_ins: u32,
    pub sign_in_attempts: u32,
    /// Remaining sign-ins to refuse
    pub sign_in_failures: u32,
    pub signed_out: u32,
    /// Scripted push outcomes, `Ok` once exhausted
    pub push_results: VecDeque<Result<(), RemoteError>>,
    pub push_calls: u32,
    pub pushes: Vec<(String, TelemetryRecord)>,
}

impl MockRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue_handle(&mut self) -> AuthHandle {
        self.sign_ins += 1;
        AuthHandle {
            user_id: format!("uid-{}", self.sign_ins),
            token: "token".to_string(),
        }
    }
}

impl RemoteStore for MockRemote {
    async fn sign_in(&mut self, _account: &OperatorAccount) -> Result<AuthHandle, RemoteError> {
        self.sign_in_attempts += 1;
        if self.sign_in_failures > 0 {
            self.sign_in_failures -= 1;
            return Err(RemoteError::Rejected);
        }
        Ok(self.issue_handle())
    }

    async fn push(
        &mut self,
        _auth: &AuthHandle,
        path: &str,
        record: &TelemetryRecord,
    ) -> Result<(), RemoteError> {
        self.push_calls += 1;
        self.push_results.pop_front().unwrap_or(Ok(()))?;
        self.pushes.push((path.to_string(), *record));
        Ok(())
    }

    async fn sign_out(&mut self, _auth: &AuthHandle) {
        self.signed_out += 1;
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MockNtp {
    now: Option<i64>,
}

impl MockNtp {
    pub fn at(seconds: i64) -> Self {
        Self { now: Some(seconds) }
    }

    pub fn unavailable() -> Self {
        Self { now: None }
    }
}

impl NtpClient for MockNtp {
    type Error = ();

    async fn query(&mut self, _server: &str) -> Result<OffsetDateTime, ()> {
        let seconds = self.now.ok_or(())?;
        OffsetDateTime::from_unix_timestamp(seconds).map_err(|_| ())
    }
}

#[derive(Debug)]
pub struct MockSensor {
    /// Scripted results, `None` is a failed read
    pub script: VecDeque<Option<SensorReading>>,
    pub steady: SensorReading,
    pub reads: u32,
}

impl MockSensor {
    pub fn new(steady: SensorReading) -> Self {
        Self {
            script: VecDeque::new(),
            steady,
            reads: 0,
        }
    }
}

impl SensorSource for MockSensor {
    type Error = ();

    async fn read(&mut self) -> Result<SensorReading, ()> {
        self.reads += 1;
        match self.script.pop_front() {
            Some(Some(reading)) => Ok(reading),
            Some(None) => Err(()),
            None => Ok(self.steady),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MockMonitor {
    pub free: usize,
}

impl SystemMonitor for MockMonitor {
    fn free_heap_bytes(&self) -> usize {
        self.free
    }
}
