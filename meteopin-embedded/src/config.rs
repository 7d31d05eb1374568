//! Compile-time firmware constants.

/// Telemetry send period
pub const SEND_INTERVAL_MS: u64 = 60_000;
/// Sensor sampling period
pub const SAMPLE_INTERVAL_MS: u64 = 3_000;
/// Mode controller step period
pub const CONTROL_TICK_MS: u64 = 300;
/// Reconfiguration gateway polling period
pub const RECONFIG_CHECK_MS: u64 = 500;
/// Storage and memory health check period
pub const HOUSEKEEPING_MS: u64 = 400;

/// Remote authentication attempts per upload session
pub const AUTH_RETRY_CEILING: u8 = 60;
/// Network join attempts per station entry
pub const JOIN_ATTEMPT_CEILING: u8 = 10;

pub const JOIN_TIMEOUT_MS: u64 = 10_000;
pub const AUTH_TIMEOUT_MS: u64 = 5_000;
pub const UPLOAD_TIMEOUT_MS: u64 = 5_000;
pub const TIME_QUERY_TIMEOUT_MS: u64 = 2_000;

/// First retry delay after a failed join or sign-in, doubled per failure
pub const BACKOFF_BASE_MS: u64 = 500;
pub const BACKOFF_CAP_MS: u64 = 30_000;

/// Free heap below this is reported by housekeeping
pub const MIN_FREE_HEAP_BYTES: usize = 16 * 1024;

pub const NTP_POOL: &str = "pool.ntp.org";

pub const DEFAULT_AP_SSID: &str = "MeteoPIN-Setup";
pub const DEFAULT_AP_PASSWORD: &str = "meteopin123";

pub const DEVICE_MODEL: &str = "MeteoPIN 1.2";
pub const DEVICE_TOKEN: &str = "BMOD0112PIAL";
pub const DEVICE_LOCATION: &str = "Palmeira dos Índios - AL";

/// `min(base * 2^(failures - 1), cap)`, zero before the first failure.
pub fn backoff_ms(failures: u32, base_ms: u64, cap_ms: u64) -> u64 {
    if failures == 0 {
        return 0;
    }
    let shift = (failures - 1).min(20);
    base_ms.saturating_mul(1 << shift).min(cap_ms)
}
