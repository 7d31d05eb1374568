use meteopin_api::OperatorAccount;

use crate::config::{BACKOFF_BASE_MS, BACKOFF_CAP_MS, backoff_ms};

use super::AuthHandle;

/// Authenticated, retry-bounded context for delivering telemetry.
///
/// The retry budget only ever shrinks. A fresh budget means a fresh session,
/// which the mode controller creates on every station entry.
#[derive(Debug, Clone)]
pub struct UploadSession {
    account: OperatorAccount,
    handle: Option<AuthHandle>,
    ceiling: u8,
    retries_left: u8,
    failures: u32,
    next_attempt_at: u64,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
}

impl UploadSession {
    pub fn new(account: OperatorAccount, ceiling: u8) -> Self {
        Self {
            account,
            handle: None,
            ceiling,
            retries_left: ceiling,
            failures: 0,
            next_attempt_at: 0,
            backoff_base_ms: BACKOFF_BASE_MS,
            backoff_cap_ms: BACKOFF_CAP_MS,
        }
    }

    pub fn with_backoff(mut self, base_ms: u64, cap_ms: u64) -> Self {
        self.backoff_base_ms = base_ms;
        self.backoff_cap_ms = cap_ms;
        self
    }

    pub fn account(&self) -> &OperatorAccount {
        &self.account
    }

    pub fn handle(&self) -> Option<&AuthHandle> {
        self.handle.as_ref()
    }

    pub fn is_signed_in(&self) -> bool {
        self.handle.is_some()
    }

    pub fn ceiling(&self) -> u8 {
        self.ceiling
    }

    pub fn retries_left(&self) -> u8 {
        self.retries_left
    }

    pub fn is_exhausted(&self) -> bool {
        self.retries_left == 0
    }

    /// Whether the backoff after the last failure has elapsed.
    pub fn ready(&self, now_ms: u64) -> bool {
        now_ms >= self.next_attempt_at
    }

    pub fn signed_in(&mut self, handle: AuthHandle) {
        log::info!("Signed in to remote store as {}", handle.user_id);
        self.handle = Some(handle);
    }

    /// Drops the handle after the remote reported it expired.
    pub fn invalidate(&mut self) {
        self.handle = None;
    }

    pub fn take_handle(&mut self) -> Option<AuthHandle> {
        self.handle.take()
    }

    /// Spends one retry and schedules the next attempt. Returns `true` once
    /// the budget is gone.
    pub fn record_failure(&mut self, now_ms: u64) -> bool {
        self.retries_left = self.retries_left.saturating_sub(1);
        self.failures += 1;
        self.next_attempt_at =
            now_ms + backoff_ms(self.failures, self.backoff_base_ms, self.backoff_cap_ms);

        log::debug!(
            "Upload session failure {}, {} of {} retries left",
            self.failures,
            self.retries_left,
            self.ceiling
        );
        self.is_exhausted()
    }
}
