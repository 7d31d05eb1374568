mod session;
mod uploader;

pub use session::*;
pub use uploader::*;

use core::fmt;

use alloc::string::String;

use meteopin_api::{OperatorAccount, TelemetryRecord};

/// Authentication handle issued by the remote store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHandle {
    pub user_id: String,
    pub token: String,
}

/// How a remote operation failed, as far as retry policy cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteError {
    /// Token expired or revoked, sign in again
    AuthExpired,
    /// Network or service down, worth retrying later
    Unavailable,
    /// Bad credentials, malformed payload or permission denied
    Rejected,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemoteError::AuthExpired => write!(f, "Authentication expired"),
            RemoteError::Unavailable => write!(f, "Remote store unavailable"),
            RemoteError::Rejected => write!(f, "Rejected by remote store"),
        }
    }
}

/// Client of the remote time-series store.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    async fn sign_in(&mut self, account: &OperatorAccount) -> Result<AuthHandle, RemoteError>;

    /// Writes `record` at `path`.
    async fn push(
        &mut self,
        auth: &AuthHandle,
        path: &str,
        record: &TelemetryRecord,
    ) -> Result<(), RemoteError>;

    async fn sign_out(&mut self, auth: &AuthHandle);
}
