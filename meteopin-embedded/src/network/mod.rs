mod controller;

pub use controller::*;

use core::fmt::Debug;
use core::net::Ipv4Addr;

use meteopin_api::{StaticAddressing, StationCredentials};

/// Radio driver. Implementations only perform the requested operation, all
/// sequencing lives in [`ModeController`].
#[allow(async_fn_in_trait)]
pub trait WifiController {
    type Error: Debug;

    /// Start hosting a network with the given identity and secret
    async fn start_ap(
        &mut self,
        ssid: &str,
        password: &str,
        address: Ipv4Addr,
    ) -> Result<(), Self::Error>;

    async fn stop_ap(&mut self) -> Result<(), Self::Error>;

    /// Join an existing network. `addressing` is `None` for DHCP.
    async fn connect_station(
        &mut self,
        credentials: &StationCredentials,
        addressing: Option<StaticAddressing>,
    ) -> Result<(), Self::Error>;

    async fn disconnect(&mut self) -> Result<(), Self::Error>;

    /// Whether the station link is currently up
    fn is_connected(&self) -> bool;
}
