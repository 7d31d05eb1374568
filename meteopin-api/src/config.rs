use core::fmt;
use core::net::Ipv4Addr;

use alloc::string::String;

use serde::{Deserialize, Serialize};

use crate::validation::*;

/// Form field carrying the factory-reset directive
pub const FACTORY_RESET_FIELD: &str = "factory-reset-flag";

/// Address the access point serves when none is configured
pub const DEFAULT_AP_ADDRESS: Ipv4Addr = Ipv4Addr::new(192, 168, 4, 1);

/// Groups of persisted fields that are validated and reset together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldGroup {
    Station,
    AccessPoint,
    Operator,
}

impl FieldGroup {
    pub const ALL: [FieldGroup; 3] = [
        FieldGroup::Station,
        FieldGroup::AccessPoint,
        FieldGroup::Operator,
    ];

    pub fn keys(&self) -> &'static [ConfigKey] {
        match self {
            FieldGroup::Station => &[
                ConfigKey::StationIdentity,
                ConfigKey::StationSecret,
                ConfigKey::StationAddress,
                ConfigKey::StationGateway,
                ConfigKey::StationMask,
            ],
            FieldGroup::AccessPoint => &[
                ConfigKey::ApIdentity,
                ConfigKey::ApSecret,
                ConfigKey::ApAddress,
            ],
            FieldGroup::Operator => &[ConfigKey::OperatorIdentity, ConfigKey::OperatorSecret],
        }
    }
}

impl fmt::Display for FieldGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldGroup::Station => write!(f, "station"),
            FieldGroup::AccessPoint => write!(f, "access point"),
            FieldGroup::Operator => write!(f, "operator"),
        }
    }
}

/// One persisted configuration value. Each key maps to exactly one field of
/// [`DeviceConfig`] and to one plain-text file on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConfigKey {
    StationIdentity,
    StationSecret,
    StationAddress,
    StationGateway,
    StationMask,
    ApIdentity,
    ApSecret,
    ApAddress,
    OperatorIdentity,
    OperatorSecret,
}

impl ConfigKey {
    pub const ALL: [ConfigKey; 10] = [
        ConfigKey::StationIdentity,
        ConfigKey::StationSecret,
        ConfigKey::StationAddress,
        ConfigKey::StationGateway,
        ConfigKey::StationMask,
        ConfigKey::ApIdentity,
        ConfigKey::ApSecret,
        ConfigKey::ApAddress,
        ConfigKey::OperatorIdentity,
        ConfigKey::OperatorSecret,
    ];

    /// Name of the slot holding this value on the storage medium
    pub fn storage_key(&self) -> &'static str {
        match self {
            ConfigKey::StationIdentity => "ssid.txt",
            ConfigKey::StationSecret => "password.txt",
            ConfigKey::StationAddress => "ip.txt",
            ConfigKey::StationGateway => "gateway.txt",
            ConfigKey::StationMask => "netmask.txt",
            ConfigKey::ApIdentity => "ap_ssid.txt",
            ConfigKey::ApSecret => "ap_password.txt",
            ConfigKey::ApAddress => "ap_ip.txt",
            ConfigKey::OperatorIdentity => "operator_user.txt",
            ConfigKey::OperatorSecret => "operator_password.txt",
        }
    }

    /// Slot used to stage a write before it is committed
    pub fn staging_key(&self) -> &'static str {
        match self {
            ConfigKey::StationIdentity => "ssid.txt.tmp",
            ConfigKey::StationSecret => "password.txt.tmp",
            ConfigKey::StationAddress => "ip.txt.tmp",
            ConfigKey::StationGateway => "gateway.txt.tmp",
            ConfigKey::StationMask => "netmask.txt.tmp",
            ConfigKey::ApIdentity => "ap_ssid.txt.tmp",
            ConfigKey::ApSecret => "ap_password.txt.tmp",
            ConfigKey::ApAddress => "ap_ip.txt.tmp",
            ConfigKey::OperatorIdentity => "operator_user.txt.tmp",
            ConfigKey::OperatorSecret => "operator_password.txt.tmp",
        }
    }

    /// Name of the reconfiguration form field carrying this value
    pub fn form_field(&self) -> &'static str {
        match self {
            ConfigKey::StationIdentity => "station-identity",
            ConfigKey::StationSecret => "station-secret",
            ConfigKey::StationAddress => "station-address",
            ConfigKey::StationGateway => "gateway",
            ConfigKey::StationMask => "mask",
            ConfigKey::ApIdentity => "ap-identity",
            ConfigKey::ApSecret => "ap-secret",
            ConfigKey::ApAddress => "ap-address",
            ConfigKey::OperatorIdentity => "operator-identity",
            ConfigKey::OperatorSecret => "operator-secret",
        }
    }

    pub fn from_form_field(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.form_field() == name)
    }

    pub fn group(&self) -> FieldGroup {
        match self {
            ConfigKey::StationIdentity
            | ConfigKey::StationSecret
            | ConfigKey::StationAddress
            | ConfigKey::StationGateway
            | ConfigKey::StationMask => FieldGroup::Station,
            ConfigKey::ApIdentity | ConfigKey::ApSecret | ConfigKey::ApAddress => {
                FieldGroup::AccessPoint
            }
            ConfigKey::OperatorIdentity | ConfigKey::OperatorSecret => FieldGroup::Operator,
        }
    }

    /// Secrets must never be logged or echoed back to the form.
    pub fn is_secret(&self) -> bool {
        matches!(
            self,
            ConfigKey::StationSecret | ConfigKey::ApSecret | ConfigKey::OperatorSecret
        )
    }
}

/// Credentials used to join an existing network as a client.
///
/// `address`, `gateway` and `mask` are either all empty (DHCP) or all set
/// (static addressing).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StationCredentials {
    pub identity: String,
    pub secret: String,
    pub address: String,
    pub gateway: String,
    pub mask: String,
}

/// Static IPv4 settings derived from [`StationCredentials`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticAddressing {
    pub address: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub mask: Ipv4Addr,
}

impl StationCredentials {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_text("station identity", &self.identity, MAX_IDENTITY_LEN)?;
        validate_network_secret("station secret", &self.secret)?;
        self.static_addressing().map(|_| ())
    }

    /// `Ok(None)` means the station should use DHCP.
    pub fn static_addressing(&self) -> Result<Option<StaticAddressing>, ValidationError> {
        let fields = [&self.address, &self.gateway, &self.mask];
        if fields.iter().all(|f| f.trim().is_empty()) {
            return Ok(None);
        }
        if fields.iter().any(|f| f.trim().is_empty()) {
            return Err(ValidationError::IncompleteAddressing);
        }

        Ok(Some(StaticAddressing {
            address: parse_address("station address", &self.address)?,
            gateway: parse_address("gateway", &self.gateway)?,
            mask: parse_mask("mask", &self.mask)?,
        }))
    }

    pub fn value(&self, key: ConfigKey) -> Option<&str> {
        match key {
            ConfigKey::StationIdentity => Some(&self.identity),
            ConfigKey::StationSecret => Some(&self.secret),
            ConfigKey::StationAddress => Some(&self.address),
            ConfigKey::StationGateway => Some(&self.gateway),
            ConfigKey::StationMask => Some(&self.mask),
            _ => None,
        }
    }
}

/// Credentials of the network the device hosts for configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPointCredentials {
    pub identity: String,
    pub secret: String,
    pub address: String,
}

impl AccessPointCredentials {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_text("access point identity", &self.identity, MAX_IDENTITY_LEN)?;
        validate_network_secret("access point secret", &self.secret)?;
        self.address_or_default().map(|_| ())
    }

    pub fn address_or_default(&self) -> Result<Ipv4Addr, ValidationError> {
        if self.address.trim().is_empty() {
            Ok(DEFAULT_AP_ADDRESS)
        } else {
            parse_address("access point address", &self.address)
        }
    }

    pub fn value(&self, key: ConfigKey) -> Option<&str> {
        match key {
            ConfigKey::ApIdentity => Some(&self.identity),
            ConfigKey::ApSecret => Some(&self.secret),
            ConfigKey::ApAddress => Some(&self.address),
            _ => None,
        }
    }
}

/// Account used to sign in to the remote time-series store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorAccount {
    pub identity: String,
    pub secret: String,
}

impl OperatorAccount {
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_text("operator identity", &self.identity, MAX_ACCOUNT_LEN)?;
        validate_text("operator secret", &self.secret, MAX_ACCOUNT_LEN)
    }

    pub fn value(&self, key: ConfigKey) -> Option<&str> {
        match key {
            ConfigKey::OperatorIdentity => Some(&self.identity),
            ConfigKey::OperatorSecret => Some(&self.secret),
            _ => None,
        }
    }
}

/// Snapshot of everything the station persists. `None` means the group is
/// absent (or was reset because it failed validation).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub station: Option<StationCredentials>,
    pub access_point: Option<AccessPointCredentials>,
    pub operator: Option<OperatorAccount>,
}

impl DeviceConfig {
    pub fn is_configured(&self) -> bool {
        self.station.is_some()
    }
}
