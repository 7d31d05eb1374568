//! Operator reconfiguration through the local form.
//!
//! The HTTP side is external. It hands decoded form fields to
//! [`ReconfigurationGateway::submit_form`]; the reconfiguration tick drains
//! accepted submissions one at a time.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use heapless::Deque;
use meteopin_api::{
    AccessPointCredentials, ConfigKey, ConnectionMode, FACTORY_RESET_FIELD, FieldGroup,
    OperatorAccount, StationCredentials,
};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::network::TransitionRequest;
use crate::storage::{ConfigStore, LocalStorage};

const SUBMISSION_QUEUE_DEPTH: usize = 4;

/// Shown instead of stored secrets
pub const SECRET_MASK: &str = "********";

/// A validated operator submission. Always covers exactly one field group or
/// is a factory reset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Station(StationCredentials),
    AccessPoint(AccessPointCredentials),
    Operator(OperatorAccount),
    FactoryReset,
}

impl Submission {
    /// Parses decoded form fields. Blank fields are treated as not
    /// submitted; unknown names, fields spanning several groups and values
    /// that fail validation reject the whole submission.
    pub fn from_form<'a, I>(fields: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut group = None;
        let mut values = BTreeMap::new();
        let mut reset = false;

        for (name, value) in fields {
            if name == FACTORY_RESET_FIELD {
                reset |= is_truthy(value);
                continue;
            }

            let key = ConfigKey::from_form_field(name).ok_or_else(|| {
                log::warn!("Rejected submission with unknown field {}", name);
                Error::InvalidSubmission("unknown field")
            })?;
            if value.trim().is_empty() {
                continue;
            }

            match group {
                Some(g) if g != key.group() => {
                    return Err(Error::InvalidSubmission("fields from more than one group"));
                }
                _ => group = Some(key.group()),
            }
            values.insert(key, value.to_string());
        }

        if reset {
            if !values.is_empty() {
                return Err(Error::InvalidSubmission("factory reset carries no fields"));
            }
            return Ok(Submission::FactoryReset);
        }

        let group = group.ok_or(Error::InvalidSubmission("empty submission"))?;
        let mut take = |key: ConfigKey| values.remove(&key).unwrap_or_default();

        let submission = match group {
            FieldGroup::Station => Submission::Station(StationCredentials {
                identity: take(ConfigKey::StationIdentity),
                secret: take(ConfigKey::StationSecret),
                address: take(ConfigKey::StationAddress),
                gateway: take(ConfigKey::StationGateway),
                mask: take(ConfigKey::StationMask),
            }),
            FieldGroup::AccessPoint => Submission::AccessPoint(AccessPointCredentials {
                identity: take(ConfigKey::ApIdentity),
                secret: take(ConfigKey::ApSecret),
                address: take(ConfigKey::ApAddress),
            }),
            FieldGroup::Operator => Submission::Operator(OperatorAccount {
                identity: take(ConfigKey::OperatorIdentity),
                secret: take(ConfigKey::OperatorSecret),
            }),
        };

        submission.validate()?;
        Ok(submission)
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Submission::Station(creds) => creds.validate()?,
            Submission::AccessPoint(creds) => creds.validate()?,
            Submission::Operator(account) => account.validate()?,
            Submission::FactoryReset => {}
        }
        Ok(())
    }

    pub fn group(&self) -> Option<FieldGroup> {
        match self {
            Submission::Station(_) => Some(FieldGroup::Station),
            Submission::AccessPoint(_) => Some(FieldGroup::AccessPoint),
            Submission::Operator(_) => Some(FieldGroup::Operator),
            Submission::FactoryReset => None,
        }
    }

    /// Every key of the submitted group with its value, blanks included.
    pub fn values(&self) -> Vec<(ConfigKey, &str)> {
        let Some(group) = self.group() else {
            return Vec::new();
        };
        group
            .keys()
            .iter()
            .filter_map(|&key| {
                let value = match self {
                    Submission::Station(creds) => creds.value(key),
                    Submission::AccessPoint(creds) => creds.value(key),
                    Submission::Operator(account) => account.value(key),
                    Submission::FactoryReset => None,
                };
                value.map(|v| (key, v))
            })
            .collect()
    }

    /// The mode controller request this submission leads to once stored.
    /// Groups other than the station one repeat the boot decision, so a
    /// working station is brought back up instead of being dropped.
    pub fn transition(&self, station_configured: bool) -> TransitionRequest {
        match self {
            Submission::Station(_) => TransitionRequest::EnterStation,
            Submission::AccessPoint(_) | Submission::Operator(_) => {
                if station_configured {
                    TransitionRequest::EnterStation
                } else {
                    TransitionRequest::EnterAccessPoint
                }
            }
            Submission::FactoryReset => TransitionRequest::FactoryReset,
        }
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "on" | "true" | "1" | "yes" | "ok"
    )
}

/// Inbox between the externally-owned form handler and the reconfiguration
/// tick.
#[derive(Debug, Default)]
pub struct ReconfigurationGateway {
    listening: bool,
    pending: Deque<Submission, SUBMISSION_QUEUE_DEPTH>,
}

impl ReconfigurationGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn set_listening(&mut self, listening: bool) {
        if self.listening != listening {
            log::info!(
                "Reconfiguration listener {}",
                if listening { "started" } else { "stopped" }
            );
        }
        self.listening = listening;
    }

    pub fn submit(&mut self, submission: Submission) -> Result<()> {
        if !self.listening {
            return Err(Error::GatewayClosed);
        }
        self.pending
            .push_back(submission)
            .map_err(|_| Error::QueueFull)?;
        log::debug!("Accepted submission, {} pending", self.pending.len());
        Ok(())
    }

    pub fn submit_form<'a, I>(&mut self, fields: I) -> Result<()>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        if !self.listening {
            return Err(Error::GatewayClosed);
        }
        self.submit(Submission::from_form(fields)?)
    }

    pub fn take_pending(&mut self) -> Option<Submission> {
        self.pending.pop_front()
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldStatus {
    /// Form field name
    pub name: &'static str,
    /// Stored value, masked for secrets
    pub value: Option<String>,
}

/// What the reconfiguration page shows: current mode, whether the device
/// needs attention, and the stored fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConfigStatus {
    pub mode: ConnectionMode,
    pub reconfiguration_required: bool,
    pub fields: Vec<FieldStatus>,
}

impl ConfigStatus {
    pub async fn collect<S: LocalStorage>(
        store: &ConfigStore<S>,
        mode: ConnectionMode,
        reconfiguration_required: bool,
    ) -> Self {
        let mut fields = Vec::with_capacity(ConfigKey::ALL.len());
        for key in ConfigKey::ALL {
            let value = store.get(key).await.map(|value| {
                if key.is_secret() {
                    SECRET_MASK.to_string()
                } else {
                    value
                }
            });
            fields.push(FieldStatus {
                name: key.form_field(),
                value,
            });
        }

        Self {
            mode,
            reconfiguration_required,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .and_then(|f| f.value.as_deref())
    }
}
