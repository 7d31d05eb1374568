use alloc::format;
use alloc::string::String;

use serde::{Deserialize, Serialize};

/// Identifies a station and its data namespace in the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    /// Hardware model, e.g. `MeteoPIN 1.2`
    pub model: String,
    /// Factory token unique to the unit
    pub token: String,
    /// Human-readable installation site
    pub location: String,
}

impl DeviceIdentity {
    pub fn new(model: &str, token: &str, location: &str) -> Self {
        Self {
            model: model.into(),
            token: token.into(),
            location: location.into(),
        }
    }

    /// Prefix of every path this station writes to.
    pub fn parent_path(&self) -> String {
        format!("/stations/{}/{}", slug(&self.token), slug(&self.location))
    }

    /// Where the record taken at `timestamp` is stored.
    pub fn record_path(&self, timestamp: u64) -> String {
        format!(
            "{}/{}/{}",
            self.parent_path(),
            slug(&self.model),
            timestamp
        )
    }

    /// Where a record without network time is stored. `uptime_ms` keeps
    /// unsynced records apart from each other and from the dated ones.
    pub fn unsynced_record_path(&self, uptime_ms: u64) -> String {
        format!(
            "{}/{}/unsynced/{}",
            self.parent_path(),
            slug(&self.model),
            uptime_ms
        )
    }
}

/// Lowercase ASCII alphanumerics, every other run of characters becomes `-`.
///
/// Nothing is transliterated: non-ASCII letters are dropped like any other
/// separator, so `Índios` becomes `ndios`.
pub fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_dash = false;

    for c in value.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slug() {
        assert_eq!(slug("MeteoPIN 1.2"), "meteopin-1-2");
        assert_eq!(slug("Palmeira dos Índios - AL"), "palmeira-dos-ndios-al");
        assert_eq!(slug("  --x--  "), "x");
    }

    #[test]
    fn test_paths() {
        let identity = DeviceIdentity::new("MeteoPIN 1.2", "BMOD0112PIAL", "Palmeira dos Índios - AL");

        assert_eq!(
            identity.parent_path(),
            "/stations/bmod0112pial/palmeira-dos-ndios-al"
        );
        assert_eq!(
            identity.record_path(1_700_000_000),
            "/stations/bmod0112pial/palmeira-dos-ndios-al/meteopin-1-2/1700000000"
        );
        assert_eq!(
            identity.unsynced_record_path(42_000),
            "/stations/bmod0112pial/palmeira-dos-ndios-al/meteopin-1-2/unsynced/42000"
        );
    }
}
