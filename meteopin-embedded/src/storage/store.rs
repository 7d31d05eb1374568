use alloc::collections::BTreeMap;
use alloc::string::String;

use meteopin_api::{
    AccessPointCredentials, ConfigKey, DeviceConfig, FieldGroup, OperatorAccount,
    StationCredentials, ValidationError,
};

use crate::error::{Error, Result};

use super::LocalStorage;

/// Durable key/value view of [`DeviceConfig`]. The only component allowed to
/// touch the storage medium.
///
/// Writes are staged: the value goes to the key's staging slot first, is read
/// back, and only then copied to the canonical slot. A failed write never
/// leaves the canonical slot half-written.
pub struct ConfigStore<S: LocalStorage> {
    storage: S,
}

/// Values of one field group as found on the medium.
struct RawGroup {
    group: FieldGroup,
    values: BTreeMap<ConfigKey, String>,
}

impl RawGroup {
    fn take(&mut self, key: ConfigKey) -> String {
        self.values.remove(&key).unwrap_or_default()
    }

    /// Missing when nothing is stored, corrupt when only part of the
    /// required fields are.
    fn require(&self, keys: &[ConfigKey]) -> Result<()> {
        if self.values.is_empty() {
            return Err(Error::ConfigMissing(self.group));
        }
        if keys.iter().any(|key| !self.values.contains_key(key)) {
            log::error!("Incomplete {} configuration in storage", self.group);
            return Err(Error::ConfigCorrupt(self.group));
        }
        Ok(())
    }

    fn check(&self, validation: core::result::Result<(), ValidationError>) -> Result<()> {
        validation.map_err(|e| {
            log::error!("Stored {} configuration is invalid: {}", self.group, e);
            Error::ConfigCorrupt(self.group)
        })
    }
}

impl<S: LocalStorage> ConfigStore<S> {
    /// Takes ownership of the medium and discards staging slots left by an
    /// interrupted write.
    pub async fn mount(mut storage: S) -> Self {
        if storage.is_mounted() {
            for key in ConfigKey::ALL {
                if let Ok(Some(_)) = storage.get_item(key.staging_key()).await {
                    log::warn!("Discarding interrupted write of {}", key.storage_key());
                    if let Err(e) = storage.remove_item(key.staging_key()).await {
                        log::warn!("Failed to discard {}: {:?}", key.staging_key(), e);
                    }
                }
            }
        } else {
            log::error!("Config storage is not mounted, treating it as empty");
        }

        Self { storage }
    }

    pub fn is_mounted(&self) -> bool {
        self.storage.is_mounted()
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    /// `None` for absent keys and for storage that is absent or unreadable.
    pub async fn get(&self, key: ConfigKey) -> Option<String> {
        self.read(key).await.ok().flatten()
    }

    pub async fn exists(&self, key: ConfigKey) -> bool {
        self.get(key).await.is_some()
    }

    pub async fn set(&mut self, key: ConfigKey, value: &str) -> Result<()> {
        if !self.storage.is_mounted() {
            return Err(Error::StorageFailure);
        }

        let staging = key.staging_key();

        if let Err(e) = self.storage.set_item(staging, value).await {
            log::error!("Failed to stage {}: {:?}", key.storage_key(), e);
            let _ = self.storage.remove_item(staging).await;
            return Err(Error::StorageFailure);
        }

        match self.storage.get_item(staging).await {
            Ok(Some(ref staged)) if staged == value => {}
            _ => {
                log::error!("Staged {} did not read back intact", key.storage_key());
                let _ = self.storage.remove_item(staging).await;
                return Err(Error::StorageFailure);
            }
        }

        self.storage
            .set_item(key.storage_key(), value)
            .await
            .map_err(|e| {
                log::error!("Failed to commit {}: {:?}", key.storage_key(), e);
                Error::StorageFailure
            })?;

        if let Err(e) = self.storage.remove_item(staging).await {
            log::warn!("Failed to clear staging slot {}: {:?}", staging, e);
        }

        if key.is_secret() {
            log::debug!("Stored {}", key.storage_key());
        } else {
            log::debug!("Stored {} = {}", key.storage_key(), value);
        }
        Ok(())
    }

    pub async fn remove(&mut self, key: ConfigKey) -> Result<()> {
        if !self.storage.is_mounted() {
            return Err(Error::StorageFailure);
        }
        self.storage
            .remove_item(key.storage_key())
            .await
            .map_err(|e| {
                log::error!("Failed to remove {}: {:?}", key.storage_key(), e);
                Error::StorageFailure
            })?;
        let _ = self.storage.remove_item(key.staging_key()).await;
        Ok(())
    }

    /// Replaces a whole field group. Keys absent from `values` or given as
    /// empty strings are removed. If any write fails the group is reset so it
    /// never survives half-updated.
    pub async fn write_group(
        &mut self,
        group: FieldGroup,
        values: &[(ConfigKey, &str)],
    ) -> Result<()> {
        for &key in group.keys() {
            let value = values
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| *v)
                .unwrap_or("");

            let written = if value.is_empty() {
                self.remove(key).await
            } else {
                self.set(key, value).await
            };

            if let Err(e) = written {
                log::error!("Writing {} configuration failed, resetting group", group);
                let _ = self.reset_group(group).await;
                return Err(e);
            }
        }

        log::info!("Saved {} configuration", group);
        Ok(())
    }

    pub async fn reset_group(&mut self, group: FieldGroup) -> Result<()> {
        let mut result = Ok(());
        for &key in group.keys() {
            if let Err(e) = self.remove(key).await {
                result = Err(e);
            }
        }
        log::warn!("Reset {} configuration to factory defaults", group);
        result
    }

    /// Removes every known key. The only way back to the unconfigured state.
    pub async fn reset_all(&mut self) -> Result<()> {
        let mut result = Ok(());
        for group in FieldGroup::ALL {
            if let Err(e) = self.reset_group(group).await {
                result = Err(e);
            }
        }
        result
    }

    pub async fn station(&self) -> Result<StationCredentials> {
        let mut raw = self.fetch(FieldGroup::Station).await?;
        raw.require(&[ConfigKey::StationIdentity, ConfigKey::StationSecret])?;

        let creds = StationCredentials {
            identity: raw.take(ConfigKey::StationIdentity),
            secret: raw.take(ConfigKey::StationSecret),
            address: raw.take(ConfigKey::StationAddress),
            gateway: raw.take(ConfigKey::StationGateway),
            mask: raw.take(ConfigKey::StationMask),
        };
        raw.check(creds.validate())?;
        Ok(creds)
    }

    pub async fn access_point(&self) -> Result<AccessPointCredentials> {
        let mut raw = self.fetch(FieldGroup::AccessPoint).await?;
        raw.require(&[ConfigKey::ApIdentity, ConfigKey::ApSecret])?;

        let creds = AccessPointCredentials {
            identity: raw.take(ConfigKey::ApIdentity),
            secret: raw.take(ConfigKey::ApSecret),
            address: raw.take(ConfigKey::ApAddress),
        };
        raw.check(creds.validate())?;
        Ok(creds)
    }

    pub async fn operator(&self) -> Result<OperatorAccount> {
        let mut raw = self.fetch(FieldGroup::Operator).await?;
        raw.require(&[ConfigKey::OperatorIdentity, ConfigKey::OperatorSecret])?;

        let account = OperatorAccount {
            identity: raw.take(ConfigKey::OperatorIdentity),
            secret: raw.take(ConfigKey::OperatorSecret),
        };
        raw.check(account.validate())?;
        Ok(account)
    }

    /// Like [`station`](Self::station), but a corrupt group is reset.
    pub async fn load_station(&mut self) -> Result<StationCredentials> {
        let loaded = self.station().await;
        self.reset_if_corrupt(loaded).await
    }

    pub async fn load_access_point(&mut self) -> Result<AccessPointCredentials> {
        let loaded = self.access_point().await;
        self.reset_if_corrupt(loaded).await
    }

    pub async fn load_operator(&mut self) -> Result<OperatorAccount> {
        let loaded = self.operator().await;
        self.reset_if_corrupt(loaded).await
    }

    /// Snapshot of every valid group; corrupt groups are reset on the way.
    pub async fn load(&mut self) -> DeviceConfig {
        DeviceConfig {
            station: self.load_station().await.ok(),
            access_point: self.load_access_point().await.ok(),
            operator: self.load_operator().await.ok(),
        }
    }

    /// Health check: medium mounted and every persisted group valid.
    pub async fn verify(&self) -> Result<()> {
        if !self.storage.is_mounted() {
            return Err(Error::StorageFailure);
        }

        ignore_missing(self.station().await.map(|_| ()))?;
        ignore_missing(self.access_point().await.map(|_| ()))?;
        ignore_missing(self.operator().await.map(|_| ()))
    }

    async fn read(&self, key: ConfigKey) -> Result<Option<String>> {
        if !self.storage.is_mounted() {
            return Ok(None);
        }
        self.storage.get_item(key.storage_key()).await.map_err(|e| {
            log::warn!("Failed to read {}: {:?}", key.storage_key(), e);
            Error::ConfigCorrupt(key.group())
        })
    }

    async fn fetch(&self, group: FieldGroup) -> Result<RawGroup> {
        let mut values = BTreeMap::new();
        for &key in group.keys() {
            if let Some(value) = self.read(key).await? {
                values.insert(key, value);
            }
        }
        Ok(RawGroup { group, values })
    }

    async fn reset_if_corrupt<T>(&mut self, loaded: Result<T>) -> Result<T> {
        if let Err(Error::ConfigCorrupt(group)) = &loaded {
            if let Err(e) = self.reset_group(*group).await {
                log::error!("Failed to reset {} configuration: {}", group, e);
            }
        }
        loaded
    }
}

fn ignore_missing(result: Result<()>) -> Result<()> {
    match result {
        Err(Error::ConfigMissing(_)) => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::storage::MemoryStorage;

    async fn store() -> ConfigStore<MemoryStorage> {
        ConfigStore::mount(MemoryStorage::new()).await
    }

    async fn save_station(store: &mut ConfigStore<MemoryStorage>) {
        store
            .write_group(
                FieldGroup::Station,
                &[
                    (ConfigKey::StationIdentity, "HomeWiFi"),
                    (ConfigKey::StationSecret, "secret123"),
                    (ConfigKey::StationAddress, "192.168.1.50"),
                    (ConfigKey::StationGateway, "192.168.1.1"),
                    (ConfigKey::StationMask, "255.255.255.0"),
                ],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_set_get_exists() {
        let mut store = store().await;

        assert_eq!(store.get(ConfigKey::ApIdentity).await, None);
        assert!(!store.exists(ConfigKey::ApIdentity).await);

        store.set(ConfigKey::ApIdentity, "MeteoPIN").await.unwrap();

        assert_eq!(
            store.get(ConfigKey::ApIdentity).await.as_deref(),
            Some("MeteoPIN")
        );
        assert!(store.exists(ConfigKey::ApIdentity).await);
        assert!(!store.storage().contains(ConfigKey::ApIdentity.staging_key()));
    }

    #[tokio::test]
    async fn test_failed_write_keeps_previous_value() {
        let mut store = store().await;
        store.set(ConfigKey::StationIdentity, "Old").await.unwrap();

        store.storage_mut().set_reject_writes(true);
        assert_eq!(
            store.set(ConfigKey::StationIdentity, "New").await,
            Err(Error::StorageFailure)
        );

        assert_eq!(
            store.get(ConfigKey::StationIdentity).await.as_deref(),
            Some("Old")
        );
        assert!(
            !store
                .storage()
                .contains(ConfigKey::StationIdentity.staging_key())
        );
    }

    #[tokio::test]
    async fn test_mount_discards_interrupted_write() {
        let mut medium = MemoryStorage::new();
        medium
            .set_item(ConfigKey::StationSecret.staging_key(), "half")
            .await
            .unwrap();

        let store = ConfigStore::mount(medium).await;

        assert!(store.storage().is_empty());
        assert_eq!(store.get(ConfigKey::StationSecret).await, None);
    }

    #[tokio::test]
    async fn test_reset_all_clears_every_key() {
        let mut store = store().await;
        save_station(&mut store).await;
        store.set(ConfigKey::OperatorIdentity, "op@example.com").await.unwrap();
        store.set(ConfigKey::OperatorSecret, "hunter22").await.unwrap();

        store.reset_all().await.unwrap();

        for key in ConfigKey::ALL {
            assert_eq!(store.get(key).await, None);
        }
    }

    #[tokio::test]
    async fn test_unmounted_storage_reads_as_empty() {
        let mut store = ConfigStore::mount(MemoryStorage::unmounted()).await;

        assert!(!store.is_mounted());
        assert_eq!(store.get(ConfigKey::StationIdentity).await, None);
        assert_eq!(
            store.station().await,
            Err(Error::ConfigMissing(FieldGroup::Station))
        );
        assert_eq!(
            store.set(ConfigKey::StationIdentity, "x").await,
            Err(Error::StorageFailure)
        );
        assert_eq!(store.verify().await, Err(Error::StorageFailure));
        assert_eq!(store.load().await, DeviceConfig::default());
    }

    #[tokio::test]
    async fn test_load_station_with_static_addressing() {
        let mut store = store().await;
        save_station(&mut store).await;

        let creds = store.load_station().await.unwrap();
        assert_eq!(creds.identity, "HomeWiFi");
        assert!(creds.static_addressing().unwrap().is_some());
        assert_eq!(store.verify().await, Ok(()));
    }

    #[tokio::test]
    async fn test_corrupt_group_is_reset() {
        let mut store = store().await;
        save_station(&mut store).await;
        store.set(ConfigKey::StationMask, "255.0.255.0").await.unwrap();
        store.set(ConfigKey::ApIdentity, "MeteoPIN").await.unwrap();
        store.set(ConfigKey::ApSecret, "meteopin123").await.unwrap();

        assert_eq!(
            store.verify().await,
            Err(Error::ConfigCorrupt(FieldGroup::Station))
        );

        let config = store.load().await;

        assert_eq!(config.station, None);
        assert!(config.access_point.is_some());
        for &key in FieldGroup::Station.keys() {
            assert!(!store.exists(key).await);
        }
        assert_eq!(store.verify().await, Ok(()));
    }

    #[tokio::test]
    async fn test_partial_group_is_corrupt() {
        let mut store = store().await;
        store.set(ConfigKey::OperatorIdentity, "op@example.com").await.unwrap();

        assert_eq!(
            store.load_operator().await,
            Err(Error::ConfigCorrupt(FieldGroup::Operator))
        );
        assert!(!store.exists(ConfigKey::OperatorIdentity).await);
    }

    #[tokio::test]
    async fn test_write_group_clears_omitted_fields() {
        let mut store = store().await;
        save_station(&mut store).await;

        store
            .write_group(
                FieldGroup::Station,
                &[
                    (ConfigKey::StationIdentity, "Office"),
                    (ConfigKey::StationSecret, "officepass"),
                ],
            )
            .await
            .unwrap();

        let creds = store.station().await.unwrap();
        assert_eq!(creds.identity, "Office");
        assert_eq!(creds.static_addressing(), Ok(None));
        assert!(!store.exists(ConfigKey::StationGateway).await);
    }

    #[tokio::test]
    async fn test_failed_group_write_leaves_no_partial_group() {
        let mut store = store().await;
        save_station(&mut store).await;
        store.storage_mut().set_reject_writes(true);

        let result = store
            .write_group(
                FieldGroup::Station,
                &[
                    (ConfigKey::StationIdentity, "Office"),
                    (ConfigKey::StationSecret, "officepass"),
                ],
            )
            .await;

        assert_eq!(result, Err(Error::StorageFailure));
        for &key in FieldGroup::Station.keys() {
            assert!(!store.exists(key).await);
        }
    }
}
