use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};

use super::LocalStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryStorageError {
    Unmounted,
    WriteRejected,
}

/// RAM-backed storage. Loses everything on power loss.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    data: BTreeMap<String, String>,
    unmounted: bool,
    reject_writes: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose medium failed to mount.
    pub fn unmounted() -> Self {
        Self {
            unmounted: true,
            ..Self::default()
        }
    }

    /// Makes every subsequent write fail, as a worn-out flash would.
    pub fn set_reject_writes(&mut self, reject: bool) {
        self.reject_writes = reject;
    }

    pub fn set_mounted(&mut self, mounted: bool) {
        self.unmounted = !mounted;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }
}

impl LocalStorage for MemoryStorage {
    type Error = MemoryStorageError;

    fn is_mounted(&self) -> bool {
        !self.unmounted
    }

    async fn get_item(&self, key: &str) -> Result<Option<String>, Self::Error> {
        if self.unmounted {
            return Err(MemoryStorageError::Unmounted);
        }
        Ok(self.data.get(key).cloned())
    }

    async fn set_item(&mut self, key: &str, value: &str) -> Result<(), Self::Error> {
        if self.unmounted {
            return Err(MemoryStorageError::Unmounted);
        }
        if self.reject_writes {
            return Err(MemoryStorageError::WriteRejected);
        }
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&mut self, key: &str) -> Result<(), Self::Error> {
        if self.unmounted {
            return Err(MemoryStorageError::Unmounted);
        }
        self.data.remove(key);
        Ok(())
    }
}
