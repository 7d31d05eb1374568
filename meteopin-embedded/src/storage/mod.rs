mod memory;
mod store;

pub use memory::*;
pub use store::*;

use core::fmt::Debug;

use alloc::string::String;

/// Flat key/value medium the configuration lives on (flash filesystem,
/// embedded database, RAM).
#[allow(async_fn_in_trait)]
pub trait LocalStorage {
    type Error: Debug;

    /// Whether the medium mounted and can be used at all
    fn is_mounted(&self) -> bool;

    async fn get_item(&self, key: &str) -> Result<Option<String>, Self::Error>;

    async fn set_item(&mut self, key: &str, value: &str) -> Result<(), Self::Error>;

    async fn remove_item(&mut self, key: &str) -> Result<(), Self::Error>;
}
