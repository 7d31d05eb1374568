#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

pub mod config;
pub mod identity;
pub mod mode;
pub mod reading;
pub mod validation;

pub use config::*;
pub use identity::*;
pub use mode::*;
pub use reading::*;
pub use validation::*;
