#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod clock;
pub mod config;
pub mod error;
pub mod gateway;
#[cfg(test)]
mod mock;
pub mod network;
pub mod scheduler;
pub mod sensor;
pub mod station;
pub mod storage;
pub mod telemetry;

pub use error::*;
pub use station::*;
