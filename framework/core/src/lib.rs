#![cfg_attr(not(any(test, feature = "std")), no_std)]
#![deny(unsafe_code)]

#[cfg(test)]
extern crate alloc;

pub mod macros;
pub mod address;
pub mod decoder;
pub mod error;
pub mod event;
pub mod format;
pub mod func;
pub mod message;
pub mod model_time;
pub mod speed;
pub mod telemetry;
