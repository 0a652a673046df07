//! ESP32-S3 implementations of the collaborator traits in `co2unit-core`.

#![no_std]

extern crate alloc;

pub mod clock;
pub mod network;
pub mod platform;
pub mod sensor;
pub mod storage;
