//! Portable core of the CO2 logger firmware.
//!
//! Everything here runs once per power-on episode: the boot resolver picks
//! the work, the reactor runs it, and the scheduler decides when the board
//! wakes up next. Hardware sits behind the traits in [`board`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod backoff;
pub mod board;
pub mod boot;
pub mod config;
pub mod context;
pub mod episode;
pub mod error_log;
pub mod event_log;
pub mod fs;
pub mod http;
pub mod modem;
pub mod nvs;
pub mod poll;
pub mod reactor;
pub mod rtc;
pub mod schedule;
pub mod seqfile;
pub mod sntp;
pub mod state_file;
pub mod sync;
pub mod task;
pub mod tasks;

#[cfg(test)]
pub(crate) mod testing;
