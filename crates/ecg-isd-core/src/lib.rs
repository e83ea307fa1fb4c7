//! Hardware-independent core library for ecg-isd
//!
//! This crate contains all platform-agnostic logic for the in-situ ECG
//! recorder: the ADAS1000 front-end driver, the acquisition task, the sample
//! ring between acquisition and storage, recording persistence, and the
//! coordinator tying a recording to a measurement run.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32) and desktop hosts (for the simulator and tests).

#![no_std]

extern crate alloc;

pub mod acquisition;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod export;
pub mod frontend;
pub mod persistence;
pub mod ring_buffer;
pub mod shared_spi_bus;

#[cfg(test)]
mod testing;
