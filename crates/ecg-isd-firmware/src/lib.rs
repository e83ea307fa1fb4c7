//! ESP32 firmware-specific modules for ecg-isd
//!
//! This crate contains hardware-specific code that cannot compile on desktop
//! targets: SPI bus and pin setup for the two ADAS1000 chips and the SD card,
//! and the embedded-sdmmc backed recording file system.

#![no_std]

pub mod hardware;
pub mod sd_card;
