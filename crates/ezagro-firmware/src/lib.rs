#![no_std]

//! ESP32-S3 adapters for the ezagro core: the MH-Z19 UART, SD card
//! persistence, WiFi station and portal with its DHCP leases, the Blynk cloud link and the
//! firmware update check.

extern crate alloc;

pub mod cloud;
pub mod dhcp;
pub mod network;
pub mod serial;
pub mod storage;
pub mod updater;
