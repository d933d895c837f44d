//! Hardware-independent core library for the ezagro sensor node
//!
//! This crate contains the platform-agnostic logic of the node: the persisted
//! identity record, the MH-Z19 CO2 frame protocol, the WiFi provisioning state
//! machine, the telemetry scheduler and the remote command handling.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both the
//! ESP32-S3 firmware and desktop hosts (for the simulator and tests). Every
//! piece of hardware is reached through a trait defined here.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod app_state;
pub mod cloud;
pub mod commands;
pub mod config;
pub mod constants;
pub mod dhcp;
pub mod display;
pub mod http;
pub mod provisioning;
pub mod sensors;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
pub(crate) mod test_support;
