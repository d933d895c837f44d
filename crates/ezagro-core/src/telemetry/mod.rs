//! Telemetry channels and the periodic measurement scheduler

pub mod scheduler;

pub use scheduler::{TelemetryScheduler, TickReport};

extern crate alloc;
use alloc::format;
use alloc::string::String;

use core::fmt;

/// Value published in place of a reading that could not be taken.
pub const UNAVAILABLE: &str = "---";

/// Cloud-side channel identifier
///
/// Telemetry values and remote commands are both addressed by virtual pin
/// number, the pin numbers are fixed at build time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct VirtualPin(pub u8);

impl VirtualPin {
    pub const TEMPERATURE: Self = Self(3);
    pub const PRESSURE: Self = Self(4);
    pub const CO2: Self = Self(5);
    pub const FIRMWARE_UPDATE: Self = Self(22);
    pub const FACTORY_RESET: Self = Self(23);
}

impl fmt::Display for VirtualPin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "V{}", self.0)
    }
}

/// Destination of the per-tick telemetry values
pub trait TelemetrySink {
    type Error: core::fmt::Debug;

    fn publish(
        &mut self,
        pin: VirtualPin,
        value: &str,
    ) -> impl Future<Output = Result<(), Self::Error>>;
}

/// Format a reading with no decimals, the way it is shown and published
pub fn whole(value: f32) -> String {
    format!("{:.0}", value)
}
