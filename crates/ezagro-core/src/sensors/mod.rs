pub mod bmp180;
pub mod mhz19;

pub use bmp180::Bmp180;
pub use mhz19::{Co2Readings, DecodeError, Mhz19Sensor};

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor}: failed to {operation} ({details})")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor}: {error}")]
    Decode {
        sensor: &'static str,
        error: DecodeError,
    },
}

/// Trait for sensors that produce typed readings.
pub trait Sensor {
    /// The type of readings this sensor produces.
    type Readings;

    /// Read the sensor and return typed readings.
    fn read(&mut self) -> impl Future<Output = Result<Self::Readings, SensorError>>;
}

/// Typed readings from the pressure/temperature sensor on the I2C bus.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClimateReadings {
    pub temperature_celsius: f32,
    pub pressure_pa: f32,
}
