//! BMP180 barometric pressure and temperature sensor over I2C

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::I2c;
use log::{debug, warn};

use super::{ClimateReadings, Sensor, SensorError};

pub const DEFAULT_ADDRESS: u8 = 0x77;

const SENSOR_NAME: &str = "BMP180";
pub(crate) const CHIP_ID: u8 = 0x55;

pub(crate) const REG_CALIBRATION: u8 = 0xAA;
pub(crate) const REG_CHIP_ID: u8 = 0xD0;
pub(crate) const REG_CONTROL: u8 = 0xF4;
pub(crate) const REG_RESULT: u8 = 0xF6;

pub(crate) const CMD_TEMPERATURE: u8 = 0x2E;
pub(crate) const CMD_PRESSURE: u8 = 0x34;

/// Ultra low power mode, one sample per pressure reading.
const OVERSAMPLING: u8 = 0;
const CONVERSION_TIME_US: u32 = 4_500;

/// Factory calibration coefficients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calibration {
    pub ac1: i16,
    pub ac2: i16,
    pub ac3: i16,
    pub ac4: u16,
    pub ac5: u16,
    pub ac6: u16,
    pub b1: i16,
    pub b2: i16,
    pub mb: i16,
    pub mc: i16,
    pub md: i16,
}

impl Calibration {
    /// Decode the 22 byte block starting at `0xAA`
    pub fn from_bytes(raw: &[u8; 22]) -> Self {
        let word = |i: usize| [raw[2 * i], raw[2 * i + 1]];
        Self {
            ac1: i16::from_be_bytes(word(0)),
            ac2: i16::from_be_bytes(word(1)),
            ac3: i16::from_be_bytes(word(2)),
            ac4: u16::from_be_bytes(word(3)),
            ac5: u16::from_be_bytes(word(4)),
            ac6: u16::from_be_bytes(word(5)),
            b1: i16::from_be_bytes(word(6)),
            b2: i16::from_be_bytes(word(7)),
            mb: i16::from_be_bytes(word(8)),
            mc: i16::from_be_bytes(word(9)),
            md: i16::from_be_bytes(word(10)),
        }
    }

    /// The part guarantees no word reads back as `0x0000` or `0xFFFF`
    pub fn is_plausible(raw: &[u8; 22]) -> bool {
        raw.chunks_exact(2)
            .all(|word| word != [0x00, 0x00] && word != [0xFF, 0xFF])
    }

    fn b5(&self, raw_temperature: i32) -> Option<i64> {
        let x1 = ((i64::from(raw_temperature) - i64::from(self.ac6)) * i64::from(self.ac5)) >> 15;
        let x2 = (i64::from(self.mc) << 11).checked_div(x1 + i64::from(self.md))?;
        Some(x1 + x2)
    }

    /// Temperature in tenths of a degree Celsius, `None` if the
    /// coefficients cannot produce one
    pub fn temperature(&self, raw_temperature: i32) -> Option<i32> {
        i32::try_from((self.b5(raw_temperature)? + 8) >> 4).ok()
    }

    /// Pressure in pascal, `None` if the coefficients cannot produce one
    pub fn pressure(&self, raw_temperature: i32, raw_pressure: i32, oss: u8) -> Option<i32> {
        let b6 = self.b5(raw_temperature)? - 4000;
        let b6_squared = b6.checked_mul(b6)? >> 12;

        let x1 = i64::from(self.b2).checked_mul(b6_squared)? >> 11;
        let x2 = i64::from(self.ac2).checked_mul(b6)? >> 11;
        let x3 = x1.checked_add(x2)?;
        let b3 = ((i64::from(self.ac1) * 4 + x3).checked_shl(u32::from(oss))? + 2) / 4;

        let x1 = i64::from(self.ac3).checked_mul(b6)? >> 13;
        let x2 = i64::from(self.b1).checked_mul(b6_squared)? >> 16;
        let x3 = (x1.checked_add(x2)? + 2) >> 2;

        // The sensor's reference math runs these steps in unsigned 32 bit
        let b4 = u32::from(self.ac4).wrapping_mul((x3 + 32_768) as u32) >> 15;
        let b7 = (raw_pressure as u32)
            .wrapping_sub(b3 as u32)
            .wrapping_mul(50_000 >> oss);

        let p = if b7 < 0x8000_0000 {
            (b7 * 2).checked_div(b4)?
        } else {
            b7.checked_div(b4)?.wrapping_mul(2)
        };
        let p = i64::from(p as i32);

        let x1 = ((p >> 8) * (p >> 8) * 3038) >> 16;
        let x2 = (-7357 * p) >> 16;
        i32::try_from(p + ((x1 + x2 + 3791) >> 4)).ok()
    }
}

pub struct Bmp180<I, D> {
    i2c: I,
    delay: D,
    address: u8,
    calibration: Option<Calibration>,
}

impl<I, D> Bmp180<I, D>
where
    I: I2c,
    D: DelayNs,
{
    pub const fn new(i2c: I, delay: D) -> Self {
        Self {
            i2c,
            delay,
            address: DEFAULT_ADDRESS,
            calibration: None,
        }
    }

    fn bus_error(operation: &'static str, e: I::Error) -> SensorError {
        warn!("{}: {} failed: {:?}", SENSOR_NAME, operation, e);
        SensorError::ReadFailed {
            sensor: SENSOR_NAME,
            operation,
            details: "I2C transfer failed",
        }
    }

    /// Check the chip id and load the calibration block
    pub async fn init(&mut self) -> Result<Calibration, SensorError> {
        let mut id = [0u8; 1];
        self.i2c
            .write_read(self.address, &[REG_CHIP_ID], &mut id)
            .await
            .map_err(|e| Self::bus_error("read chip id", e))?;
        if id[0] != CHIP_ID {
            return Err(SensorError::ReadFailed {
                sensor: SENSOR_NAME,
                operation: "identify",
                details: "unexpected chip id",
            });
        }

        let mut raw = [0u8; 22];
        self.i2c
            .write_read(self.address, &[REG_CALIBRATION], &mut raw)
            .await
            .map_err(|e| Self::bus_error("read calibration", e))?;
        if !Calibration::is_plausible(&raw) {
            warn!("{}: calibration block is blank", SENSOR_NAME);
            return Err(SensorError::ReadFailed {
                sensor: SENSOR_NAME,
                operation: "read calibration",
                details: "calibration word out of range",
            });
        }
        let calibration = Calibration::from_bytes(&raw);
        debug!("{} calibration: {:?}", SENSOR_NAME, calibration);
        self.calibration = Some(calibration);
        Ok(calibration)
    }

    async fn convert(&mut self, command: u8, out: &mut [u8]) -> Result<(), SensorError> {
        self.i2c
            .write(self.address, &[REG_CONTROL, command])
            .await
            .map_err(|e| Self::bus_error("start conversion", e))?;
        self.delay.delay_us(CONVERSION_TIME_US).await;
        self.i2c
            .write_read(self.address, &[REG_RESULT], out)
            .await
            .map_err(|e| Self::bus_error("read conversion", e))
    }
}

impl<I, D> Sensor for Bmp180<I, D>
where
    I: I2c,
    D: DelayNs,
{
    type Readings = ClimateReadings;

    async fn read(&mut self) -> Result<ClimateReadings, SensorError> {
        let calibration = match self.calibration {
            Some(calibration) => calibration,
            None => self.init().await?,
        };

        let mut raw = [0u8; 2];
        self.convert(CMD_TEMPERATURE, &mut raw).await?;
        let ut = i32::from(u16::from_be_bytes(raw));

        let mut raw = [0u8; 3];
        self.convert(CMD_PRESSURE + (OVERSAMPLING << 6), &mut raw)
            .await?;
        let up = ((i32::from(raw[0]) << 16) | (i32::from(raw[1]) << 8) | i32::from(raw[2]))
            >> (8 - OVERSAMPLING);

        let compensated = calibration
            .temperature(ut)
            .zip(calibration.pressure(ut, up, OVERSAMPLING));
        let Some((temperature, pressure)) = compensated else {
            // Drop the coefficients so the next read reloads them
            self.calibration = None;
            return Err(SensorError::ReadFailed {
                sensor: SENSOR_NAME,
                operation: "compensate",
                details: "calibration does not fit the raw values",
            });
        };

        Ok(ClimateReadings {
            temperature_celsius: temperature as f32 / 10.0,
            pressure_pa: pressure as f32,
        })
    }
}
