//! MH-Z19 CO2 sensor protocol
//!
//! The sensor sits on a dedicated UART. Each exchange writes a fixed 9 byte
//! read command, then scans the incoming bytes for the `0xFF 0x86` response
//! header and reads the 7 byte payload that follows it. The last payload byte
//! is a checksum over the command byte and the first six payload bytes.
//!
//! The header scan is a plain two-state scanner: after a `0xFF` the next byte
//! is consumed whatever it is, so `0xFF 0xFF 0x86` does not synchronize.

use embedded_hal_async::delay::DelayNs;
use embedded_io::{Error as _, ErrorKind, ReadExactError, ReadReady};
use embedded_io_async::{Read, Write};
use log::{debug, warn};
use thiserror_no_std::Error;

use super::{Sensor, SensorError};
use crate::constants::CO2_RESPONSE_SETTLE_MS;

/// "Read CO2 concentration" command, checksum included.
pub const REQUEST_FRAME: [u8; 9] = [0xFF, 0x01, 0x86, 0x00, 0x00, 0x00, 0x00, 0x00, 0x79];

pub const RESPONSE_LEN: usize = 7;

const START_BYTE: u8 = 0xFF;
const READ_CO2_COMMAND: u8 = 0x86;

const SENSOR_NAME: &str = "MH-Z19";

/// Payload following the response header
pub type Response = [u8; RESPONSE_LEN];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("response header not found")]
    HeaderNotFound,
    #[error("response incomplete within the read timeout")]
    Timeout,
    #[error("checksum mismatch: computed {computed:#04x}, received {received:#04x}")]
    ChecksumMismatch { computed: u8, received: u8 },
    #[error("serial transport error: {0:?}")]
    Transport(ErrorKind),
}

impl DecodeError {
    fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::TimedOut => Self::Timeout,
            other => Self::Transport(other),
        }
    }
}

pub const fn request_frame() -> [u8; 9] {
    REQUEST_FRAME
}

/// Checksum the sensor appends to a response: the two's complement of the
/// command byte plus the first six payload bytes.
pub fn checksum(payload: &Response) -> u8 {
    let sum = payload[..6]
        .iter()
        .fold(READ_CO2_COMMAND, |acc, byte| acc.wrapping_add(*byte));
    0xFFu8.wrapping_sub(sum).wrapping_add(1)
}

/// Validate a response and extract the concentration in ppm
pub fn decode(payload: &Response) -> Result<u16, DecodeError> {
    let computed = checksum(payload);
    if payload[6] != computed {
        return Err(DecodeError::ChecksumMismatch {
            computed,
            received: payload[6],
        });
    }
    Ok(u16::from_be_bytes([payload[0], payload[1]]))
}

async fn read_byte<S: Read>(stream: &mut S) -> Result<Option<u8>, S::Error> {
    let mut byte = [0u8; 1];
    match stream.read(&mut byte).await? {
        0 => Ok(None),
        _ => Ok(Some(byte[0])),
    }
}

/// Consume bytes while they are available until `0xFF 0x86` is seen
///
/// Returns `false` once the stream runs dry without a header.
pub async fn find_header<S>(stream: &mut S) -> Result<bool, S::Error>
where
    S: Read + ReadReady,
{
    while stream.read_ready()? {
        match read_byte(stream).await? {
            None => break,
            Some(START_BYTE) => {}
            Some(_) => continue,
        }

        if !stream.read_ready()? {
            break;
        }
        if read_byte(stream).await? == Some(READ_CO2_COMMAND) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Read the payload following a header found by [`find_header`]
pub async fn read_response<S: Read>(stream: &mut S) -> Result<Response, DecodeError> {
    let mut response = [0u8; RESPONSE_LEN];
    stream
        .read_exact(&mut response)
        .await
        .map_err(|e| match e {
            ReadExactError::UnexpectedEof => DecodeError::Timeout,
            ReadExactError::Other(e) => DecodeError::from_kind(e.kind()),
        })?;
    Ok(response)
}

/// Typed readings from the MH-Z19 sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Co2Readings {
    pub co2_ppm: u16,
}

/// MH-Z19 attached to an exclusively owned serial link
///
/// Owning the link means only one request/response exchange can be in flight.
pub struct Mhz19Sensor<S, D> {
    serial: S,
    delay: D,
}

impl<S, D> Mhz19Sensor<S, D>
where
    S: Read + Write + ReadReady,
    D: DelayNs,
{
    pub const fn new(serial: S, delay: D) -> Self {
        Self { serial, delay }
    }

    pub fn release(self) -> (S, D) {
        (self.serial, self.delay)
    }

    /// Run one request/response exchange
    pub async fn exchange(&mut self) -> Result<u16, DecodeError> {
        self.serial
            .write_all(&REQUEST_FRAME)
            .await
            .map_err(|e| DecodeError::from_kind(e.kind()))?;
        self.serial
            .flush()
            .await
            .map_err(|e| DecodeError::from_kind(e.kind()))?;

        self.delay.delay_ms(CO2_RESPONSE_SETTLE_MS).await;

        let found = find_header(&mut self.serial)
            .await
            .map_err(|e| DecodeError::from_kind(e.kind()))?;
        if !found {
            return Err(DecodeError::HeaderNotFound);
        }

        let response = read_response(&mut self.serial).await?;
        let ppm = decode(&response).inspect_err(|e| warn!("CO2: {}", e))?;
        debug!("CO2: {} ppm", ppm);
        Ok(ppm)
    }
}

impl<S, D> Sensor for Mhz19Sensor<S, D>
where
    S: Read + Write + ReadReady,
    D: DelayNs,
{
    type Readings = Co2Readings;

    async fn read(&mut self) -> Result<Co2Readings, SensorError> {
        self.exchange()
            .await
            .map(|co2_ppm| Co2Readings { co2_ppm })
            .map_err(|error| SensorError::Decode {
                sensor: SENSOR_NAME,
                error,
            })
    }
}
