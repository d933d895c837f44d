//! Test doubles for the hardware and network seams

use std::collections::VecDeque;
use std::string::{String, ToString};
use std::vec::Vec;

use core::fmt;

use embedded_hal_async::delay::DelayNs;
use embedded_hal_async::i2c::{self, I2c, Operation};
use embedded_io::{ErrorKind, ErrorType, ReadReady};
use embedded_io_async::{Read, Write};

use crate::commands::{FirmwareUpdater, UpdateOutcome};
use crate::display::StatusDisplay;
use crate::provisioning::{CredentialStore, PortalEvent, WifiCredentials, WifiPortal};
use crate::sensors::bmp180::{
    CHIP_ID, CMD_PRESSURE, CMD_TEMPERATURE, REG_CALIBRATION, REG_CHIP_ID, REG_CONTROL, REG_RESULT,
};
use crate::sensors::mhz19::{REQUEST_FRAME, RESPONSE_LEN, Response, checksum};
use crate::sensors::{ClimateReadings, Sensor, SensorError};
use crate::telemetry::{TelemetrySink, VirtualPin};

/// Build a well-formed MH-Z19 payload for `ppm`
pub fn valid_response(ppm: u16) -> Response {
    let [high, low] = ppm.to_be_bytes();
    let mut payload: Response = [high, low, 0x47, 0x00, 0x00, 0x00, 0x00];
    payload[RESPONSE_LEN - 1] = checksum(&payload);
    payload
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialFault(pub ErrorKind);

impl fmt::Display for SerialFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "serial fault: {:?}", self.0)
    }
}

impl core::error::Error for SerialFault {}

impl embedded_io::Error for SerialFault {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// Serial link replaying a fixed byte script
#[derive(Debug, Default)]
pub struct ScriptedSerial {
    rx: VecDeque<u8>,
    reply: Option<Vec<u8>>,
    written: Vec<u8>,
    consumed: usize,
    drained_fault: Option<ErrorKind>,
}

impl ScriptedSerial {
    /// Bytes already waiting in the receive buffer
    pub fn with_rx(bytes: &[u8]) -> Self {
        Self {
            rx: bytes.iter().copied().collect(),
            ..Self::default()
        }
    }

    /// Bytes delivered once the read command has been written
    pub fn replying(bytes: &[u8]) -> Self {
        Self {
            reply: Some(bytes.to_vec()),
            ..Self::default()
        }
    }

    /// Fail reads with `kind` instead of reporting end of stream
    pub fn fail_when_drained(mut self, kind: ErrorKind) -> Self {
        self.drained_fault = Some(kind);
        self
    }

    pub fn consumed(&self) -> usize {
        self.consumed
    }

    pub fn remaining(&mut self) -> &[u8] {
        self.rx.make_contiguous()
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }
}

impl ErrorType for ScriptedSerial {
    type Error = SerialFault;
}

impl ReadReady for ScriptedSerial {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.is_empty())
    }
}

impl Read for ScriptedSerial {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.rx.is_empty() {
            return match self.drained_fault {
                Some(kind) => Err(SerialFault(kind)),
                None => Ok(0),
            };
        }

        let mut count = 0;
        while count < buf.len() {
            let Some(byte) = self.rx.pop_front() else {
                break;
            };
            buf[count] = byte;
            count += 1;
        }
        self.consumed += count;
        Ok(count)
    }
}

impl Write for ScriptedSerial {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.written.extend_from_slice(buf);
        if self.written.ends_with(&REQUEST_FRAME) {
            if let Some(reply) = self.reply.take() {
                self.rx.extend(reply);
            }
        }
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

impl i2c::Error for BusFault {
    fn kind(&self) -> i2c::ErrorKind {
        i2c::ErrorKind::Bus
    }
}

/// Register-level BMP180 on a scripted I2C bus
///
/// Defaults to the datasheet worked example: calibration block, UT 27898
/// and UP 23843 at oversampling 0.
#[derive(Debug)]
pub struct ScriptedBmp180 {
    pub chip_id: u8,
    pub calibration: [u8; 22],
    pub raw_temperature: u16,
    pub raw_pressure: u32,
    pub failing: bool,
    pub calibration_reads: usize,
    pointer: u8,
    result: Vec<u8>,
}

impl ScriptedBmp180 {
    pub fn datasheet() -> Self {
        let words: [u16; 11] = [
            408,
            -72i16 as u16,
            -14383i16 as u16,
            32741,
            32757,
            23153,
            6190,
            4,
            -32768i16 as u16,
            -8711i16 as u16,
            2868,
        ];
        let mut calibration = [0u8; 22];
        for (slot, word) in calibration.chunks_exact_mut(2).zip(words) {
            slot.copy_from_slice(&word.to_be_bytes());
        }
        Self {
            chip_id: CHIP_ID,
            calibration,
            raw_temperature: 27898,
            raw_pressure: 23843,
            failing: false,
            calibration_reads: 0,
            pointer: 0,
            result: Vec::new(),
        }
    }

    fn fill(&mut self, buf: &mut [u8]) {
        let source: &[u8] = match self.pointer {
            REG_CHIP_ID => core::slice::from_ref(&self.chip_id),
            REG_CALIBRATION => {
                self.calibration_reads += 1;
                &self.calibration
            }
            REG_RESULT => &self.result,
            _ => &[],
        };
        for (out, byte) in buf.iter_mut().zip(source.iter().chain(core::iter::repeat(&0))) {
            *out = *byte;
        }
    }
}

impl i2c::ErrorType for ScriptedBmp180 {
    type Error = BusFault;
}

impl I2c for ScriptedBmp180 {
    async fn transaction(
        &mut self,
        _address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        if self.failing {
            return Err(BusFault);
        }
        for op in operations {
            match op {
                Operation::Write([REG_CONTROL, command]) => {
                    self.result = match *command {
                        CMD_TEMPERATURE => self.raw_temperature.to_be_bytes().to_vec(),
                        CMD_PRESSURE => (self.raw_pressure << 8).to_be_bytes()[1..].to_vec(),
                        _ => Vec::new(),
                    };
                }
                Operation::Write(bytes) => {
                    if let Some(register) = bytes.first() {
                        self.pointer = *register;
                    }
                }
                Operation::Read(buf) => self.fill(buf),
            }
        }
        Ok(())
    }
}

pub struct NoopDelay;

impl DelayNs for NoopDelay {
    async fn delay_ns(&mut self, _ns: u32) {}
}

/// Climate sensor returning a fixed reading, or failing
pub struct FixedClimate(pub Option<ClimateReadings>);

impl Sensor for FixedClimate {
    type Readings = ClimateReadings;

    async fn read(&mut self) -> Result<ClimateReadings, SensorError> {
        self.0.ok_or(SensorError::ReadFailed {
            sensor: "climate",
            operation: "measure",
            details: "not responding",
        })
    }
}

/// Sink recording every publish, optionally refusing one pin
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub published: Vec<(VirtualPin, String)>,
    pub refuse: Option<VirtualPin>,
}

impl RecordingSink {
    pub fn value(&self, pin: VirtualPin) -> Option<&str> {
        self.published
            .iter()
            .rev()
            .find(|(p, _)| *p == pin)
            .map(|(_, v)| v.as_str())
    }
}

impl TelemetrySink for RecordingSink {
    type Error = &'static str;

    async fn publish(&mut self, pin: VirtualPin, value: &str) -> Result<(), Self::Error> {
        if self.refuse == Some(pin) {
            return Err("link down");
        }
        self.published.push((pin, value.to_string()));
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingDisplay {
    pub frames: Vec<Vec<String>>,
}

impl StatusDisplay for RecordingDisplay {
    fn show(&mut self, lines: &[&str]) {
        self.frames
            .push(lines.iter().map(|line| line.to_string()).collect());
    }
}

#[derive(Debug)]
pub struct FakeUpdater {
    pub outcome: UpdateOutcome,
    pub requests: Vec<(String, String)>,
}

impl FakeUpdater {
    pub fn new(outcome: UpdateOutcome) -> Self {
        Self {
            outcome,
            requests: Vec::new(),
        }
    }
}

impl FirmwareUpdater for FakeUpdater {
    async fn update(&mut self, url: &str, version: &str) -> UpdateOutcome {
        self.requests.push((url.to_string(), version.to_string()));
        self.outcome
    }
}

/// Portal driven by a queue of scripted events
#[derive(Debug, Default)]
pub struct ScriptedPortal {
    pub stored: Option<WifiCredentials>,
    pub stored_connects: bool,
    pub events: VecDeque<PortalEvent>,
    /// Outcome of successive join attempts, `true` when exhausted
    pub joins: VecDeque<bool>,
    pub served: Vec<String>,
    pub joined: Vec<WifiCredentials>,
    pub closed: bool,
    pub erase_count: usize,
}

impl CredentialStore for ScriptedPortal {
    type Error = &'static str;

    fn has_stored_credentials(&mut self) -> bool {
        self.stored.is_some()
    }

    fn erase_credentials(&mut self) -> Result<(), Self::Error> {
        self.stored = None;
        self.erase_count += 1;
        Ok(())
    }
}

impl WifiPortal for ScriptedPortal {
    async fn connect_stored(&mut self) -> bool {
        self.stored.is_some() && self.stored_connects
    }

    async fn serve(&mut self, page: &str) {
        self.served.push(page.to_string());
    }

    async fn next_event(&mut self) -> PortalEvent {
        self.events.pop_front().unwrap_or(PortalEvent::TimedOut)
    }

    async fn join(&mut self, wifi: &WifiCredentials) -> bool {
        self.joined.push(wifi.clone());
        let ok = self.joins.pop_front().unwrap_or(true);
        if ok {
            self.stored = Some(wifi.clone());
        }
        ok
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
