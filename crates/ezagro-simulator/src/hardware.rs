//! Simulated sensors

use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

use embedded_hal_async::delay::DelayNs;
use embedded_io::{ErrorKind, ErrorType, ReadReady};
use embedded_io_async::{Read, Write};
use log::debug;

use ezagro_core::sensors::mhz19::{REQUEST_FRAME, RESPONSE_LEN, Response, checksum};
use ezagro_core::sensors::{ClimateReadings, Sensor, SensorError};

/// Blocking delay, the simulator runs one future at a time
pub struct StdDelay;

impl DelayNs for StdDelay {
    async fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(u64::from(ns)));
    }
}

/// Kind of broken answer injected on faulty exchanges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    Silent,
    ShortRead,
    BadChecksum,
}

const FAULT_CYCLE: [Fault; 3] = [Fault::Silent, Fault::ShortRead, Fault::BadChecksum];

/// Serial link with an MH-Z19 on the other end
///
/// Each read command queues a reply preceded by a little line noise. Every
/// `fault_every`-th exchange answers with a fault instead, cycling through
/// silence, a truncated reply and a corrupted checksum.
pub struct SimulatedMhz19Link {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    exchanges: u32,
    fault_every: u32,
    started: Instant,
}

impl SimulatedMhz19Link {
    /// `fault_every` of 0 disables fault injection
    pub fn new(fault_every: u32) -> Self {
        Self {
            rx: VecDeque::new(),
            tx: Vec::new(),
            exchanges: 0,
            fault_every,
            started: Instant::now(),
        }
    }

    fn ppm(&self) -> u16 {
        let t = self.started.elapsed().as_secs_f64();
        (600.0 + 200.0 * (t / 300.0).sin() + 30.0 * (t / 41.0).cos()) as u16
    }

    fn fault(&self) -> Option<Fault> {
        if self.fault_every == 0 || self.exchanges % self.fault_every != 0 {
            return None;
        }
        let index = (self.exchanges / self.fault_every) as usize % FAULT_CYCLE.len();
        Some(FAULT_CYCLE[index])
    }

    fn answer(&mut self) {
        self.exchanges += 1;

        let [high, low] = self.ppm().to_be_bytes();
        let mut payload: Response = [high, low, 0x47, 0x00, 0x00, 0x00, 0x00];
        payload[RESPONSE_LEN - 1] = checksum(&payload);

        let fault = self.fault();
        debug!("MH-Z19 exchange {} fault {:?}", self.exchanges, fault);

        self.rx.extend([0x00, 0x12]);
        match fault {
            None => {
                self.rx.extend([0xFF, 0x86]);
                self.rx.extend(payload);
            }
            Some(Fault::Silent) => {}
            Some(Fault::ShortRead) => {
                self.rx.extend([0xFF, 0x86]);
                self.rx.extend(&payload[..3]);
            }
            Some(Fault::BadChecksum) => {
                payload[RESPONSE_LEN - 1] ^= 0x01;
                self.rx.extend([0xFF, 0x86]);
                self.rx.extend(payload);
            }
        }
    }
}

/// Receive timeout of the simulated UART
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkTimeout;

impl fmt::Display for LinkTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("receive timed out")
    }
}

impl std::error::Error for LinkTimeout {}

impl embedded_io::Error for LinkTimeout {
    fn kind(&self) -> ErrorKind {
        ErrorKind::TimedOut
    }
}

impl ErrorType for SimulatedMhz19Link {
    type Error = LinkTimeout;
}

impl ReadReady for SimulatedMhz19Link {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.is_empty())
    }
}

impl Read for SimulatedMhz19Link {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if self.rx.is_empty() {
            return Err(LinkTimeout);
        }
        let count = buf.len().min(self.rx.len());
        for (slot, byte) in buf.iter_mut().zip(self.rx.drain(..count)) {
            *slot = byte;
        }
        Ok(count)
    }
}

impl Write for SimulatedMhz19Link {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.tx.extend_from_slice(buf);
        if self.tx.ends_with(&REQUEST_FRAME) {
            self.tx.clear();
            self.rx.clear();
            self.answer();
        }
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Pressure/temperature sensor producing slow synthetic waves
pub struct SyntheticClimate {
    started: Instant,
}

impl SyntheticClimate {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Sensor for SyntheticClimate {
    type Readings = ClimateReadings;

    async fn read(&mut self) -> Result<ClimateReadings, SensorError> {
        let t = self.started.elapsed().as_secs_f64();
        Ok(ClimateReadings {
            temperature_celsius: (23.0 + 3.0 * (t / 120.0).sin() + 0.5 * (t / 37.0).cos()) as f32,
            pressure_pa: (101_325.0 + 150.0 * (t / 600.0).sin()) as f32,
        })
    }
}
