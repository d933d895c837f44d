//! MH-Z19 UART with a receive timeout

use core::fmt;

use embassy_time::{Duration, with_timeout};
use embedded_io::{ErrorKind, ErrorType, ReadReady};
use embedded_io_async::{Read, Write};
use esp_hal::Async;
use esp_hal::uart::{RxError, TxError, Uart};

/// How long a read waits for the first byte before giving up.
pub const READ_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UartError {
    Timeout,
    Rx(RxError),
    Tx(TxError),
}

impl fmt::Display for UartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => f.write_str("receive timed out"),
            Self::Rx(e) => write!(f, "receive failed: {:?}", e),
            Self::Tx(e) => write!(f, "transmit failed: {:?}", e),
        }
    }
}

impl core::error::Error for UartError {}

impl embedded_io::Error for UartError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout => ErrorKind::TimedOut,
            Self::Rx(_) | Self::Tx(_) => ErrorKind::Other,
        }
    }
}

/// Async UART whose reads fail with [`UartError::Timeout`] instead of
/// waiting forever on a silent sensor
pub struct TimedUart<'d> {
    uart: Uart<'d, Async>,
    timeout: Duration,
}

impl<'d> TimedUart<'d> {
    pub fn new(uart: Uart<'d, Async>) -> Self {
        Self {
            uart,
            timeout: READ_TIMEOUT,
        }
    }
}

impl ErrorType for TimedUart<'_> {
    type Error = UartError;
}

impl ReadReady for TimedUart<'_> {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(self.uart.read_ready())
    }
}

impl Read for TimedUart<'_> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        with_timeout(self.timeout, self.uart.read_async(buf))
            .await
            .map_err(|_| UartError::Timeout)?
            .map_err(UartError::Rx)
    }
}

impl Write for TimedUart<'_> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.uart.write_async(buf).await.map_err(UartError::Tx)
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.uart.flush_async().await.map_err(UartError::Tx)
    }
}
