//! Blynk cloud wire framing
//!
//! Every frame starts with a 5 byte header: command, big-endian message id and
//! a big-endian length. For a [`command::RESPONSE`] the length field carries
//! the status code and no body follows; for everything else it is the body
//! length. Hardware bodies are NUL separated tokens such as `vw\05\0606`.

use alloc::vec::Vec;
use core::fmt::Write;

use thiserror_no_std::Error;

use crate::telemetry::VirtualPin;

pub mod command {
    pub const RESPONSE: u8 = 0;
    pub const LOGIN: u8 = 2;
    pub const PING: u8 = 6;
    pub const HARDWARE: u8 = 20;
}

pub const HEADER_LEN: usize = 5;
pub const STATUS_OK: u16 = 200;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloudError {
    #[error("frame body of {0} bytes does not fit the length field")]
    BodyTooLarge(usize),
    #[error("server rejected the request with status {0}")]
    Rejected(u16),
    #[error("connection to the cloud failed")]
    Connection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame<'a> {
    Response { message_id: u16, status: u16 },
    Message {
        command: u8,
        message_id: u16,
        body: &'a [u8],
    },
}

/// Message id source, skipping 0 which the server reserves
#[derive(Debug, Default)]
pub struct MessageIds {
    last: u16,
}

impl MessageIds {
    pub const fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next_id(&mut self) -> u16 {
        self.last = self.last.checked_add(1).unwrap_or(1);
        self.last
    }
}

fn push_frame(out: &mut Vec<u8>, command: u8, message_id: u16, body: &[u8]) -> Result<(), CloudError> {
    let len = u16::try_from(body.len()).map_err(|_| CloudError::BodyTooLarge(body.len()))?;
    out.push(command);
    out.extend_from_slice(&message_id.to_be_bytes());
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(body);
    Ok(())
}

pub fn encode_login(out: &mut Vec<u8>, message_id: u16, token: &str) -> Result<(), CloudError> {
    push_frame(out, command::LOGIN, message_id, token.as_bytes())
}

pub fn encode_ping(out: &mut Vec<u8>, message_id: u16) -> Result<(), CloudError> {
    push_frame(out, command::PING, message_id, &[])
}

pub fn encode_response(out: &mut Vec<u8>, message_id: u16, status: u16) {
    out.push(command::RESPONSE);
    out.extend_from_slice(&message_id.to_be_bytes());
    out.extend_from_slice(&status.to_be_bytes());
}

/// Append a virtual pin write of `value` to `out`
pub fn encode_virtual_write(
    out: &mut Vec<u8>,
    message_id: u16,
    pin: VirtualPin,
    value: &str,
) -> Result<(), CloudError> {
    let mut body = alloc::string::String::with_capacity(8 + value.len());
    let _ = write!(body, "vw\0{}\0{}", pin.0, value);
    push_frame(out, command::HARDWARE, message_id, body.as_bytes())
}

/// Split the first complete frame off `buf`
///
/// Returns the frame and the number of bytes it occupies, or `None` when
/// `buf` does not hold a complete frame yet.
pub fn decode(buf: &[u8]) -> Option<(Frame<'_>, usize)> {
    if buf.len() < HEADER_LEN {
        return None;
    }
    let command = buf[0];
    let message_id = u16::from_be_bytes([buf[1], buf[2]]);
    let len = u16::from_be_bytes([buf[3], buf[4]]);

    if command == command::RESPONSE {
        return Some((
            Frame::Response {
                message_id,
                status: len,
            },
            HEADER_LEN,
        ));
    }

    let end = HEADER_LEN + usize::from(len);
    let body = buf.get(HEADER_LEN..end)?;
    Some((
        Frame::Message {
            command,
            message_id,
            body,
        },
        end,
    ))
}

/// Parse a hardware body of the form `vw\0<pin>\0<value>`
///
/// The value is parsed as an integer, a fractional value is truncated.
pub fn parse_virtual_write(body: &[u8]) -> Option<(VirtualPin, i32)> {
    let text = core::str::from_utf8(body).ok()?;
    let mut tokens = text.split('\0');
    if tokens.next()? != "vw" {
        return None;
    }
    let pin = tokens.next()?.parse::<u8>().ok()?;
    let raw = tokens.next()?;
    let value = match raw.parse::<i32>() {
        Ok(value) => value,
        Err(_) => raw.parse::<f32>().ok()? as i32,
    };
    Some((VirtualPin(pin), value))
}
