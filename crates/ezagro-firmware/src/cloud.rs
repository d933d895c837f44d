//! Blynk cloud link: telemetry out, virtual pin commands in

use alloc::string::String;
use alloc::vec::Vec;

use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_net::Stack;
use embassy_time::{Duration, Timer, with_timeout};
use log::{debug, info, warn};

use ezagro_core::cloud::{
    CloudError, Frame, MessageIds, STATUS_OK, command, decode, encode_login, encode_ping,
    encode_response, encode_virtual_write, parse_virtual_write,
};
use ezagro_core::commands::{REMOTE_COMMANDS, RemoteCommand};
use ezagro_core::constants::{CLOUD_HOST, CLOUD_PORT};
use ezagro_core::telemetry::{TelemetrySink, VirtualPin};

use crate::network::write_all;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT: Duration = Duration::from_secs(10);
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Inbound frames buffered beyond this are dropped.
const MAX_PENDING: usize = 512;

/// Telemetry sink and command source over one TCP connection
///
/// The link logs in lazily: the first publish, or [`BlynkLink::poll`] while
/// offline, opens the connection. Inbound virtual pin writes are turned into
/// [`RemoteCommand`]s on [`REMOTE_COMMANDS`].
pub struct BlynkLink<'a> {
    stack: Stack<'static>,
    socket: TcpSocket<'a>,
    token: String,
    ids: MessageIds,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    online: bool,
}

impl<'a> BlynkLink<'a> {
    pub fn new(
        stack: Stack<'static>,
        rx_buf: &'a mut [u8],
        tx_buf: &'a mut [u8],
        token: &str,
    ) -> Self {
        Self {
            stack,
            socket: TcpSocket::new(stack, rx_buf, tx_buf),
            token: token.into(),
            ids: MessageIds::new(),
            inbound: Vec::new(),
            outbound: Vec::new(),
            online: false,
        }
    }

    async fn send_outbound(&mut self) -> Result<(), CloudError> {
        let sent = write_all(&mut self.socket, &self.outbound).await;
        self.outbound.clear();
        sent.map_err(|e| {
            warn!("Cloud write failed: {:?}", e);
            self.online = false;
            CloudError::Connection
        })
    }

    async fn connect(&mut self) -> Result<(), CloudError> {
        self.socket.abort();
        self.inbound.clear();

        let addrs = self
            .stack
            .dns_query(CLOUD_HOST, DnsQueryType::A)
            .await
            .map_err(|e| {
                warn!("DNS lookup of {} failed: {:?}", CLOUD_HOST, e);
                CloudError::Connection
            })?;
        let addr = *addrs.first().ok_or(CloudError::Connection)?;

        match with_timeout(CONNECT_TIMEOUT, self.socket.connect((addr, CLOUD_PORT))).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Cloud connect failed: {:?}", e);
                return Err(CloudError::Connection);
            }
            Err(_) => {
                warn!("Cloud connect timed out");
                return Err(CloudError::Connection);
            }
        }

        let login_id = self.ids.next_id();
        encode_login(&mut self.outbound, login_id, &self.token)?;
        self.send_outbound().await?;

        let mut chunk = [0u8; 64];
        loop {
            let n = match with_timeout(CONNECT_TIMEOUT, self.socket.read(&mut chunk)).await {
                Ok(Ok(n)) if n > 0 => n,
                _ => return Err(CloudError::Connection),
            };
            self.inbound.extend_from_slice(&chunk[..n]);
            if let Some((Frame::Response { message_id, status }, used)) = decode(&self.inbound) {
                self.inbound.drain(..used);
                if message_id != login_id {
                    continue;
                }
                if status != STATUS_OK {
                    warn!("Cloud login rejected with status {}", status);
                    return Err(CloudError::Rejected(status));
                }
                break;
            }
        }

        info!("Connected to {}:{}", CLOUD_HOST, CLOUD_PORT);
        self.online = true;
        Ok(())
    }

    /// Wait for inbound traffic and dispatch it
    ///
    /// Cancel safe: bytes already read stay buffered for the next call.
    pub async fn poll(&mut self) {
        if !self.online {
            Timer::after(RECONNECT_DELAY).await;
            let _ = self.connect().await;
            return;
        }

        let mut chunk = [0u8; 128];
        match with_timeout(HEARTBEAT, self.socket.read(&mut chunk)).await {
            Err(_) => {
                let id = self.ids.next_id();
                if encode_ping(&mut self.outbound, id).is_ok() {
                    let _ = self.send_outbound().await;
                }
            }
            Ok(Ok(0)) => {
                warn!("Cloud closed the connection");
                self.online = false;
            }
            Ok(Err(e)) => {
                warn!("Cloud read failed: {:?}", e);
                self.online = false;
            }
            Ok(Ok(n)) => {
                if self.inbound.len() + n > MAX_PENDING {
                    warn!("Dropping {} buffered cloud bytes", self.inbound.len());
                    self.inbound.clear();
                }
                self.inbound.extend_from_slice(&chunk[..n]);
                self.dispatch().await;
            }
        }
    }

    async fn dispatch(&mut self) {
        loop {
            let (reply, pin_write, used) = match decode(&self.inbound) {
                None => break,
                Some((Frame::Response { .. }, used)) => (None, None, used),
                Some((
                    Frame::Message {
                        command,
                        message_id,
                        body,
                    },
                    used,
                )) => match command {
                    command::PING => (Some(message_id), None, used),
                    command::HARDWARE => (Some(message_id), parse_virtual_write(body), used),
                    other => {
                        debug!("Ignoring cloud command {}", other);
                        (None, None, used)
                    }
                },
            };
            self.inbound.drain(..used);

            if let Some((pin, value)) = pin_write {
                match RemoteCommand::from_pin(pin, value) {
                    Some(cmd) => {
                        if REMOTE_COMMANDS.try_send(cmd).is_err() {
                            warn!("Command queue full, dropping {:?}", cmd);
                        }
                    }
                    None => debug!("No handler for {}", pin),
                }
            }
            if let Some(id) = reply {
                encode_response(&mut self.outbound, id, STATUS_OK);
            }
        }
        if !self.outbound.is_empty() {
            let _ = self.send_outbound().await;
        }
    }
}

impl TelemetrySink for BlynkLink<'_> {
    type Error = CloudError;

    async fn publish(&mut self, pin: VirtualPin, value: &str) -> Result<(), Self::Error> {
        if !self.online {
            self.connect().await?;
        }
        let id = self.ids.next_id();
        encode_virtual_write(&mut self.outbound, id, pin, value)?;
        self.send_outbound().await
    }
}
