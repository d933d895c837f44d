//! WiFi station, provisioning access point and the portal's HTTP server

use alloc::format;
use alloc::string::String;

use embassy_net::Stack;
use embassy_net::tcp::TcpSocket;
use embassy_time::{Duration, Instant, Timer, with_deadline, with_timeout};
use esp_radio::wifi::{AccessPointConfig, AuthMethod, ClientConfig, ModeConfig, WifiController};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use ezagro_core::constants::{PORTAL_PASSWORD, PORTAL_SSID, PORTAL_TIMEOUT};
use ezagro_core::http::{MAX_REQUEST_SIZE, parse_request, response_head};
use ezagro_core::provisioning::portal::SAVE_PATH;
use ezagro_core::provisioning::{
    CredentialStore, PortalEvent, PortalSubmission, WifiCredentials, WifiPortal, parse_submission,
};
use ezagro_core::storage::BlobStorage;

const HTTP_PORT: u16 = 80;
const JOIN_TIMEOUT: Duration = Duration::from_secs(20);
const DHCP_TIMEOUT: Duration = Duration::from_secs(15);
const SOCKET_TIMEOUT: Duration = Duration::from_secs(10);

const SAVED_PAGE: &str = "<!DOCTYPE html><html><body><h1>Saved</h1>\
    <p>Connecting the node to your network.</p></body></html>";

#[derive(Serialize, Deserialize)]
struct StoredWifi {
    ssid: String,
    password: String,
}

/// WiFi controller plus the station and access point network stacks
///
/// The network joined last is kept in `credentials` so the next boot can
/// rejoin without the portal.
pub struct Network<C> {
    controller: WifiController<'static>,
    station: Stack<'static>,
    access_point: Stack<'static>,
    credentials: C,
    client: Option<ClientConfig>,
    portal_open: bool,
    page: String,
    deadline: Option<Instant>,
}

impl<C: BlobStorage> Network<C> {
    pub fn new(
        controller: WifiController<'static>,
        station: Stack<'static>,
        access_point: Stack<'static>,
        credentials: C,
    ) -> Self {
        Self {
            controller,
            station,
            access_point,
            credentials,
            client: None,
            portal_open: false,
            page: String::new(),
            deadline: None,
        }
    }

    /// Stack of the station interface, used by the cloud link and updates
    pub fn station(&self) -> Stack<'static> {
        self.station
    }

    fn load_credentials(&mut self) -> Option<WifiCredentials> {
        let len = self.credentials.stored_len().ok()??;
        let mut buf = alloc::vec![0u8; len];
        let read = self.credentials.read(&mut buf).ok()?;
        let stored: StoredWifi = serde_json::from_slice(&buf[..read])
            .inspect_err(|e| warn!("Stored network is unreadable: {}", e))
            .ok()?;
        WifiCredentials::new(&stored.ssid, &stored.password).ok()
    }

    fn remember(&mut self, wifi: &WifiCredentials) {
        let stored = StoredWifi {
            ssid: wifi.ssid().into(),
            password: wifi.password().into(),
        };
        let saved = serde_json::to_vec(&stored)
            .map_err(|e| warn!("Failed to encode network: {}", e))
            .and_then(|bytes| {
                self.credentials
                    .replace(&bytes)
                    .map_err(|e| warn!("Failed to store network: {:?}", e))
            });
        if saved.is_ok() {
            info!("Remembered network {}", wifi.ssid());
        }
    }

    fn access_point_config() -> AccessPointConfig {
        AccessPointConfig::default()
            .with_ssid(PORTAL_SSID.into())
            .with_password(PORTAL_PASSWORD.into())
            .with_auth_method(AuthMethod::Wpa2Personal)
    }

    async fn apply(&mut self, mode: ModeConfig) -> bool {
        if matches!(self.controller.is_started(), Ok(true)) {
            if let Err(e) = self.controller.stop_async().await {
                warn!("Wi-Fi stop error: {:?}", e);
            }
        }
        if let Err(e) = self.controller.set_config(&mode) {
            warn!("Wi-Fi set_config error: {:?}", e);
            return false;
        }
        if let Err(e) = self.controller.start_async().await {
            warn!("Wi-Fi start error: {:?}", e);
            return false;
        }
        true
    }

    async fn connect(&mut self, wifi: &WifiCredentials) -> bool {
        let client = ClientConfig::default()
            .with_ssid(wifi.ssid().into())
            .with_password(wifi.password().into());
        let mode = if self.portal_open {
            ModeConfig::ApSta(client.clone(), Self::access_point_config())
        } else {
            ModeConfig::Client(client.clone())
        };
        if !self.apply(mode).await {
            return false;
        }

        match with_timeout(JOIN_TIMEOUT, self.controller.connect_async()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Wi-Fi connect error: {:?}", e);
                return false;
            }
            Err(_) => {
                warn!("Wi-Fi connect timed out");
                return false;
            }
        }

        if with_timeout(DHCP_TIMEOUT, self.station.wait_config_up())
            .await
            .is_err()
        {
            warn!("No IPv4 configuration within {:?}", DHCP_TIMEOUT);
            return false;
        }
        if let Some(config) = self.station.config_v4() {
            info!("Wi-Fi link up: ip={}", config.address.address());
        }
        self.client = Some(client);
        true
    }

    /// Answer one portal connection, returning a submission if one was posted
    async fn handle_connection(
        socket: &mut TcpSocket<'_>,
        page: &str,
    ) -> Result<Option<PortalSubmission>, embassy_net::tcp::Error> {
        let mut buf = [0u8; MAX_REQUEST_SIZE];
        let mut total = 0;

        let request = loop {
            let n = socket.read(&mut buf[total..]).await?;
            if n == 0 {
                return Ok(None);
            }
            total += n;
            match parse_request(&buf[..total]) {
                Ok(Some(request)) => break request,
                Ok(None) => continue,
                Err(e) => {
                    warn!("Bad portal request: {}", e);
                    let text = format!("{}", e);
                    write_response(socket, "400 Bad Request", "text/plain", &text).await?;
                    return Ok(None);
                }
            }
        };

        if request.method == "POST" && request.path == SAVE_PATH {
            let body = core::str::from_utf8(request.body).unwrap_or("");
            match parse_submission(body) {
                Ok(submission) => {
                    write_response(socket, "200 OK", "text/html", SAVED_PAGE).await?;
                    return Ok(Some(submission));
                }
                Err(e) => warn!("Rejected portal form: {}", e),
            }
        }

        // Any other path gets the form so OS connectivity checks land on it
        write_response(socket, "200 OK", "text/html", page).await?;
        Ok(None)
    }
}

pub async fn write_all(
    socket: &mut TcpSocket<'_>,
    mut bytes: &[u8],
) -> Result<(), embassy_net::tcp::Error> {
    while !bytes.is_empty() {
        let n = socket.write(bytes).await?;
        if n == 0 {
            return Err(embassy_net::tcp::Error::ConnectionReset);
        }
        bytes = &bytes[n..];
    }
    Ok(())
}

async fn write_response(
    socket: &mut TcpSocket<'_>,
    status: &str,
    content_type: &str,
    body: &str,
) -> Result<(), embassy_net::tcp::Error> {
    let head = response_head(status, content_type, body.len());
    write_all(socket, head.as_bytes()).await?;
    write_all(socket, body.as_bytes()).await?;
    socket.flush().await
}

impl<C: BlobStorage> CredentialStore for Network<C> {
    type Error = C::Error;

    fn has_stored_credentials(&mut self) -> bool {
        matches!(self.credentials.stored_len(), Ok(Some(_)))
    }

    fn erase_credentials(&mut self) -> Result<(), Self::Error> {
        self.client = None;
        self.credentials.format()
    }
}

impl<C: BlobStorage> WifiPortal for Network<C> {
    async fn connect_stored(&mut self) -> bool {
        let Some(wifi) = self.load_credentials() else {
            return false;
        };
        info!("Connecting to {}", wifi.ssid());
        self.connect(&wifi).await
    }

    async fn serve(&mut self, page: &str) {
        if !self.portal_open {
            info!("Opening access point {}", PORTAL_SSID);
            self.portal_open = self.apply(ModeConfig::AccessPoint(Self::access_point_config())).await;
            self.deadline = Some(Instant::now() + PORTAL_TIMEOUT);
        }
        self.page.clear();
        self.page.push_str(page);
    }

    async fn next_event(&mut self) -> PortalEvent {
        let deadline = *self
            .deadline
            .get_or_insert_with(|| Instant::now() + PORTAL_TIMEOUT);
        if !self.portal_open {
            Timer::at(deadline).await;
            return PortalEvent::TimedOut;
        }

        let mut rx_buf = [0u8; 1024];
        let mut tx_buf = [0u8; 2048];
        loop {
            let mut socket = TcpSocket::new(self.access_point, &mut rx_buf, &mut tx_buf);
            socket.set_timeout(Some(SOCKET_TIMEOUT));

            match with_deadline(deadline, socket.accept(HTTP_PORT)).await {
                Err(_) => return PortalEvent::TimedOut,
                Ok(Err(e)) => {
                    warn!("Portal accept error: {:?}", e);
                    continue;
                }
                Ok(Ok(())) => {}
            }

            let handled = with_deadline(deadline, Self::handle_connection(&mut socket, &self.page)).await;
            socket.close();
            let _ = with_timeout(Duration::from_millis(500), socket.flush()).await;
            socket.abort();

            match handled {
                Err(_) => return PortalEvent::TimedOut,
                Ok(Ok(Some(submission))) => return PortalEvent::Submitted(submission),
                Ok(Ok(None)) => {}
                Ok(Err(e)) => warn!("Portal connection error: {:?}", e),
            }
        }
    }

    async fn join(&mut self, wifi: &WifiCredentials) -> bool {
        info!("Joining {}", wifi.ssid());
        if !self.connect(wifi).await {
            return false;
        }
        self.remember(wifi);
        true
    }

    async fn close(&mut self) {
        if !self.portal_open {
            return;
        }
        self.portal_open = false;
        self.deadline = None;
        self.page = String::new();
        if let Some(client) = self.client.clone() {
            if let Err(e) = self.controller.set_config(&ModeConfig::Client(client)) {
                warn!("Failed to shut the access point down: {:?}", e);
            }
        }
        info!("Access point closed");
    }
}
