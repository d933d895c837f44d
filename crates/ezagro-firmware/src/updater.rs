//! HTTP firmware update into the inactive OTA slot

use alloc::boxed::Box;
use alloc::vec::Vec;

use embassy_net::Stack;
use embassy_net::dns::DnsQueryType;
use embassy_net::tcp::TcpSocket;
use embassy_time::Duration;
use embedded_storage::{ReadStorage, Storage};
use esp_bootloader_esp_idf::ota::OtaImageState;
use esp_bootloader_esp_idf::ota_updater::OtaUpdater;
use esp_bootloader_esp_idf::partitions::PARTITION_TABLE_MAX_LEN;
use esp_storage::FlashStorage;
use log::{info, warn};

use ezagro_core::commands::{FirmwareUpdater, UpdateOutcome};
use ezagro_core::http::{content_length, get_request, header_end, split_url, status_code};

use crate::network::write_all;

const VERSION_HEADER: &str = "x-firmware-version";
const SOCKET_TIMEOUT: Duration = Duration::from_secs(15);
const SECTOR_SIZE: usize = 4096;
const HEAD_MAX: usize = 1024;

/// Asks the update server for a newer image and flashes it
///
/// The server answers `304` when the node is current and `200` with the raw
/// application image otherwise. The image goes to the slot that is not
/// running; the bootloader switches to it on the next restart.
pub struct HttpUpdater {
    stack: Stack<'static>,
    flash: FlashStorage<'static>,
    table: Box<[u8; PARTITION_TABLE_MAX_LEN]>,
}

impl HttpUpdater {
    pub fn new(stack: Stack<'static>, flash: FlashStorage<'static>) -> Self {
        Self {
            stack,
            flash,
            table: Box::new([0u8; PARTITION_TABLE_MAX_LEN]),
        }
    }

    /// Mark a freshly flashed image as good once it has booted
    pub fn confirm_running_image(&mut self) {
        let mut ota = match OtaUpdater::new(&mut self.flash, &mut self.table) {
            Ok(ota) => ota,
            Err(e) => {
                warn!("No OTA partitions: {:?}", e);
                return;
            }
        };
        if let Ok(OtaImageState::New | OtaImageState::PendingVerify) = ota.current_ota_state() {
            match ota.set_current_ota_state(OtaImageState::Valid) {
                Ok(()) => info!("Updated image confirmed"),
                Err(e) => warn!("Failed to confirm running image: {:?}", e),
            }
        }
    }

    async fn download(&mut self, url: &str, version: &str) -> UpdateOutcome {
        let Some((host, port, path)) = split_url(url) else {
            warn!("Update URL {} is not plain http", url);
            return UpdateOutcome::Failed;
        };

        let addr = match self.stack.dns_query(host, DnsQueryType::A).await {
            Ok(addrs) => match addrs.first() {
                Some(addr) => *addr,
                None => return UpdateOutcome::Failed,
            },
            Err(e) => {
                warn!("DNS lookup of {} failed: {:?}", host, e);
                return UpdateOutcome::Failed;
            }
        };

        let mut rx = [0u8; 2048];
        let mut tx = [0u8; 256];
        let mut socket = TcpSocket::new(self.stack, &mut rx, &mut tx);
        socket.set_timeout(Some(SOCKET_TIMEOUT));

        if let Err(e) = socket.connect((addr, port)).await {
            warn!("Update server unreachable: {:?}", e);
            return UpdateOutcome::Failed;
        }

        let request = get_request(host, path, (VERSION_HEADER, version));
        if let Err(e) = write_all(&mut socket, request.as_bytes()).await {
            warn!("Update request failed: {:?}", e);
            return UpdateOutcome::Failed;
        }

        let mut head = Vec::with_capacity(HEAD_MAX);
        let mut chunk = [0u8; 512];
        let body_start = loop {
            match socket.read(&mut chunk).await {
                Ok(0) => {
                    warn!("Update server closed before the headers ended");
                    return UpdateOutcome::Failed;
                }
                Ok(n) => head.extend_from_slice(&chunk[..n]),
                Err(e) => {
                    warn!("Update response failed: {:?}", e);
                    return UpdateOutcome::Failed;
                }
            }
            if let Some(end) = header_end(&head) {
                break end;
            }
            if head.len() > HEAD_MAX {
                warn!("Update response headers too long");
                return UpdateOutcome::Failed;
            }
        };

        let outcome = match status_code(&head) {
            Some(304) => UpdateOutcome::NoUpdateAvailable,
            Some(200) => {
                let expected = content_length(&head);
                let first = head.split_off(body_start);
                self.flash_image(&mut socket, first, expected).await
            }
            Some(other) => {
                warn!("Update server answered {}", other);
                UpdateOutcome::Failed
            }
            None => {
                warn!("Update server sent no status line");
                UpdateOutcome::Failed
            }
        };
        socket.close();
        outcome
    }

    async fn flash_image(
        &mut self,
        socket: &mut TcpSocket<'_>,
        first: Vec<u8>,
        expected: Option<usize>,
    ) -> UpdateOutcome {
        let mut ota = match OtaUpdater::new(&mut self.flash, &mut self.table) {
            Ok(ota) => ota,
            Err(e) => {
                warn!("No OTA partitions: {:?}", e);
                return UpdateOutcome::Failed;
            }
        };

        let written = {
            let (mut slot, kind) = match ota.next_partition() {
                Ok(next) => next,
                Err(e) => {
                    warn!("No inactive OTA slot: {:?}", e);
                    return UpdateOutcome::Failed;
                }
            };
            let capacity = slot.capacity();
            if expected.is_some_and(|len| len > capacity) {
                warn!("Image does not fit {:?} ({} bytes)", kind, capacity);
                return UpdateOutcome::Failed;
            }
            info!("Writing update to {:?}", kind);

            let mut sector = first;
            sector.reserve(SECTOR_SIZE);
            let mut written = 0usize;
            let mut chunk = [0u8; 512];
            loop {
                while sector.len() >= SECTOR_SIZE {
                    if written + SECTOR_SIZE > capacity {
                        warn!("Image overflows {:?}", kind);
                        return UpdateOutcome::Failed;
                    }
                    if let Err(e) = slot.write(written as u32, &sector[..SECTOR_SIZE]) {
                        warn!("Flash write at {:#x} failed: {:?}", written, e);
                        return UpdateOutcome::Failed;
                    }
                    written += SECTOR_SIZE;
                    sector.drain(..SECTOR_SIZE);
                }
                if expected.is_some_and(|len| written + sector.len() >= len) {
                    break;
                }
                match socket.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => sector.extend_from_slice(&chunk[..n]),
                    Err(e) => {
                        warn!("Image download failed after {} bytes: {:?}", written, e);
                        return UpdateOutcome::Failed;
                    }
                }
            }

            if let Some(len) = expected {
                sector.truncate(len.saturating_sub(written));
            }
            if !sector.is_empty() {
                if written + sector.len() > capacity {
                    warn!("Image overflows {:?}", kind);
                    return UpdateOutcome::Failed;
                }
                if let Err(e) = slot.write(written as u32, &sector) {
                    warn!("Flash write at {:#x} failed: {:?}", written, e);
                    return UpdateOutcome::Failed;
                }
                written += sector.len();
            }
            written
        };

        if written == 0 || expected.is_some_and(|len| len != written) {
            warn!("Image truncated at {} of {:?} bytes", written, expected);
            return UpdateOutcome::Failed;
        }

        if let Err(e) = ota.activate_next_partition() {
            warn!("Failed to activate the new image: {:?}", e);
            return UpdateOutcome::Failed;
        }
        if let Err(e) = ota.set_current_ota_state(OtaImageState::New) {
            warn!("Failed to mark the new image: {:?}", e);
            return UpdateOutcome::Failed;
        }
        info!("Wrote {} byte image", written);
        UpdateOutcome::Ok
    }
}

impl FirmwareUpdater for HttpUpdater {
    async fn update(&mut self, url: &str, version: &str) -> UpdateOutcome {
        info!("Checking {} for updates to {}", url, version);
        self.download(url, version).await
    }
}
