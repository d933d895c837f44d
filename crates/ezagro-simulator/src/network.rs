//! Simulated WiFi, cloud and update server

use std::convert::Infallible;
use std::fs;
use std::io::{self, ErrorKind};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::{info, warn};
use serde::{Deserialize, Serialize};

use ezagro_core::commands::{FirmwareUpdater, UpdateOutcome};
use ezagro_core::provisioning::{
    CredentialStore, PortalEvent, WifiCredentials, WifiPortal, parse_submission,
};
use ezagro_core::telemetry::{TelemetrySink, VirtualPin};

const WIFI_FILE_NAME: &str = "wifi.json";
const PORTAL_FILE_NAME: &str = "portal.html";

#[derive(Serialize, Deserialize)]
struct StoredWifi {
    ssid: String,
    password: String,
}

/// Station and access point backed by the data directory and stdin
///
/// Joined networks are remembered in `wifi.json`. While the portal is open
/// its page is written to `portal.html` and each stdin line is taken as a
/// url-encoded form body.
pub struct SimPortal<'a> {
    dir: PathBuf,
    lines: &'a Receiver<String>,
    timeout: Duration,
    deadline: Option<Instant>,
    unreachable_ssid: Option<String>,
}

impl<'a> SimPortal<'a> {
    pub fn new(
        dir: &Path,
        lines: &'a Receiver<String>,
        timeout: Duration,
        unreachable_ssid: Option<String>,
    ) -> Self {
        Self {
            dir: dir.to_path_buf(),
            lines,
            timeout,
            deadline: None,
            unreachable_ssid,
        }
    }

    fn wifi_path(&self) -> PathBuf {
        self.dir.join(WIFI_FILE_NAME)
    }

    fn load_wifi(&self) -> Option<StoredWifi> {
        let bytes = fs::read(self.wifi_path()).ok()?;
        serde_json::from_slice(&bytes)
            .inspect_err(|e| warn!("Ignoring unreadable {}: {}", WIFI_FILE_NAME, e))
            .ok()
    }

    fn reachable(&self, ssid: &str) -> bool {
        self.unreachable_ssid.as_deref() != Some(ssid)
    }
}

impl CredentialStore for SimPortal<'_> {
    type Error = io::Error;

    fn has_stored_credentials(&mut self) -> bool {
        self.wifi_path().exists()
    }

    fn erase_credentials(&mut self) -> Result<(), Self::Error> {
        match fs::remove_file(self.wifi_path()) {
            Err(e) if e.kind() != ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }
}

impl WifiPortal for SimPortal<'_> {
    async fn connect_stored(&mut self) -> bool {
        match self.load_wifi() {
            Some(wifi) => self.reachable(&wifi.ssid),
            None => false,
        }
    }

    async fn serve(&mut self, page: &str) {
        if self.deadline.is_none() {
            info!("Portal open, paste form bodies such as s=farm&p=secret&device_id=node-1&blynk=token");
            self.deadline = Some(Instant::now() + self.timeout);
        }
        let path = self.dir.join(PORTAL_FILE_NAME);
        if let Err(e) = fs::write(&path, page) {
            warn!("Failed to write {}: {}", path.display(), e);
        }
    }

    async fn next_event(&mut self) -> PortalEvent {
        let deadline = *self.deadline.get_or_insert_with(|| Instant::now() + self.timeout);
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match self.lines.recv_timeout(remaining) {
                Ok(line) => line,
                Err(RecvTimeoutError::Timeout) => return PortalEvent::TimedOut,
                Err(RecvTimeoutError::Disconnected) => {
                    std::thread::sleep(remaining);
                    return PortalEvent::TimedOut;
                }
            };
            match parse_submission(line.trim()) {
                Ok(submission) => return PortalEvent::Submitted(submission),
                Err(e) => warn!("Ignoring form body: {}", e),
            }
        }
    }

    async fn join(&mut self, wifi: &WifiCredentials) -> bool {
        if !self.reachable(wifi.ssid()) {
            return false;
        }
        let stored = StoredWifi {
            ssid: wifi.ssid().into(),
            password: wifi.password().into(),
        };
        let written = serde_json::to_vec(&stored)
            .map_err(io::Error::from)
            .and_then(|bytes| fs::write(self.wifi_path(), bytes));
        if let Err(e) = written {
            warn!("Failed to remember network: {}", e);
        }
        true
    }

    async fn close(&mut self) {
        self.deadline = None;
        let _ = fs::remove_file(self.dir.join(PORTAL_FILE_NAME));
    }
}

/// Telemetry sink printing every value
#[derive(Debug, Default)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    type Error = Infallible;

    async fn publish(&mut self, pin: VirtualPin, value: &str) -> Result<(), Self::Error> {
        info!("{} <- {}", pin, value);
        Ok(())
    }
}

/// Update server answering with a fixed outcome
pub struct SimUpdater {
    outcome: UpdateOutcome,
}

impl SimUpdater {
    pub fn new(outcome: UpdateOutcome) -> Self {
        Self { outcome }
    }
}

impl FirmwareUpdater for SimUpdater {
    async fn update(&mut self, url: &str, version: &str) -> UpdateOutcome {
        info!("Update check {} as {}", url, version);
        self.outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;
    use std::sync::mpsc;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("ezagro-portal-{}-{}", name, std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_join_remembers_network() {
        let dir = scratch_dir("join");
        let (_tx, rx) = mpsc::channel();
        let mut portal = SimPortal::new(&dir, &rx, Duration::from_millis(10), None);

        assert!(!portal.has_stored_credentials());
        let wifi = WifiCredentials::new("farm", "pw").unwrap();
        assert!(block_on(portal.join(&wifi)));
        assert!(portal.has_stored_credentials());
        assert!(block_on(portal.connect_stored()));

        portal.erase_credentials().unwrap();
        portal.erase_credentials().unwrap();
        assert!(!block_on(portal.connect_stored()));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_stdin_lines_become_submissions() {
        let dir = scratch_dir("lines");
        let (tx, rx) = mpsc::channel();
        tx.send(String::from("not a form")).unwrap();
        tx.send(String::from("s=farm&device_id=node-1&blynk=tok\n")).unwrap();
        let mut portal = SimPortal::new(&dir, &rx, Duration::from_millis(50), None);

        let PortalEvent::Submitted(submission) = block_on(portal.next_event()) else {
            panic!("expected a submission");
        };
        assert_eq!(submission.device_id, "node-1");
        assert!(matches!(block_on(portal.next_event()), PortalEvent::TimedOut));

        fs::remove_dir_all(dir).unwrap();
    }

    #[test]
    fn test_unreachable_network_is_not_joined() {
        let dir = scratch_dir("unreachable");
        let (_tx, rx) = mpsc::channel();
        let mut portal =
            SimPortal::new(&dir, &rx, Duration::from_millis(10), Some(String::from("farm")));

        let wifi = WifiCredentials::new("farm", "pw").unwrap();
        assert!(!block_on(portal.join(&wifi)));
        assert!(!portal.has_stored_credentials());

        fs::remove_dir_all(dir).unwrap();
    }
}
