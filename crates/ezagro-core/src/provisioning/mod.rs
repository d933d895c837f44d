//! WiFi provisioning
//!
//! On boot the node first tries the network it joined last time. When that
//! fails, or when provisioning is forced, it opens an access point with a
//! configuration page. A submitted form is validated, the submitted network is
//! joined, and only once the join succeeds is the captured identity saved.

pub mod portal;

pub use portal::{FormError, parse_submission, render_form};

use alloc::format;
use alloc::string::String;

use log::{error, info, warn};

use crate::config::{ConfigError, DeviceConfig};
use crate::storage::{BlobStorage, ConfigStore};
use portal::{PASSWORD_MAX_LEN, SSID_MAX_LEN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    Idle,
    AwaitingCredentials,
    ConfigCapturePending,
    Connected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningOutcome {
    Connected,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProvisioningResult {
    pub connected: bool,
    /// A new identity was captured through the portal
    pub config_changed: bool,
}

impl ProvisioningResult {
    pub fn outcome(&self) -> ProvisioningOutcome {
        if self.connected {
            ProvisioningOutcome::Connected
        } else {
            ProvisioningOutcome::Timeout
        }
    }
}

/// Network name and passphrase of a station network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiCredentials {
    ssid: heapless::String<SSID_MAX_LEN>,
    password: heapless::String<PASSWORD_MAX_LEN>,
}

impl WifiCredentials {
    pub fn new(ssid: &str, password: &str) -> Result<Self, FormError> {
        let mut credentials = Self {
            ssid: heapless::String::new(),
            password: heapless::String::new(),
        };
        credentials
            .ssid
            .push_str(ssid)
            .map_err(|_| FormError::TooLong {
                field: portal::FIELD_SSID,
                max: SSID_MAX_LEN,
            })?;
        credentials
            .password
            .push_str(password)
            .map_err(|_| FormError::TooLong {
                field: portal::FIELD_PASSWORD,
                max: PASSWORD_MAX_LEN,
            })?;
        Ok(credentials)
    }

    pub fn ssid(&self) -> &str {
        &self.ssid
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

/// A form posted to the portal, identity fields not yet validated
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalSubmission {
    pub wifi: WifiCredentials,
    pub device_id: String,
    pub credential_token: String,
}

#[derive(Debug, Clone)]
pub enum PortalEvent {
    Submitted(PortalSubmission),
    /// The portal window closed without a usable submission
    TimedOut,
}

/// Station credentials kept by the network stack
pub trait CredentialStore {
    type Error: core::fmt::Debug;

    fn has_stored_credentials(&mut self) -> bool;

    fn erase_credentials(&mut self) -> Result<(), Self::Error>;
}

/// Station join and access point portal
///
/// Implementations own the portal window: [`WifiPortal::next_event`] yields
/// [`PortalEvent::TimedOut`] once the window has elapsed.
pub trait WifiPortal: CredentialStore {
    /// Join the network stored by a previous successful join.
    fn connect_stored(&mut self) -> impl Future<Output = bool>;

    /// Publish `page` as the portal's configuration page, opening the
    /// access point on first use.
    fn serve(&mut self, page: &str) -> impl Future<Output = ()>;

    fn next_event(&mut self) -> impl Future<Output = PortalEvent>;

    /// Join `wifi`, storing it for [`WifiPortal::connect_stored`] on success.
    fn join(&mut self, wifi: &WifiCredentials) -> impl Future<Output = bool>;

    /// Shut the access point down.
    fn close(&mut self) -> impl Future<Output = ()>;
}

pub struct ProvisioningFlow {
    state: ProvisioningState,
    seed: Option<DeviceConfig>,
    pending: Option<DeviceConfig>,
}

impl ProvisioningFlow {
    /// `seed` pre-fills the portal form
    pub const fn new(seed: Option<DeviceConfig>) -> Self {
        Self {
            state: ProvisioningState::Idle,
            seed,
            pending: None,
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    /// Identity captured from the portal and not yet saved
    pub fn pending(&self) -> Option<&DeviceConfig> {
        self.pending.as_ref()
    }

    /// Best known identity, captured or seeded
    pub fn config(&self) -> Option<&DeviceConfig> {
        self.seed.as_ref()
    }

    pub fn into_config(self) -> Option<DeviceConfig> {
        self.seed
    }

    /// Validate the identity part of a submission and capture it
    ///
    /// A later accepted submission replaces the capture. A rejected one
    /// leaves both the capture and the state untouched.
    pub fn on_save_requested(&mut self, submission: &PortalSubmission) -> Result<(), ConfigError> {
        let config = DeviceConfig::new(&submission.device_id, &submission.credential_token)?;
        info!("Captured config for device {}", config.device_id());
        self.seed = Some(config.clone());
        self.pending = Some(config);
        self.state = ProvisioningState::ConfigCapturePending;
        Ok(())
    }

    /// Get the node onto a network
    ///
    /// With `force` unset, stored credentials are tried first. Otherwise the
    /// portal is served until a submission joins a network or the portal
    /// times out.
    pub async fn run<P, B>(
        &mut self,
        portal: &mut P,
        store: &mut ConfigStore<B>,
        force: bool,
    ) -> ProvisioningResult
    where
        P: WifiPortal,
        B: BlobStorage,
    {
        if !force && portal.has_stored_credentials() {
            info!("Joining stored network");
            if portal.connect_stored().await {
                info!("WiFi connected");
                self.state = ProvisioningState::Idle;
                return ProvisioningResult {
                    connected: true,
                    config_changed: false,
                };
            }
            warn!("Stored network unreachable, opening portal");
        }

        self.state = ProvisioningState::AwaitingCredentials;
        let mut notice: Option<String> = None;

        loop {
            let page = render_form(self.seed.as_ref(), notice.as_deref());
            portal.serve(&page).await;

            let submission = match portal.next_event().await {
                PortalEvent::Submitted(submission) => submission,
                PortalEvent::TimedOut => {
                    warn!("Provisioning portal timed out");
                    portal.close().await;
                    self.state = ProvisioningState::Idle;
                    return ProvisioningResult {
                        connected: false,
                        config_changed: false,
                    };
                }
            };

            if let Err(e) = self.on_save_requested(&submission) {
                warn!("Rejected portal submission: {}", e);
                notice = Some(format!("Not saved: {}", e));
                continue;
            }

            info!("Joining {}", submission.wifi.ssid());
            if !portal.join(&submission.wifi).await {
                warn!("Could not join {}", submission.wifi.ssid());
                notice = Some(format!("Could not connect to {}", submission.wifi.ssid()));
                self.state = ProvisioningState::AwaitingCredentials;
                continue;
            }

            self.state = ProvisioningState::Connected;
            let config_changed = self.commit(store);
            portal.close().await;
            self.state = ProvisioningState::Idle;
            return ProvisioningResult {
                connected: true,
                config_changed,
            };
        }
    }

    fn commit<B: BlobStorage>(&mut self, store: &mut ConfigStore<B>) -> bool {
        let Some(config) = self.pending.take() else {
            return false;
        };
        match store.save(&config) {
            Ok(()) => true,
            Err(e) => {
                error!("Failed to save captured config: {}", e);
                false
            }
        }
    }
}
