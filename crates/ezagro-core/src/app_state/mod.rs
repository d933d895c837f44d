//! Application state and the boot sequence

use log::{error, info};

use crate::commands::factory_reset;
use crate::config::{ConfigError, DeviceConfig};
use crate::constants::PROVISIONING_BANNER;
use crate::display::StatusDisplay;
use crate::provisioning::{ProvisioningFlow, WifiPortal};
use crate::storage::{BlobStorage, ConfigStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppRunState {
    Running,
    /// Waiting for the composition root to restart the node
    Restarting(RestartReason),
}

/// State handed to the scheduler and the command handler
///
/// Only a booted node has an `AppState`, so the identity is always present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppState {
    pub run_state: AppRunState,
    config: DeviceConfig,
}

impl AppState {
    pub fn new(config: DeviceConfig) -> Self {
        Self {
            run_state: AppRunState::Running,
            config,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn request_restart(&mut self, reason: RestartReason) {
        self.run_state = AppRunState::Restarting(reason);
    }

    pub fn restart_reason(&self) -> Option<RestartReason> {
        match self.run_state {
            AppRunState::Running => None,
            AppRunState::Restarting(reason) => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartReason {
    InvalidConfig,
    ProvisioningTimeout,
    FactoryReset,
    /// A new image was written to the inactive slot
    FirmwareUpdated,
}

#[derive(Debug)]
pub enum BootOutcome {
    Ready(AppState),
    Restart(RestartReason),
}

/// Load the identity and get onto a network
///
/// A node with nothing persisted goes straight to the portal. A node with an
/// unusable record, or with network credentials but no record, is wiped and
/// restarted so that the next boot starts from scratch.
pub async fn boot<B, P, D>(
    store: &mut ConfigStore<B>,
    portal: &mut P,
    display: &mut D,
) -> BootOutcome
where
    B: BlobStorage,
    P: WifiPortal,
    D: StatusDisplay,
{
    let (seed, force) = match store.load() {
        Ok(config) => {
            info!("Loaded config for device {}", config.device_id());
            (Some(config), false)
        }
        Err(ConfigError::NotFound) if !portal.has_stored_credentials() => {
            info!("Nothing persisted, starting provisioning");
            (None, true)
        }
        Err(e) => {
            error!("Unusable config ({}), resetting", e);
            factory_reset(store, portal);
            return BootOutcome::Restart(RestartReason::InvalidConfig);
        }
    };

    display.show(&PROVISIONING_BANNER);

    let mut flow = ProvisioningFlow::new(seed);
    let result = flow.run(portal, store, force).await;
    if !result.connected {
        return BootOutcome::Restart(RestartReason::ProvisioningTimeout);
    }

    match flow.into_config() {
        Some(config) => BootOutcome::Ready(AppState::new(config)),
        None => {
            error!("Connected without a device identity, resetting");
            factory_reset(store, portal);
            BootOutcome::Restart(RestartReason::InvalidConfig)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provisioning::{PortalEvent, PortalSubmission, WifiCredentials};
    use crate::storage::MemoryStorage;
    use crate::test_support::{RecordingDisplay, ScriptedPortal};
    use embassy_futures::block_on;

    fn home() -> Option<WifiCredentials> {
        Some(WifiCredentials::new("home", "pw").unwrap())
    }

    fn saved_store() -> ConfigStore<MemoryStorage> {
        ConfigStore::new(MemoryStorage::with_record(
            br#"{"device_id":"node-1","blynk_token":"tok"}"#,
        ))
    }

    #[test]
    fn test_fresh_device_goes_to_portal() {
        let mut store = ConfigStore::new(MemoryStorage::new());
        let mut portal = ScriptedPortal {
            events: vec![PortalEvent::Submitted(PortalSubmission {
                wifi: WifiCredentials::new("farm", "pw").unwrap(),
                device_id: "node-9".into(),
                credential_token: "tok".into(),
            })]
            .into(),
            ..ScriptedPortal::default()
        };
        let mut display = RecordingDisplay::default();

        let outcome = block_on(boot(&mut store, &mut portal, &mut display));

        let BootOutcome::Ready(state) = outcome else {
            panic!("expected a booted node");
        };
        assert_eq!(state.config().device_id(), "node-9");
        assert_eq!(state.run_state, AppRunState::Running);
        assert_eq!(store.load().unwrap().device_id(), "node-9");
        assert_eq!(display.frames[0], ["Connect to WiFi:", "EZagro ezsecret"]);
    }

    #[test]
    fn test_saved_config_joins_stored_network() {
        let mut store = saved_store();
        let mut portal = ScriptedPortal {
            stored: home(),
            stored_connects: true,
            ..ScriptedPortal::default()
        };
        let mut display = RecordingDisplay::default();

        let outcome = block_on(boot(&mut store, &mut portal, &mut display));

        assert!(matches!(outcome, BootOutcome::Ready(ref s) if s.config().device_id() == "node-1"));
        assert!(portal.served.is_empty());
    }

    #[test]
    fn test_invalid_config_resets_and_restarts() {
        let mut store = ConfigStore::new(MemoryStorage::with_record(br#"{"device_id":""}"#));
        let mut portal = ScriptedPortal {
            stored: home(),
            ..ScriptedPortal::default()
        };
        let mut display = RecordingDisplay::default();

        let outcome = block_on(boot(&mut store, &mut portal, &mut display));

        assert!(matches!(
            outcome,
            BootOutcome::Restart(RestartReason::InvalidConfig)
        ));
        assert!(portal.served.is_empty() && portal.joined.is_empty());
        assert!(portal.stored.is_none());
        assert!(store.backend().record().is_none());
    }

    #[test]
    fn test_credentials_without_config_reset() {
        let mut store = ConfigStore::new(MemoryStorage::new());
        let mut portal = ScriptedPortal {
            stored: home(),
            stored_connects: true,
            ..ScriptedPortal::default()
        };
        let mut display = RecordingDisplay::default();

        let outcome = block_on(boot(&mut store, &mut portal, &mut display));

        assert!(matches!(
            outcome,
            BootOutcome::Restart(RestartReason::InvalidConfig)
        ));
        assert_eq!(portal.erase_count, 1);
    }

    #[test]
    fn test_reset_then_reboot_reaches_portal() {
        let mut store = ConfigStore::new(MemoryStorage::with_record(b"garbage"));
        let mut portal = ScriptedPortal::default();
        let mut display = RecordingDisplay::default();

        let first = block_on(boot(&mut store, &mut portal, &mut display));
        assert!(matches!(first, BootOutcome::Restart(RestartReason::InvalidConfig)));

        let second = block_on(boot(&mut store, &mut portal, &mut display));
        assert!(matches!(
            second,
            BootOutcome::Restart(RestartReason::ProvisioningTimeout)
        ));
        assert_eq!(portal.served.len(), 1);
    }

    #[test]
    fn test_restart_request_is_recorded() {
        let mut state = AppState::new(DeviceConfig::new("node-1", "tok").unwrap());
        assert_eq!(state.restart_reason(), None);

        state.request_restart(RestartReason::FactoryReset);
        assert_eq!(state.run_state, AppRunState::Restarting(RestartReason::FactoryReset));
        assert_eq!(state.restart_reason(), Some(RestartReason::FactoryReset));
    }

    #[test]
    fn test_portal_timeout_restarts() {
        let mut store = saved_store();
        let mut portal = ScriptedPortal {
            stored: home(),
            stored_connects: false,
            ..ScriptedPortal::default()
        };
        let mut display = RecordingDisplay::default();

        let outcome = block_on(boot(&mut store, &mut portal, &mut display));

        assert!(matches!(
            outcome,
            BootOutcome::Restart(RestartReason::ProvisioningTimeout)
        ));
        assert!(portal.closed);
        assert_eq!(store.load().unwrap().device_id(), "node-1");
    }
}
