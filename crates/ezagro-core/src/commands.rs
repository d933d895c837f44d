//! Remote commands delivered by the cloud

use alloc::format;
use alloc::string::String;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use log::{error, info, warn};

use crate::app_state::{AppState, RestartReason};
use crate::constants::{FIRMWARE_VERSION, OTA_UPDATE_URL};
use crate::provisioning::CredentialStore;
use crate::storage::{BlobStorage, ConfigStore};
use crate::telemetry::VirtualPin;

/// Commands received by the cloud adapter, drained by the main loop
pub static REMOTE_COMMANDS: Channel<CriticalSectionRawMutex, RemoteCommand, 4> = Channel::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteCommand {
    UpdateRequest(i32),
    ResetRequest(i32),
}

impl RemoteCommand {
    /// Map a virtual-pin write to a command, `None` for pins nobody listens on
    pub fn from_pin(pin: VirtualPin, value: i32) -> Option<Self> {
        match pin {
            VirtualPin::FIRMWARE_UPDATE => Some(Self::UpdateRequest(value)),
            VirtualPin::FACTORY_RESET => Some(Self::ResetRequest(value)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Failed,
    NoUpdateAvailable,
    Ok,
}

/// Over-the-air firmware update client
pub trait FirmwareUpdater {
    fn update(&mut self, url: &str, version: &str) -> impl Future<Output = UpdateOutcome>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Ignored,
    Update(UpdateOutcome),
    /// Persistent state was wiped, the caller must restart the node
    Restart,
}

impl CommandOutcome {
    /// Why the node has to restart after this command, if it does
    pub const fn restart_reason(self) -> Option<RestartReason> {
        match self {
            Self::Restart => Some(RestartReason::FactoryReset),
            Self::Update(UpdateOutcome::Ok) => Some(RestartReason::FirmwareUpdated),
            Self::Ignored | Self::Update(_) => None,
        }
    }
}

/// Version string sent to the update server
pub fn update_version(device_id: &str) -> String {
    format!("{}::{}", device_id, FIRMWARE_VERSION)
}

/// Erase station credentials and the identity record
///
/// Both erasures are attempted even if the first one fails.
pub fn factory_reset<B, W>(store: &mut ConfigStore<B>, credentials: &mut W)
where
    B: BlobStorage,
    W: CredentialStore,
{
    if let Err(e) = credentials.erase_credentials() {
        error!("Failed to erase WiFi credentials: {:?}", e);
    }
    if let Err(e) = store.erase() {
        error!("Failed to erase config: {}", e);
    }
}

pub struct CommandHandler<U> {
    updater: U,
}

impl<U: FirmwareUpdater> CommandHandler<U> {
    pub const fn new(updater: U) -> Self {
        Self { updater }
    }

    pub fn updater(&self) -> &U {
        &self.updater
    }

    pub async fn handle<B, W>(
        &mut self,
        command: RemoteCommand,
        state: &AppState,
        store: &mut ConfigStore<B>,
        credentials: &mut W,
    ) -> CommandOutcome
    where
        B: BlobStorage,
        W: CredentialStore,
    {
        match command {
            RemoteCommand::UpdateRequest(1) => {
                let version = update_version(state.config().device_id());
                info!("Checking for firmware update as {}", version);
                let outcome = self.updater.update(OTA_UPDATE_URL, &version).await;
                match outcome {
                    UpdateOutcome::Failed => warn!("Firmware update failed"),
                    UpdateOutcome::NoUpdateAvailable => info!("No firmware update available"),
                    UpdateOutcome::Ok => info!("Firmware updated"),
                }
                CommandOutcome::Update(outcome)
            }
            RemoteCommand::UpdateRequest(value) => {
                info!("Ignoring update request with value {}", value);
                CommandOutcome::Ignored
            }
            RemoteCommand::ResetRequest(_) => {
                warn!("Factory reset requested");
                factory_reset(store, credentials);
                CommandOutcome::Restart
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigError, DeviceConfig};
    use crate::provisioning::WifiCredentials;
    use crate::storage::MemoryStorage;
    use crate::test_support::{FakeUpdater, ScriptedPortal};
    use embassy_futures::block_on;

    fn state() -> AppState {
        AppState::new(DeviceConfig::new("node-1", "token").unwrap())
    }

    fn provisioned() -> (ConfigStore<MemoryStorage>, ScriptedPortal) {
        let mut store = ConfigStore::new(MemoryStorage::new());
        store.save(state().config()).unwrap();
        let portal = ScriptedPortal {
            stored: Some(WifiCredentials::new("farm", "pw").unwrap()),
            ..ScriptedPortal::default()
        };
        (store, portal)
    }

    #[test]
    fn test_update_request_uses_device_version() {
        let (mut store, mut portal) = provisioned();
        let mut handler = CommandHandler::new(FakeUpdater::new(UpdateOutcome::NoUpdateAvailable));

        let outcome = block_on(handler.handle(
            RemoteCommand::UpdateRequest(1),
            &state(),
            &mut store,
            &mut portal,
        ));

        assert_eq!(outcome, CommandOutcome::Update(UpdateOutcome::NoUpdateAvailable));
        assert_eq!(
            handler.updater().requests,
            vec![(String::from(OTA_UPDATE_URL), String::from("node-1::v0.0.4"))]
        );
    }

    #[test]
    fn test_installed_update_restarts_into_new_image() {
        let (mut store, mut portal) = provisioned();
        let mut handler = CommandHandler::new(FakeUpdater::new(UpdateOutcome::Ok));

        let outcome = block_on(handler.handle(
            RemoteCommand::UpdateRequest(1),
            &state(),
            &mut store,
            &mut portal,
        ));

        assert_eq!(outcome, CommandOutcome::Update(UpdateOutcome::Ok));
        assert_eq!(outcome.restart_reason(), Some(RestartReason::FirmwareUpdated));
        assert!(store.load().is_ok());
    }

    #[test]
    fn test_only_reset_and_installed_update_restart() {
        assert_eq!(
            CommandOutcome::Restart.restart_reason(),
            Some(RestartReason::FactoryReset)
        );
        assert_eq!(CommandOutcome::Ignored.restart_reason(), None);
        assert_eq!(CommandOutcome::Update(UpdateOutcome::Failed).restart_reason(), None);
        assert_eq!(
            CommandOutcome::Update(UpdateOutcome::NoUpdateAvailable).restart_reason(),
            None
        );
    }

    #[test]
    fn test_update_failure_is_not_fatal() {
        let (mut store, mut portal) = provisioned();
        let mut handler = CommandHandler::new(FakeUpdater::new(UpdateOutcome::Failed));

        let outcome = block_on(handler.handle(
            RemoteCommand::UpdateRequest(1),
            &state(),
            &mut store,
            &mut portal,
        ));

        assert_eq!(outcome, CommandOutcome::Update(UpdateOutcome::Failed));
        assert!(store.load().is_ok());
    }

    #[test]
    fn test_update_request_other_values_ignored() {
        let (mut store, mut portal) = provisioned();
        let mut handler = CommandHandler::new(FakeUpdater::new(UpdateOutcome::Ok));

        for value in [0, 2, -1] {
            let outcome = block_on(handler.handle(
                RemoteCommand::UpdateRequest(value),
                &state(),
                &mut store,
                &mut portal,
            ));
            assert_eq!(outcome, CommandOutcome::Ignored);
        }
        assert!(handler.updater().requests.is_empty());
    }

    #[test]
    fn test_reset_erases_everything() {
        let (mut store, mut portal) = provisioned();
        let mut handler = CommandHandler::new(FakeUpdater::new(UpdateOutcome::Ok));

        let outcome = block_on(handler.handle(
            RemoteCommand::ResetRequest(0),
            &state(),
            &mut store,
            &mut portal,
        ));

        assert_eq!(outcome, CommandOutcome::Restart);
        assert!(portal.stored.is_none());
        assert_eq!(store.load().unwrap_err(), ConfigError::NotFound);
    }

    #[test]
    fn test_reset_is_idempotent() {
        let (mut store, mut portal) = provisioned();
        let mut handler = CommandHandler::new(FakeUpdater::new(UpdateOutcome::Ok));

        for _ in 0..2 {
            let outcome = block_on(handler.handle(
                RemoteCommand::ResetRequest(1),
                &state(),
                &mut store,
                &mut portal,
            ));
            assert_eq!(outcome, CommandOutcome::Restart);
            assert!(portal.stored.is_none());
            assert_eq!(store.load().unwrap_err(), ConfigError::NotFound);
        }
        assert_eq!(portal.erase_count, 2);
    }

    #[test]
    fn test_pin_mapping() {
        assert_eq!(
            RemoteCommand::from_pin(VirtualPin(22), 1),
            Some(RemoteCommand::UpdateRequest(1))
        );
        assert_eq!(
            RemoteCommand::from_pin(VirtualPin(23), 0),
            Some(RemoteCommand::ResetRequest(0))
        );
        assert_eq!(RemoteCommand::from_pin(VirtualPin::CO2, 1), None);
    }

    #[test]
    fn test_channel_delivers_in_order() {
        REMOTE_COMMANDS.try_send(RemoteCommand::UpdateRequest(1)).unwrap();
        REMOTE_COMMANDS.try_send(RemoteCommand::ResetRequest(0)).unwrap();

        assert_eq!(REMOTE_COMMANDS.try_receive(), Ok(RemoteCommand::UpdateRequest(1)));
        assert_eq!(REMOTE_COMMANDS.try_receive(), Ok(RemoteCommand::ResetRequest(0)));
        assert!(REMOTE_COMMANDS.try_receive().is_err());
    }
}
