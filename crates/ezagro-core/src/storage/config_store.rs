use log::{error, info, warn};

extern crate alloc;
use alloc::vec;

use super::BlobStorage;
use crate::config::{ConfigError, DeviceConfig};
use crate::constants::CONFIG_MAX_BYTES;

/// Load, save and erase the device identity record
///
/// Nothing is cached: every call goes to the backend, so the result of a
/// `load` always reflects what is on flash.
pub struct ConfigStore<B> {
    backend: B,
}

impl<B: BlobStorage> ConfigStore<B> {
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    #[cfg(test)]
    pub(crate) fn backend(&self) -> &B {
        &self.backend
    }

    #[cfg(test)]
    pub(crate) fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Read and validate the stored record
    pub fn load(&mut self) -> Result<DeviceConfig, ConfigError> {
        let size = self
            .backend
            .stored_len()
            .map_err(|e| {
                error!("Failed to open config record: {:?}", e);
                ConfigError::Io
            })?
            .ok_or(ConfigError::NotFound)?;

        if size > CONFIG_MAX_BYTES {
            warn!("Config record is too large ({} bytes)", size);
            return Err(ConfigError::TooLarge {
                size,
                limit: CONFIG_MAX_BYTES,
            });
        }

        let mut buf = vec![0u8; size];
        let read = self.backend.read(&mut buf).map_err(|e| {
            error!("Failed to read config record: {:?}", e);
            ConfigError::Io
        })?;

        DeviceConfig::from_json(&buf[..read]).inspect_err(|e| warn!("Failed to parse config record: {}", e))
    }

    /// Serialize `config` and replace the stored record with it
    pub fn save(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        let bytes = config.to_json()?;
        if bytes.len() > CONFIG_MAX_BYTES {
            return Err(ConfigError::TooLarge {
                size: bytes.len(),
                limit: CONFIG_MAX_BYTES,
            });
        }

        self.backend.replace(&bytes).map_err(|e| {
            error!("Failed to open config record for writing: {:?}", e);
            ConfigError::Io
        })?;

        info!("Saved config for device {}", config.device_id());
        Ok(())
    }

    /// Remove all persisted state
    pub fn erase(&mut self) -> Result<(), ConfigError> {
        self.backend.format().map_err(|e| {
            error!("Failed to format config storage: {:?}", e);
            ConfigError::Io
        })
    }
}
