//! Persisted device identity
//!
//! The node keeps exactly one record on flash: the device identifier shown on
//! the display and used for firmware updates, and the cloud credential token.
//! Both fields are bounded; values that do not fit are rejected at the
//! boundary instead of being silently truncated.

extern crate alloc;
use alloc::string::String as AllocString;
use alloc::vec::Vec;

use core::fmt;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Maximum length of the device identifier, in bytes.
pub const DEVICE_ID_MAX_LEN: usize = 16;

/// Maximum length of the cloud credential token, in bytes.
pub const CREDENTIAL_TOKEN_MAX_LEN: usize = 33;

pub type DeviceId = heapless::String<DEVICE_ID_MAX_LEN>;
pub type CredentialToken = heapless::String<CREDENTIAL_TOKEN_MAX_LEN>;

/// The two fields of the persisted record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigField {
    DeviceId,
    CredentialToken,
}

impl ConfigField {
    /// Key used for this field in the stored record
    pub const fn key(self) -> &'static str {
        match self {
            Self::DeviceId => "device_id",
            Self::CredentialToken => "blynk_token",
        }
    }

    pub const fn max_len(self) -> usize {
        match self {
            Self::DeviceId => DEVICE_ID_MAX_LEN,
            Self::CredentialToken => CREDENTIAL_TOKEN_MAX_LEN,
        }
    }
}

impl fmt::Display for ConfigField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Why a present field was refused
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldProblem {
    Empty,
    TooLong { len: usize, max: usize },
}

impl fmt::Display for FieldProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => f.write_str("value is empty"),
            Self::TooLong { len, max } => write!(f, "{len} bytes, limit is {max}"),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no config record stored")]
    NotFound,
    #[error("config record is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("config record is not a well-formed object")]
    Parse,
    #[error("config field `{0}` is missing")]
    FieldMissing(ConfigField),
    #[error("config field `{field}` is invalid: {problem}")]
    FieldInvalid {
        field: ConfigField,
        problem: FieldProblem,
    },
    #[error("config storage I/O failed")]
    Io,
}

/// Validated device identity
///
/// A `DeviceConfig` can only be built from non-empty fields that fit their
/// bounds, so holding one means the node has a usable identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    device_id: DeviceId,
    credential_token: CredentialToken,
}

/// On-flash shape of the record, fields kept optional so a missing key can be
/// told apart from a malformed blob.
#[derive(Deserialize)]
struct StoredRecord {
    device_id: Option<AllocString>,
    blynk_token: Option<AllocString>,
}

#[derive(Serialize)]
struct StoredRecordRef<'a> {
    device_id: &'a str,
    blynk_token: &'a str,
}

impl DeviceConfig {
    pub fn new(device_id: &str, credential_token: &str) -> Result<Self, ConfigError> {
        Ok(Self {
            device_id: bounded(ConfigField::DeviceId, device_id)?,
            credential_token: bounded(ConfigField::CredentialToken, credential_token)?,
        })
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn credential_token(&self) -> &str {
        &self.credential_token
    }

    /// Decode a stored record
    pub fn from_json(bytes: &[u8]) -> Result<Self, ConfigError> {
        let record: StoredRecord = serde_json::from_slice(bytes).map_err(|_| ConfigError::Parse)?;

        let device_id = record
            .device_id
            .ok_or(ConfigError::FieldMissing(ConfigField::DeviceId))?;
        let credential_token = record
            .blynk_token
            .ok_or(ConfigError::FieldMissing(ConfigField::CredentialToken))?;

        Self::new(&device_id, &credential_token)
    }

    /// Encode the record in its stored form
    pub fn to_json(&self) -> Result<Vec<u8>, ConfigError> {
        serde_json::to_vec(&StoredRecordRef {
            device_id: &self.device_id,
            blynk_token: &self.credential_token,
        })
        .map_err(|_| ConfigError::Parse)
    }
}

fn bounded<const N: usize>(
    field: ConfigField,
    value: &str,
) -> Result<heapless::String<N>, ConfigError> {
    if value.is_empty() {
        return Err(ConfigError::FieldInvalid {
            field,
            problem: FieldProblem::Empty,
        });
    }

    let mut out = heapless::String::new();
    out.push_str(value).map_err(|_| ConfigError::FieldInvalid {
        field,
        problem: FieldProblem::TooLong {
            len: value.len(),
            max: N,
        },
    })?;
    Ok(out)
}
