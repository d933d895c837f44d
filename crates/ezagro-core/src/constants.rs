//! Build-time constants shared by the firmware and the simulator

use embassy_time::Duration;

/// Firmware version reported on the display and to the update server.
pub const FIRMWARE_VERSION: &str = "v0.0.4";

/// Interval between two telemetry ticks.
pub const TELEMETRY_INTERVAL: Duration = Duration::from_secs(10);

/// How long the provisioning portal stays open before the device restarts.
pub const PORTAL_TIMEOUT: Duration = Duration::from_secs(180);

/// Access point opened by the provisioning portal.
pub const PORTAL_SSID: &str = "EZagro";
pub const PORTAL_PASSWORD: &str = "ezsecret";

/// Lines shown while the portal is waiting for credentials.
pub const PROVISIONING_BANNER: [&str; 2] = ["Connect to WiFi:", "EZagro ezsecret"];

/// Cloud endpoint receiving telemetry and delivering remote commands.
pub const CLOUD_HOST: &str = "ezagro.kumekay.com";
pub const CLOUD_PORT: u16 = 8442;

/// Update server queried on a firmware update request.
pub const OTA_UPDATE_URL: &str = "http://firmware.ezagro.kumekay.com/update";

/// Name of the persisted identity record.
pub const CONFIG_FILE_NAME: &str = "config.json";

/// Size ceiling of the persisted identity record, in bytes.
pub const CONFIG_MAX_BYTES: usize = 1024;

/// Time the MH-Z19 needs to answer a read request at 9600 baud.
pub const CO2_RESPONSE_SETTLE_MS: u32 = 50;
