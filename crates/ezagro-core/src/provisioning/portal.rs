//! Captive portal page and form submission codec

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write;

use thiserror_no_std::Error;

use super::{PortalSubmission, WifiCredentials};
use crate::config::{CREDENTIAL_TOKEN_MAX_LEN, DEVICE_ID_MAX_LEN, DeviceConfig};
use crate::constants::FIRMWARE_VERSION;

/// Form field names posted by the portal page
pub const FIELD_SSID: &str = "s";
pub const FIELD_PASSWORD: &str = "p";
pub const FIELD_DEVICE_ID: &str = "device_id";
pub const FIELD_CREDENTIAL_TOKEN: &str = "blynk";

/// Path the form posts to
pub const SAVE_PATH: &str = "/wifisave";

pub const SSID_MAX_LEN: usize = 32;
pub const PASSWORD_MAX_LEN: usize = 64;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormError {
    #[error("network name is required")]
    MissingSsid,
    #[error("`{field}` is longer than {max} bytes")]
    TooLong { field: &'static str, max: usize },
    #[error("form body is not valid url-encoding")]
    Malformed,
}

/// Render the configuration page, seeded with the last known identity
pub fn render_form(seed: Option<&DeviceConfig>, notice: Option<&str>) -> String {
    let device_id = seed.map(DeviceConfig::device_id).unwrap_or("");
    let token = seed.map(DeviceConfig::credential_token).unwrap_or("");

    let mut page = String::with_capacity(1024);
    page.push_str(
        "<!DOCTYPE html><html><head><meta name=\"viewport\" \
         content=\"width=device-width,initial-scale=1\"><title>EZagro setup</title></head><body>",
    );
    let _ = write!(page, "<h1>EZagro {}</h1>", FIRMWARE_VERSION);
    if let Some(notice) = notice {
        page.push_str("<p class=\"notice\">");
        escape_into(&mut page, notice);
        page.push_str("</p>");
    }
    let _ = write!(page, "<form method=\"post\" action=\"{}\">", SAVE_PATH);
    input(&mut page, FIELD_SSID, "WiFi network", "", SSID_MAX_LEN, "text");
    input(&mut page, FIELD_PASSWORD, "WiFi password", "", PASSWORD_MAX_LEN, "password");
    input(&mut page, FIELD_DEVICE_ID, "Device ID", device_id, DEVICE_ID_MAX_LEN, "text");
    input(
        &mut page,
        FIELD_CREDENTIAL_TOKEN,
        "Blynk token",
        token,
        CREDENTIAL_TOKEN_MAX_LEN,
        "text",
    );
    page.push_str("<button type=\"submit\">Save</button></form></body></html>");
    page
}

fn input(page: &mut String, name: &str, label: &str, value: &str, max: usize, kind: &str) {
    let _ = write!(
        page,
        "<p><label for=\"{name}\">{label}</label><br>\
         <input id=\"{name}\" name=\"{name}\" type=\"{kind}\" maxlength=\"{max}\" value=\""
    );
    escape_into(page, value);
    page.push_str("\"></p>");
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
}

/// Parse an `application/x-www-form-urlencoded` body posted by the page
///
/// Only the network name is required here. Identity fields are checked by
/// the provisioning flow so that it can answer with a notice.
pub fn parse_submission(body: &str) -> Result<PortalSubmission, FormError> {
    let mut ssid = None;
    let mut password = String::new();
    let mut device_id = String::new();
    let mut credential_token = String::new();

    for pair in body.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        let value = url_decode(value)?;
        match url_decode(key)?.as_str() {
            FIELD_SSID => ssid = Some(value),
            FIELD_PASSWORD => password = value,
            FIELD_DEVICE_ID => device_id = value,
            FIELD_CREDENTIAL_TOKEN => credential_token = value,
            _ => {}
        }
    }

    let ssid = ssid.filter(|s| !s.is_empty()).ok_or(FormError::MissingSsid)?;
    Ok(PortalSubmission {
        wifi: WifiCredentials::new(&ssid, &password)?,
        device_id,
        credential_token,
    })
}

fn url_decode(text: &str) -> Result<String, FormError> {
    let mut bytes = Vec::with_capacity(text.len());
    let mut input = text.bytes();
    while let Some(b) = input.next() {
        match b {
            b'+' => bytes.push(b' '),
            b'%' => {
                let high = input.next().and_then(hex_value).ok_or(FormError::Malformed)?;
                let low = input.next().and_then(hex_value).ok_or(FormError::Malformed)?;
                bytes.push((high << 4) | low);
            }
            b => bytes.push(b),
        }
    }
    String::from_utf8(bytes).map_err(|_| FormError::Malformed)
}

fn hex_value(digit: u8) -> Option<u8> {
    match digit {
        b'0'..=b'9' => Some(digit - b'0'),
        b'a'..=b'f' => Some(digit - b'a' + 10),
        b'A'..=b'F' => Some(digit - b'A' + 10),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_submission() {
        let sub =
            parse_submission("s=Farm+Net&p=p%40ss%26word&device_id=greenhouse-2&blynk=abc123")
                .unwrap();
        assert_eq!(sub.wifi.ssid(), "Farm Net");
        assert_eq!(sub.wifi.password(), "p@ss&word");
        assert_eq!(sub.device_id, "greenhouse-2");
        assert_eq!(sub.credential_token, "abc123");
    }

    #[test]
    fn test_optional_fields_default_to_empty() {
        let sub = parse_submission("s=open&unknown=1").unwrap();
        assert_eq!(sub.wifi.password(), "");
        assert!(sub.device_id.is_empty());
        assert!(sub.credential_token.is_empty());
    }

    #[test]
    fn test_missing_or_empty_ssid() {
        assert_eq!(parse_submission("p=x").unwrap_err(), FormError::MissingSsid);
        assert_eq!(parse_submission("s=&p=x").unwrap_err(), FormError::MissingSsid);
        assert_eq!(parse_submission("").unwrap_err(), FormError::MissingSsid);
    }

    #[test]
    fn test_bad_escapes_are_malformed() {
        assert_eq!(parse_submission("s=a%2").unwrap_err(), FormError::Malformed);
        assert_eq!(parse_submission("s=a%zz").unwrap_err(), FormError::Malformed);
        assert_eq!(parse_submission("s=%ff%fe").unwrap_err(), FormError::Malformed);
    }

    #[test]
    fn test_overlong_ssid_is_rejected() {
        let body = format!("s={}", "n".repeat(33));
        assert_eq!(
            parse_submission(&body).unwrap_err(),
            FormError::TooLong {
                field: FIELD_SSID,
                max: SSID_MAX_LEN
            }
        );
    }

    #[test]
    fn test_form_is_seeded_and_escaped() {
        let seed = DeviceConfig::new("a\"<b>", "tok&en").unwrap();
        let page = render_form(Some(&seed), Some("Device ID <too long>"));

        assert!(page.contains("value=\"a&quot;&lt;b&gt;\""));
        assert!(page.contains("value=\"tok&amp;en\""));
        assert!(page.contains("Device ID &lt;too long&gt;"));
        assert!(page.contains("name=\"device_id\" type=\"text\" maxlength=\"16\""));
        assert!(page.contains("name=\"blynk\" type=\"text\" maxlength=\"33\""));
    }

    #[test]
    fn test_unseeded_form_has_empty_values() {
        let page = render_form(None, None);
        assert!(page.contains("name=\"device_id\" type=\"text\" maxlength=\"16\" value=\"\""));
        assert!(!page.contains("class=\"notice\""));
    }
}
