use serde::{Deserialize, Serialize};

use crate::provision::NetworkListing;

pub const NOT_FOUND_BODY: &str = "404: Not found";

pub const ROOT_PAGE: &str = concat!(
    "<!DOCTYPE HTML>\r\n<html>",
    "<form action=\"/toggle\" method=\"POST\" ",
    "style=\"display:flex;height:100%;align-items:center;justify-content:center;\">",
    "<input type=\"submit\" value=\"Send signal\" ",
    "style=\"width:100%;padding:15px;border-radius:5px;background:#76b900;",
    "color:white;font-weight:bold;font-size:18px;\"/>",
    "</form></html>",
);

pub fn networks_page(ap_ip: &str, listing: &NetworkListing) -> String {
    format!(
        "<!DOCTYPE HTML>\r\n<html>Hello from the IR controller at {ip}<p>{list}</p>\
         <form method='post' action='connect'><label>SSID: </label>\
         <input name='ssid' length=32><input name='password' length=64>\
         <input type='submit'></form></html>",
        ip = escape_html(ap_ip),
        list = listing.to_html(),
    )
}

#[derive(Debug, Serialize)]
struct ConnectSuccess {
    #[serde(rename = "Success")]
    success: &'static str,
}

#[derive(Debug, Serialize)]
struct ConnectFailure<'a> {
    #[serde(rename = "Error")]
    error: &'a str,
}

pub fn connect_success_json() -> String {
    let body = ConnectSuccess {
        success: "saved to EEPROM... reset to boot into new Wi-fi",
    };
    serde_json::to_string(&body).unwrap_or_default()
}

pub fn connect_error_json(message: &str) -> String {
    serde_json::to_string(&ConnectFailure { error: message }).unwrap_or_default()
}

pub const CONNECT_REJECTED_MESSAGE: &str = "404 not found";
pub const CONNECT_STORAGE_MESSAGE: &str = "failed to save credentials";

/// `ssid`/`password` pair posted by the provisioning form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProvisioningForm {
    pub ssid: String,
    pub password: String,
}

impl ProvisioningForm {
    /// Reads fields from the urlencoded body, falling back to the query
    /// string for any field the body leaves empty.
    pub fn parse(query: Option<&str>, body: &[u8]) -> Self {
        let from_body: Self = serde_urlencoded::from_bytes(body).unwrap_or_default();
        let from_query: Self = query
            .and_then(|raw| serde_urlencoded::from_str(raw).ok())
            .unwrap_or_default();

        Self {
            ssid: pick(from_body.ssid, from_query.ssid),
            password: pick(from_body.password, from_query.password),
        }
    }
}

fn pick(primary: String, fallback: String) -> String {
    if primary.is_empty() {
        fallback
    } else {
        primary
    }
}

pub fn escape_html(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            other => escaped.push(other),
        }
    }
    escaped
}
