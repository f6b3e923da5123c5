//! Data models for quick-auth portal sessions

use serde::{Deserialize, Deserializer};
use std::fmt;
use std::net::Ipv4Addr;

/// The (interface, local IPv4, MAC) triple a session's traffic is pinned to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceBinding {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mac: String,
}

impl fmt::Display for InterfaceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}|{})", self.name, self.ip, self.mac)
    }
}

/// Parameters carried by the portal's `portalScript.do` redirect
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalRedirectParams {
    pub host: String,
    pub wlanuserip: String,
    pub wlanacname: String,
    pub mac: String,
    pub vlan: String,
    pub hostname: String,
    pub rand: String,
}

/// Login prerequisites returned by `/PortalJsonAction.do`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PortalActionInfo {
    pub server_ip: String,
    pub version: i64,
    pub page_id: i64,
    pub timestamp: i64,
    pub uuid: String,
}

/// Raw `/PortalJsonAction.do` body. Only a handful of fields matter to us,
/// everything else is kept around untyped.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionResponse {
    #[serde(rename = "serverForm", default)]
    pub server_form: ServerForm,

    #[serde(rename = "portalconfig", default)]
    pub portal_config: PortalPageConfig,

    #[serde(flatten)]
    pub extra: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ServerForm {
    #[serde(default)]
    pub serverip: String,

    #[serde(rename = "portalVer", default)]
    pub portal_ver: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortalPageConfig {
    #[serde(default)]
    pub id: i64,

    #[serde(default)]
    pub timestamp: i64,

    #[serde(default)]
    pub uuid: String,
}

impl From<ActionResponse> for PortalActionInfo {
    fn from(resp: ActionResponse) -> Self {
        Self {
            server_ip: resp.server_form.serverip,
            version: resp.server_form.portal_ver,
            page_id: resp.portal_config.id,
            timestamp: resp.portal_config.timestamp,
            uuid: resp.portal_config.uuid,
        }
    }
}

/// Response of `/quickauth.do` and `/quickauthdisconn.do`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoginResult {
    #[serde(default, deserialize_with = "string_or_number")]
    pub code: String,

    #[serde(default)]
    pub message: String,

    #[serde(rename = "groupId", default)]
    pub group_id: Option<i64>,

    #[serde(rename = "userId", default)]
    pub user_id: Option<String>,
}

impl LoginResult {
    pub fn is_success(&self) -> bool {
        self.code == "0"
    }
}

// Some portal builds send `"code": 0` instead of `"code": "0"`.
fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number for code, got {other}"
        ))),
    }
}

/// Lifecycle phase of one account session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionPhase {
    Starting,
    NotLoggedIn,
    LoggingIn,
    LoggedIn,
    Paused,
    LoggingOut,
    Stopped,
}

impl SessionPhase {
    pub fn is_terminal(self) -> bool {
        self == SessionPhase::Stopped
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            SessionPhase::Starting => "Starting",
            SessionPhase::NotLoggedIn => "Not logged in",
            SessionPhase::LoggingIn => "Logging in",
            SessionPhase::LoggedIn => "Logged in",
            SessionPhase::Paused => "Paused",
            SessionPhase::LoggingOut => "Logging out",
            SessionPhase::Stopped => "Stopped",
        };
        f.write_str(label)
    }
}

/// Published by a session every time its phase changes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub account: String,
    pub phase: SessionPhase,
}
