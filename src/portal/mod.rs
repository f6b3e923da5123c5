//! Quick-auth portal protocol
//!
//! The `PortalApi` trait is the seam between the session state machine and
//! the wire protocol. `QuickAuthClient` speaks the real protocol over a
//! `BoundClient`; tests substitute an in-memory implementation.

pub mod quickauth;

pub use quickauth::QuickAuthClient;

use crate::models::{InterfaceBinding, LoginResult, PortalActionInfo};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortalError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to decode portal response (HTTP {status}): {source}")]
    ProtocolDecode {
        status: u16,
        #[source]
        source: serde_json::Error,
    },

    #[error("unexpected redirect: {0}")]
    InvalidRedirect(String),
}

/// Where a request leaves from and what it identifies as
#[derive(Debug, Clone, Copy)]
pub struct Outbound<'a> {
    pub binding: &'a InterfaceBinding,
    pub user_agent: &'a str,
}

/// Result of probing the keep-alive URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortalCheck {
    /// Traffic passes, or the probe failed; nothing to do this cycle
    Online,
    /// Intercepted by the portal; carries the captured `Location`
    LoginRequired(String),
}

#[derive(Debug, Clone, Default)]
pub struct ActionInfoRequest {
    pub host: String,
    pub wlanuserip: String,
    pub wlanacname: String,
    pub mac: String,
    pub vlan: String,
    pub hostname: String,
    pub rand: String,
}

#[derive(Debug, Clone, Default)]
pub struct LoginRequest {
    pub host: String,
    pub username: String,
    pub password: String,
    pub wlanuserip: String,
    pub wlanacname: String,
    pub wlanac_ip: String,
    pub vlan: String,
    pub mac: String,
    pub version: i64,
    pub page_id: i64,
    pub timestamp: i64,
    pub uuid: String,
    pub portal_type: String,
    pub hostname: String,
    pub rand: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogoutRequest {
    pub host: String,
    pub wlanac_ip: String,
    pub wlanuserip: String,
    pub wlanacname: String,
    pub version: i64,
    pub portal_type: String,
    pub user_id: String,
    pub mac: String,
    pub group_id: i64,
    pub clear_operator: String,
}

#[async_trait]
pub trait PortalApi: Send + Sync {
    /// Probe `probe_url`. Only a redirect into `portalScript.do` counts as
    /// "login required"; request failures are reported as `Online`.
    async fn check_portal(&self, out: Outbound<'_>, probe_url: &str) -> PortalCheck;

    async fn fetch_action_info(
        &self,
        out: Outbound<'_>,
        req: &ActionInfoRequest,
    ) -> Result<PortalActionInfo, PortalError>;

    /// Submit credentials. A non-zero `code` is returned as `Ok`; the caller
    /// decides what a rejected login means.
    async fn login(&self, out: Outbound<'_>, req: &LoginRequest) -> Result<LoginResult, PortalError>;

    async fn logout(&self, out: Outbound<'_>, req: &LogoutRequest) -> Result<LoginResult, PortalError>;
}
