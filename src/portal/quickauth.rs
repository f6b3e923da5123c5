//! Quick-auth wire protocol
//!
//! Three endpoints on the login host plus the keep-alive probe:
//! - `GET  /PortalJsonAction.do` - portal page parameters needed to log in
//! - `GET  /quickauth.do` - login
//! - `POST /quickauthdisconn.do` - logout (form encoded)

use super::{
    ActionInfoRequest, LoginRequest, LogoutRequest, Outbound, PortalApi, PortalCheck, PortalError,
};
use crate::config::HttpConfig;
use crate::http::BoundClient;
use crate::models::{ActionResponse, LoginResult, PortalActionInfo};
use crate::parser;
use async_trait::async_trait;
use reqwest::header::LOCATION;
use reqwest::Response;
use serde::de::DeserializeOwned;
use url::Url;

pub struct QuickAuthClient {
    http: HttpConfig,
}

impl QuickAuthClient {
    pub fn new(http: HttpConfig) -> Self {
        Self { http }
    }

    fn client(&self, out: Outbound<'_>) -> Result<BoundClient, PortalError> {
        Ok(BoundClient::new(out.binding, out.user_agent, &self.http)?)
    }
}

#[async_trait]
impl PortalApi for QuickAuthClient {
    async fn check_portal(&self, out: Outbound<'_>, probe_url: &str) -> PortalCheck {
        let client = match self.client(out) {
            Ok(client) => client,
            Err(e) => {
                tracing::debug!("Cannot build probe client on {}: {}", out.binding, e);
                return PortalCheck::Online;
            }
        };

        let resp = match client.get(probe_url).await {
            Ok(resp) => resp,
            Err(e) => {
                tracing::debug!("Probe {} failed: {}", probe_url, e);
                return PortalCheck::Online;
            }
        };

        if !resp.status().is_redirection() {
            return PortalCheck::Online;
        }

        let location = match resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()) {
            Some(loc) => loc,
            None => return PortalCheck::Online,
        };

        if !parser::is_portal_redirect(location) {
            tracing::debug!("Probe redirected to non-portal location {}", location);
            return PortalCheck::Online;
        }

        // An unparsable location is still an intercept; the login attempt
        // reports it as a failure.
        let location = absolute_location(probe_url, location).unwrap_or_else(|| location.to_string());
        PortalCheck::LoginRequired(location)
    }

    async fn fetch_action_info(
        &self,
        out: Outbound<'_>,
        req: &ActionInfoRequest,
    ) -> Result<PortalActionInfo, PortalError> {
        let url = format!("http://{}/PortalJsonAction.do", req.host);
        let query = [
            ("wlanuserip", req.wlanuserip.as_str()),
            ("wlanacname", req.wlanacname.as_str()),
            ("mac", req.mac.as_str()),
            ("vlan", req.vlan.as_str()),
            ("hostname", req.hostname.as_str()),
            ("rand", req.rand.as_str()),
            ("viewStatus", "1"),
        ];

        let resp = self.client(out)?.get_query(&url, &query).await?;
        let action: ActionResponse = decode(resp).await?;
        Ok(action.into())
    }

    async fn login(&self, out: Outbound<'_>, req: &LoginRequest) -> Result<LoginResult, PortalError> {
        let url = format!("http://{}/quickauth.do", req.host);
        let version = req.version.to_string();
        let page_id = req.page_id.to_string();
        let timestamp = req.timestamp.to_string();
        let query = [
            ("userid", req.username.as_str()),
            ("passwd", req.password.as_str()),
            ("wlanuserip", req.wlanuserip.as_str()),
            ("wlanacname", req.wlanacname.as_str()),
            ("wlanacIp", req.wlanac_ip.as_str()),
            ("vlan", req.vlan.as_str()),
            ("mac", req.mac.as_str()),
            ("version", version.as_str()),
            ("portalpageid", page_id.as_str()),
            ("timestamp", timestamp.as_str()),
            ("uuid", req.uuid.as_str()),
            ("portaltype", req.portal_type.as_str()),
            ("hostname", req.hostname.as_str()),
            ("rand", req.rand.as_str()),
        ];

        let resp = self.client(out)?.get_query(&url, &query).await?;
        decode(resp).await
    }

    async fn logout(&self, out: Outbound<'_>, req: &LogoutRequest) -> Result<LoginResult, PortalError> {
        let url = format!("http://{}/quickauthdisconn.do", req.host);
        let version = req.version.to_string();
        let group_id = req.group_id.to_string();
        let form = [
            ("wlanacip", req.wlanac_ip.as_str()),
            ("wlanuserip", req.wlanuserip.as_str()),
            ("wlanacname", req.wlanacname.as_str()),
            ("version", version.as_str()),
            ("portaltype", req.portal_type.as_str()),
            ("userid", req.user_id.as_str()),
            ("mac", req.mac.as_str()),
            ("groupId", group_id.as_str()),
            ("clearOperator", req.clear_operator.as_str()),
        ];

        let resp = self.client(out)?.post_form(&url, &form).await?;
        decode(resp).await
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T, PortalError> {
    let status = resp.status().as_u16();
    let body = resp.bytes().await?;
    serde_json::from_slice(&body).map_err(|source| PortalError::ProtocolDecode { status, source })
}

// `Location` may be relative to the probe URL.
fn absolute_location(probe_url: &str, location: &str) -> Option<String> {
    match Url::parse(location) {
        Ok(url) => Some(url.to_string()),
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(probe_url)
            .and_then(|base| base.join(location))
            .map(|url| url.to_string())
            .ok(),
        Err(_) => None,
    }
}
