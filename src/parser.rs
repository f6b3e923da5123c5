//! Redirect URL parsing

use crate::models::PortalRedirectParams;
use crate::portal::PortalError;
use url::Url;

/// Marker the portal's redirect target always contains
pub const PORTAL_SCRIPT_MARKER: &str = "portalScript.do";

/// Whether a `Location` header points at the login portal
pub fn is_portal_redirect(location: &str) -> bool {
    location.contains(PORTAL_SCRIPT_MARKER)
}

/// Extract the login parameters from a captured `portalScript.do` redirect.
///
/// Missing query parameters come back as empty strings; the portal accepts
/// them that way.
pub fn parse_redirect(location: &str) -> Result<PortalRedirectParams, PortalError> {
    let url = Url::parse(location)
        .map_err(|e| PortalError::InvalidRedirect(format!("{location}: {e}")))?;

    let host = match (url.host_str(), url.port()) {
        (Some(host), Some(port)) => format!("{host}:{port}"),
        (Some(host), None) => host.to_string(),
        (None, _) => {
            return Err(PortalError::InvalidRedirect(format!(
                "{location}: missing host"
            )))
        }
    };

    let query = |key: &str| {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default()
    };

    Ok(PortalRedirectParams {
        host,
        wlanuserip: query("wlanuserip"),
        wlanacname: query("wlanacname"),
        mac: query("mac"),
        vlan: query("vlan"),
        hostname: query("hostname"),
        rand: query("rand"),
    })
}
