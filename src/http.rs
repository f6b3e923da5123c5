//! HTTP client pinned to one local interface, with redirects disabled

use crate::config::HttpConfig;
use crate::models::InterfaceBinding;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use std::net::IpAddr;
use std::time::Duration;

const ACCEPT_JSON: &str = "application/json, text/javascript, */*; q=0.01";

pub struct BoundClient {
    inner: Client,
}

impl BoundClient {
    /// Build a client whose connections originate from `binding`'s address.
    ///
    /// 3xx responses are returned as-is so the caller can read `Location`.
    /// The timeout covers the whole exchange, body included.
    pub fn new(
        binding: &InterfaceBinding,
        user_agent: &str,
        http: &HttpConfig,
    ) -> reqwest::Result<Self> {
        let mut headers = HeaderMap::new();
        match HeaderValue::from_str(user_agent) {
            Ok(value) => {
                headers.insert(USER_AGENT, value);
            }
            Err(_) => tracing::warn!("Ignoring invalid user agent '{}'", user_agent),
        }
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_JSON));
        if let Ok(value) = HeaderValue::from_str(&http.accept_language) {
            headers.insert(ACCEPT_LANGUAGE, value);
        }

        let builder = Client::builder()
            .redirect(Policy::none())
            .timeout(Duration::from_secs(http.timeout))
            .local_address(IpAddr::V4(binding.ip))
            .no_proxy()
            .default_headers(headers);

        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        let builder = if http.bind_device {
            builder.interface(&binding.name)
        } else {
            builder
        };

        Ok(Self {
            inner: builder.build()?,
        })
    }

    pub async fn get(&self, url: &str) -> reqwest::Result<Response> {
        self.inner.get(url).send().await
    }

    pub async fn get_query<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        query: &T,
    ) -> reqwest::Result<Response> {
        self.inner.get(url).query(query).send().await
    }

    pub async fn post_form<T: serde::Serialize + ?Sized>(
        &self,
        url: &str,
        form: &T,
    ) -> reqwest::Result<Response> {
        self.inner.post(url).form(form).send().await
    }
}
