//! RDAP (Registration Data Access Protocol) client.
//!
//! Each configured endpoint is a URL prefix the domain is appended to, e.g.
//! `https://rdap.org/domain/`. Endpoints are tried in order until one gives a
//! definitive answer (200 or 404).

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::DiggerError;
use crate::proxy::ProxyInfo;

/// Per-call RDAP options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RdapOptions {
    pub timeout: Duration,
    pub proxy: Option<ProxyInfo>,
}

impl Default for RdapOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(2500),
            proxy: None,
        }
    }
}

/// Status code and body of the answering endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RdapReply {
    pub status_code: u16,
    pub body: String,
}

#[derive(Clone)]
pub struct RdapClient {
    http_client: reqwest::Client,
    endpoints: Vec<String>,
}

impl RdapClient {
    /// Create a client for `endpoints`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when `endpoints` is empty and `NetworkError` when
    /// the HTTP client cannot be built.
    pub fn new(endpoints: Vec<String>) -> Result<Self, DiggerError> {
        if endpoints.is_empty() {
            return Err(DiggerError::config("At least one RDAP endpoint is required"));
        }

        Ok(Self {
            http_client: build_client(None)?,
            endpoints,
        })
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// Query every endpoint in turn.
    ///
    /// 429 and 5xx answers, as well as transport failures, move on to the next
    /// endpoint. Other statuses are returned as they are. When every endpoint
    /// fails the last error is returned.
    pub async fn lookup(&self, domain: &str, opts: &RdapOptions) -> Result<RdapReply, DiggerError> {
        let client = match &opts.proxy {
            Some(proxy) => build_client(Some(proxy))?,
            None => self.http_client.clone(),
        };

        let mut last_error = DiggerError::rdap(domain, "No RDAP endpoint answered");
        for endpoint in &self.endpoints {
            let url = format!("{}{}", endpoint, domain);
            debug!(domain, url = %url, "rdap request");

            match self.request(&client, &url, domain, opts.timeout).await {
                Ok(reply) => return Ok(reply),
                Err(e) => {
                    warn!(domain, url = %url, error = %e, "rdap endpoint failed");
                    last_error = e;
                }
            }
        }

        Err(last_error)
    }

    async fn request(
        &self,
        client: &reqwest::Client,
        url: &str,
        domain: &str,
        timeout: Duration,
    ) -> Result<RdapReply, DiggerError> {
        let response = client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/rdap+json")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DiggerError::timeout("RDAP request", timeout)
                } else {
                    DiggerError::rdap(domain, format!("Request failed: {}", e))
                }
            })?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            return Err(DiggerError::rdap_with_status(
                domain,
                format!("RDAP server returned {}", status),
                status.as_u16(),
            ));
        }

        let body = response
            .text()
            .await
            .map_err(|e| DiggerError::rdap(domain, format!("Failed to read body: {}", e)))?;

        Ok(RdapReply {
            status_code: status.as_u16(),
            body,
        })
    }
}

fn build_client(proxy: Option<&ProxyInfo>) -> Result<reqwest::Client, DiggerError> {
    let mut builder = reqwest::Client::builder().user_agent(concat!(
        "domain-digger/",
        env!("CARGO_PKG_VERSION")
    ));

    if let Some(proxy) = proxy {
        let proxy = reqwest::Proxy::all(proxy.url()).map_err(|e| {
            DiggerError::invalid_proxy(proxy.key(), format!("Unusable proxy URL: {}", e))
        })?;
        builder = builder.proxy(proxy);
    }

    builder.build().map_err(|e| {
        DiggerError::network_with_source("Failed to create RDAP HTTP client", e.to_string())
    })
}
