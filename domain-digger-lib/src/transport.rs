//! The lookup transport seam.
//!
//! The scheduler only talks to [`LookupTransport`]. [`NetworkTransport`] is
//! the real implementation; tests substitute scripted ones.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cache::{CacheOptions, MemoryCache, RequestCache};
use crate::config::LookupSettings;
use crate::error::DiggerError;
use crate::protocols::{DnsClient, RdapClient, WhoisClient};
use crate::proxy::ProxyInfo;
use crate::types::LookupKind;

pub use crate::protocols::{DnsOutcome, RdapOptions, RdapReply, WhoisOptions};

/// Unclassified reply of any lookup kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawReply {
    Whois(String),
    Dns(DnsOutcome),
    Rdap { status_code: u16, body: String },
}

#[async_trait]
pub trait LookupTransport: Send + Sync {
    async fn whois(&self, domain: &str, opts: &WhoisOptions) -> Result<String, DiggerError>;

    async fn dns(&self, domain: &str) -> DnsOutcome;

    async fn rdap(&self, domain: &str, opts: &RdapOptions) -> Result<RdapReply, DiggerError>;
}

/// Run one lookup of `kind` and wrap the answer as a [`RawReply`].
pub async fn fetch(
    transport: &dyn LookupTransport,
    kind: LookupKind,
    domain: &str,
    follow: u32,
    timeout: Duration,
    proxy: Option<ProxyInfo>,
) -> Result<RawReply, DiggerError> {
    match kind {
        LookupKind::Whois => {
            let opts = WhoisOptions {
                follow,
                timeout,
                proxy,
            };
            transport.whois(domain, &opts).await.map(RawReply::Whois)
        }
        LookupKind::Dns => Ok(RawReply::Dns(transport.dns(domain).await)),
        LookupKind::Rdap => {
            let opts = RdapOptions { timeout, proxy };
            let reply = transport.rdap(domain, &opts).await?;
            Ok(RawReply::Rdap {
                status_code: reply.status_code,
                body: reply.body,
            })
        }
    }
}

/// WHOIS, DNS and RDAP clients behind a shared request cache.
pub struct NetworkTransport {
    whois: WhoisClient,
    dns: DnsClient,
    rdap: RdapClient,
    cache: Arc<dyn RequestCache>,
    cache_opts: CacheOptions,
}

impl NetworkTransport {
    /// Build all clients from `settings` with a fresh in-memory cache.
    pub fn from_settings(settings: &LookupSettings) -> Result<Self, DiggerError> {
        let whois = WhoisClient::new().with_server(settings.general.server.clone());
        let dns = DnsClient::new(Duration::from_millis(settings.general.timeout_ms));
        let rdap = RdapClient::new(settings.rdap.endpoints.clone())?;

        Ok(Self::new(
            whois,
            dns,
            rdap,
            Arc::new(MemoryCache::new()),
            CacheOptions::from(&settings.cache),
        ))
    }

    pub fn new(
        whois: WhoisClient,
        dns: DnsClient,
        rdap: RdapClient,
        cache: Arc<dyn RequestCache>,
        cache_opts: CacheOptions,
    ) -> Self {
        Self {
            whois,
            dns,
            rdap,
            cache,
            cache_opts,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn RequestCache>) -> Self {
        self.cache = cache;
        self
    }
}

#[async_trait]
impl LookupTransport for NetworkTransport {
    async fn whois(&self, domain: &str, opts: &WhoisOptions) -> Result<String, DiggerError> {
        if let Some(hit) = self.cache.get("whois", domain, self.cache_opts).await {
            debug!(domain, "whois cache hit");
            return Ok(hit);
        }

        let reply = self.whois.lookup(domain, opts).await?;
        self.cache.set("whois", domain, &reply, self.cache_opts).await;
        Ok(reply)
    }

    async fn dns(&self, domain: &str) -> DnsOutcome {
        if let Some(hit) = self.cache.get("dns", domain, self.cache_opts).await {
            if let Ok(outcome) = serde_json::from_str::<DnsOutcome>(&hit) {
                debug!(domain, "dns cache hit");
                return outcome;
            }
        }

        let outcome = self.dns.lookup_ns(domain).await;
        // Resolver failures are transient
        if !matches!(outcome, DnsOutcome::Failed(_)) {
            if let Ok(json) = serde_json::to_string(&outcome) {
                self.cache.set("dns", domain, &json, self.cache_opts).await;
            }
        }
        outcome
    }

    async fn rdap(&self, domain: &str, opts: &RdapOptions) -> Result<RdapReply, DiggerError> {
        if let Some(hit) = self.cache.get("rdap", domain, self.cache_opts).await {
            if let Ok(reply) = serde_json::from_str::<RdapReply>(&hit) {
                debug!(domain, "rdap cache hit");
                return Ok(reply);
            }
        }

        let reply = self.rdap.lookup(domain, opts).await?;
        let json = serde_json::to_string(&reply)?;
        self.cache.set("rdap", domain, &json, self.cache_opts).await;
        Ok(reply)
    }
}
