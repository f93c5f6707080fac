//! NS lookups through hickory-resolver.

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::error::{ResolveError, ResolveErrorKind};
use hickory_resolver::proto::op::ResponseCode;
use hickory_resolver::TokioAsyncResolver;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// What an NS query said about a domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DnsOutcome {
    /// The zone is delegated.
    HasNameservers(Vec<String>),
    /// NXDOMAIN.
    NoSuchDomain,
    /// Anything else: SERVFAIL, timeouts, empty answers.
    Failed(String),
}

impl fmt::Display for DnsOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnsOutcome::HasNameservers(ns) => write!(f, "NS {}", ns.join(", ")),
            DnsOutcome::NoSuchDomain => write!(f, "NXDOMAIN"),
            DnsOutcome::Failed(reason) => write!(f, "DNS lookup failed: {}", reason),
        }
    }
}

#[derive(Clone)]
pub struct DnsClient {
    resolver: TokioAsyncResolver,
}

impl DnsClient {
    /// Resolver using public upstreams with the given per-query timeout.
    pub fn new(timeout: Duration) -> Self {
        let mut opts = ResolverOpts::default();
        opts.timeout = timeout;
        opts.attempts = 1;
        // A cached NXDOMAIN would hide a fresh registration
        opts.cache_size = 0;

        Self {
            resolver: TokioAsyncResolver::tokio(ResolverConfig::google(), opts),
        }
    }

    pub async fn lookup_ns(&self, domain: &str) -> DnsOutcome {
        let outcome = match self.resolver.ns_lookup(domain).await {
            Ok(response) => {
                let nameservers: Vec<String> = response
                    .iter()
                    .map(|ns| ns.0.to_string().trim_end_matches('.').to_string())
                    .collect();
                if nameservers.is_empty() {
                    DnsOutcome::Failed("empty NS answer".to_string())
                } else {
                    DnsOutcome::HasNameservers(nameservers)
                }
            }
            Err(e) => outcome_from_error(&e),
        };

        debug!(domain, %outcome, "ns lookup");
        outcome
    }
}

fn outcome_from_error(err: &ResolveError) -> DnsOutcome {
    match err.kind() {
        ResolveErrorKind::NoRecordsFound {
            response_code: ResponseCode::NXDomain,
            ..
        } => DnsOutcome::NoSuchDomain,
        _ => DnsOutcome::Failed(err.to_string()),
    }
}
