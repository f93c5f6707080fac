//! Proxy rotation with failure memory, plus the retry loop that drives it.
//!
//! Every dispatch asks the [`ProxyRotator`] for the next proxy under the
//! configured policy. Failures are counted per proxy in a [`FailureLedger`];
//! a proxy whose unexpired count reaches `retries` is skipped until the count
//! expires or the proxy succeeds once.

use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::config::{ProxyEntry, ProxyMode, ProxySettings, RotationPolicy};
use crate::error::DiggerError;

/// How long a recorded failure counts against a proxy.
pub const FAILURE_EXPIRY: Duration = Duration::from_secs(5 * 60);

/// Backoff cap between attempts.
pub const MAX_BACKOFF: Duration = Duration::from_millis(2000);

const BASE_BACKOFF_MS: u64 = 250;

/// A parsed SOCKS5 proxy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyInfo {
    pub address: IpAddr,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl ProxyInfo {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    /// Ledger key: `host:port`, IPv6 hosts bracketed.
    pub fn key(&self) -> String {
        self.socket_addr().to_string()
    }

    /// `socks5://` URL for HTTP clients.
    pub fn url(&self) -> String {
        match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!("socks5://{}:{}@{}", user, pass, self.key()),
            (Some(user), None) => format!("socks5://{}@{}", user, self.key()),
            _ => format!("socks5://{}", self.key()),
        }
    }
}

/// Parse a proxy list item.
///
/// Accepts `host:port`, `user:pass@host:port` and `[ipv6]:port`. The host
/// must be an IP literal and the port within `1..=65535`. Credentials fall
/// back to the pool defaults when the entry carries none.
pub fn parse_entry(
    entry: &ProxyEntry,
    default_username: Option<&str>,
    default_password: Option<&str>,
) -> Result<ProxyInfo, DiggerError> {
    let (raw, entry_username, entry_password) = match entry {
        ProxyEntry::Plain(raw) => (raw.as_str(), None, None),
        ProxyEntry::Detailed {
            proxy,
            username,
            password,
        } => (proxy.as_str(), username.clone(), password.clone()),
    };

    let raw = raw.trim();
    let (credentials, address) = match raw.rsplit_once('@') {
        Some((creds, address)) => (Some(creds), address),
        None => (None, raw),
    };

    let (inline_username, inline_password) = match credentials {
        Some(creds) => match creds.split_once(':') {
            Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string())),
            None => (Some(creds.to_string()), None),
        },
        None => (None, None),
    };

    let (host, port) = split_host_port(address).ok_or_else(|| {
        DiggerError::invalid_proxy(raw, "expected host:port or [ipv6]:port")
    })?;

    let address: IpAddr = host
        .parse()
        .map_err(|_| DiggerError::invalid_proxy(raw, format!("'{}' is not an IP address", host)))?;

    let port = match port.parse::<u16>() {
        Ok(port) if port > 0 => port,
        _ => {
            return Err(DiggerError::invalid_proxy(
                raw,
                format!("port '{}' is outside 1-65535", port),
            ))
        }
    };

    Ok(ProxyInfo {
        address,
        port,
        username: entry_username
            .or(inline_username)
            .or_else(|| default_username.map(str::to_string)),
        password: entry_password
            .or(inline_password)
            .or_else(|| default_password.map(str::to_string)),
    })
}

fn split_host_port(address: &str) -> Option<(&str, &str)> {
    if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        let port = tail.strip_prefix(':')?;
        return Some((host, port));
    }

    let (host, port) = address.split_once(':')?;
    // An unbracketed IPv6 literal is ambiguous
    if port.contains(':') || host.is_empty() || port.is_empty() {
        return None;
    }
    Some((host, port))
}

#[derive(Debug, Clone, Copy)]
struct FailureRecord {
    count: u32,
    last_failure_at: Instant,
}

/// Per-proxy failure counts with a fixed expiry window.
#[derive(Debug, Default)]
pub struct FailureLedger {
    entries: HashMap<String, FailureRecord>,
}

impl FailureLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_failure(&mut self, key: &str, now: Instant) -> u32 {
        let record = self
            .entries
            .entry(key.to_string())
            .or_insert(FailureRecord {
                count: 0,
                last_failure_at: now,
            });
        record.count += 1;
        record.last_failure_at = now;
        record.count
    }

    pub fn record_success(&mut self, key: &str) {
        self.entries.remove(key);
    }

    /// Drop entries whose last failure is older than [`FAILURE_EXPIRY`].
    pub fn prune(&mut self, now: Instant) {
        self.entries
            .retain(|_, record| now.duration_since(record.last_failure_at) <= FAILURE_EXPIRY);
    }

    pub fn failures(&self, key: &str) -> u32 {
        self.entries.get(key).map_or(0, |record| record.count)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Default)]
struct RotationState {
    index: usize,
    ledger: FailureLedger,
}

/// Chooses a proxy per dispatch.
#[derive(Debug)]
pub struct ProxyRotator {
    enabled: bool,
    policy: RotationPolicy,
    retries: u32,
    candidates: Vec<ProxyInfo>,
    state: Mutex<RotationState>,
}

impl ProxyRotator {
    /// Build a rotator from settings. Unparsable entries are dropped.
    pub fn new(settings: &ProxySettings) -> Self {
        let user = settings.username.as_deref();
        let pass = settings.password.as_deref();

        let entries: Vec<ProxyEntry> = match settings.mode {
            ProxyMode::Single => settings
                .single
                .iter()
                .map(|s| ProxyEntry::Plain(s.clone()))
                .collect(),
            ProxyMode::Multi => settings.list.clone(),
        };

        let candidates = entries
            .iter()
            .filter_map(|entry| match parse_entry(entry, user, pass) {
                Ok(info) => Some(info),
                Err(e) => {
                    warn!(error = %e, "ignoring proxy entry");
                    None
                }
            })
            .collect();

        Self {
            enabled: settings.enable,
            policy: settings.multimode,
            retries: settings.retries,
            candidates,
            state: Mutex::new(RotationState::default()),
        }
    }

    /// A rotator that never returns a proxy.
    pub fn disabled() -> Self {
        Self::new(&ProxySettings::default())
    }

    pub fn is_active(&self) -> bool {
        self.enabled && !self.candidates.is_empty()
    }

    pub fn candidates(&self) -> &[ProxyInfo] {
        &self.candidates
    }

    fn lock(&self) -> MutexGuard<'_, RotationState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn is_exhausted(&self, ledger: &FailureLedger, candidate: &ProxyInfo) -> bool {
        self.retries > 0 && ledger.failures(&candidate.key()) >= self.retries
    }

    /// Next proxy under the rotation policy, or `None` when proxies are off
    /// or every candidate is exhausted.
    pub fn next_proxy(&self) -> Option<ProxyInfo> {
        if !self.is_active() {
            return None;
        }

        let len = self.candidates.len();
        let mut state = self.lock();
        state.ledger.prune(Instant::now());

        let chosen = match self.policy {
            RotationPolicy::Random => {
                let eligible: Vec<&ProxyInfo> = self
                    .candidates
                    .iter()
                    .filter(|c| !self.is_exhausted(&state.ledger, c))
                    .collect();
                if eligible.is_empty() {
                    None
                } else {
                    let pick = rand::rng().random_range(0..eligible.len());
                    Some(eligible[pick].clone())
                }
            }
            RotationPolicy::Sequential | RotationPolicy::Ascending => {
                let mut found = None;
                for _ in 0..len {
                    let current = state.index % len;
                    state.index = (current + 1) % len;
                    if !self.is_exhausted(&state.ledger, &self.candidates[current]) {
                        found = Some(self.candidates[current].clone());
                        break;
                    }
                }
                found
            }
            RotationPolicy::Descending => {
                let mut found = None;
                for _ in 0..len {
                    state.index = if state.index == 0 {
                        len - 1
                    } else {
                        (state.index - 1) % len
                    };
                    let current = state.index;
                    if !self.is_exhausted(&state.ledger, &self.candidates[current]) {
                        found = Some(self.candidates[current].clone());
                        break;
                    }
                }
                found
            }
        };

        match &chosen {
            Some(proxy) => debug!(proxy = %proxy.key(), "selected proxy"),
            None => warn!("every proxy is exhausted, dispatching without one"),
        }
        chosen
    }

    pub fn report_failure(&self, proxy: &ProxyInfo) {
        let count = self.lock().ledger.record_failure(&proxy.key(), Instant::now());
        warn!(proxy = %proxy.key(), failures = count, "proxy failure recorded");
    }

    pub fn report_success(&self, proxy: &ProxyInfo) {
        self.lock().ledger.record_success(&proxy.key());
    }

    /// Unexpired failure count for a proxy.
    pub fn failures(&self, proxy: &ProxyInfo) -> u32 {
        let mut state = self.lock();
        state.ledger.prune(Instant::now());
        state.ledger.failures(&proxy.key())
    }

    /// Reset the rotation index and forget every failure.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.index = 0;
        state.ledger.clear();
    }
}

/// Delay before retry `attempt` (1-based): `min(2000ms, 250ms × 2^(attempt−1))`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    let delay = BASE_BACKOFF_MS.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay).min(MAX_BACKOFF)
}

/// Run `operation` with a fresh proxy per attempt.
///
/// A failed attempt marks its proxy failed and waits [`backoff_delay`] before
/// the next one. Errors that are not retryable end the loop immediately. A
/// success marks the proxy healthy.
pub async fn with_retry<F, Fut, T>(
    rotator: &ProxyRotator,
    max_attempts: u32,
    mut operation: F,
) -> Result<T, DiggerError>
where
    F: FnMut(Option<ProxyInfo>) -> Fut,
    Fut: Future<Output = Result<T, DiggerError>>,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;

    loop {
        let proxy = rotator.next_proxy();
        match operation(proxy.clone()).await {
            Ok(value) => {
                if let Some(proxy) = &proxy {
                    rotator.report_success(proxy);
                }
                return Ok(value);
            }
            Err(e) => {
                if let Some(proxy) = &proxy {
                    rotator.report_failure(proxy);
                }

                if attempt >= max_attempts || !e.is_retryable() {
                    warn!(attempt, error = %e, "lookup failed, giving up");
                    return Err(e);
                }

                let delay = backoff_delay(attempt);
                debug!(attempt, ?delay, error = %e, "lookup failed, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
