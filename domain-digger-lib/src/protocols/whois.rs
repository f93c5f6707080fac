//! WHOIS over TCP port 43.
//!
//! The client asks IANA for a TLD's authoritative server when none is
//! configured, then follows `Whois Server:` style referrals up to the
//! requested depth. Every hop is bounded by the per-call timeout and may be
//! tunnelled through a SOCKS5 proxy.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use super::socks;
use crate::error::DiggerError;
use crate::proxy::ProxyInfo;

pub const WHOIS_PORT: u16 = 43;
pub const IANA_SERVER: &str = "whois.iana.org";

const MAX_RESPONSE_SIZE: usize = 1024 * 1024;

lazy_static! {
    static ref REFERRAL_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"(?im)^\s*Registrar WHOIS Server:[ \t]*(\S+)").unwrap(),
        Regex::new(r"(?im)^\s*Whois Server:[ \t]*(\S+)").unwrap(),
        Regex::new(r"(?im)^\s*ReferralServer:[ \t]*(?:r?whois://)?(\S+)").unwrap(),
    ];
}

/// Per-call WHOIS options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WhoisOptions {
    /// Maximum referrals to follow after the first server.
    pub follow: u32,
    /// Budget for each hop.
    pub timeout: Duration,
    pub proxy: Option<ProxyInfo>,
}

impl Default for WhoisOptions {
    fn default() -> Self {
        Self {
            follow: 3,
            timeout: Duration::from_millis(2500),
            proxy: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WhoisClient {
    port: u16,
    server: Option<String>,
    discovered: Arc<RwLock<HashMap<String, String>>>,
}

impl WhoisClient {
    pub fn new() -> Self {
        Self {
            port: WHOIS_PORT,
            server: None,
            discovered: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Always start at `server` instead of asking IANA.
    pub fn with_server<S: Into<String>>(mut self, server: S) -> Self {
        let server = server.into();
        self.server = (!server.trim().is_empty()).then(|| server.trim().to_string());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Look up `domain` and return the last reply text.
    ///
    /// A referral hop that fails does not discard the reply already in hand;
    /// the previous hop's text is returned instead.
    ///
    /// # Errors
    ///
    /// `Timeout` when the first hop exceeds `opts.timeout`, `NetworkError` or
    /// `WhoisError` when it cannot be completed.
    pub async fn lookup(&self, domain: &str, opts: &WhoisOptions) -> Result<String, DiggerError> {
        let domain = domain.trim().to_lowercase();
        if domain.is_empty() {
            return Err(DiggerError::invalid_domain(domain, "Domain name is empty"));
        }

        let mut server = self.initial_server(&domain, opts).await?;
        let mut visited = HashSet::new();
        visited.insert(server.to_lowercase());

        debug!(domain = %domain, server = %server, "querying whois server");
        let mut reply = self.query(&server, &domain, opts).await?;

        for hop in 1..=opts.follow {
            let Some(referral) = extract_referral(&reply) else {
                break;
            };
            if !visited.insert(referral.to_lowercase()) {
                debug!(referral = %referral, "referral already visited");
                break;
            }

            debug!(domain = %domain, from = %server, to = %referral, hop, "following referral");
            match self.query(&referral, &domain, opts).await {
                Ok(next) => {
                    reply = next;
                    server = referral;
                }
                Err(e) => {
                    warn!(domain = %domain, server = %referral, error = %e, "referral hop failed");
                    break;
                }
            }
        }

        Ok(reply)
    }

    async fn initial_server(&self, domain: &str, opts: &WhoisOptions) -> Result<String, DiggerError> {
        if let Some(server) = &self.server {
            return Ok(server.clone());
        }

        let tld = domain
            .rsplit('.')
            .next()
            .filter(|tld| !tld.is_empty() && *tld != domain)
            .ok_or_else(|| DiggerError::invalid_domain(domain, "Domain has no TLD"))?;

        if let Some(server) = self.discovered.read().await.get(tld) {
            return Ok(server.clone());
        }

        let iana = self.query(IANA_SERVER, tld, opts).await?;
        let server = parse_iana_refer_response(&iana).ok_or_else(|| {
            DiggerError::whois(domain, format!("No WHOIS server known for .{}", tld))
        })?;

        debug!(tld, server = %server, "discovered whois server");
        self.discovered
            .write()
            .await
            .insert(tld.to_string(), server.clone());
        Ok(server)
    }

    async fn query(&self, server: &str, query: &str, opts: &WhoisOptions) -> Result<String, DiggerError> {
        let hop = async {
            match &opts.proxy {
                Some(proxy) => {
                    let mut stream = socks::connect(proxy, server, self.port).await?;
                    exchange(&mut stream, query).await
                }
                None => {
                    let mut stream = TcpStream::connect((server, self.port)).await.map_err(|e| {
                        DiggerError::network_with_source(
                            format!("Failed to connect to {}", server),
                            e.to_string(),
                        )
                    })?;
                    exchange(&mut stream, query).await
                }
            }
        };

        tokio::time::timeout(opts.timeout, hop)
            .await
            .map_err(|_| DiggerError::timeout(format!("whois {}", server), opts.timeout))?
    }
}

impl Default for WhoisClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Send one query line and read until the server closes.
async fn exchange<S>(stream: &mut S, query: &str) -> Result<String, DiggerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(format!("{}\r\n", query).as_bytes()).await?;

    let mut response = Vec::new();
    let mut buf = [0u8; 4096];
    loop {
        let n = stream.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        response.extend_from_slice(&buf[..n]);
        if response.len() > MAX_RESPONSE_SIZE {
            return Err(DiggerError::whois(query, "Response too large"));
        }
    }

    // Registries still answer in Latin-1
    Ok(String::from_utf8(response)
        .unwrap_or_else(|e| e.into_bytes().iter().map(|&b| b as char).collect()))
}

/// Find the next server to ask, if the reply names one.
pub fn extract_referral(reply: &str) -> Option<String> {
    REFERRAL_PATTERNS.iter().find_map(|re| {
        re.captures(reply)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().trim_end_matches('/').to_lowercase())
            .and_then(|server| {
                let server = server
                    .split(':')
                    .next()
                    .unwrap_or_default()
                    .to_string();
                (!server.is_empty() && server.contains('.')).then_some(server)
            })
    })
}

/// Parse an IANA reply for the TLD's server, preferring `refer:` over `whois:`.
///
/// ```text
/// refer:        whois.verisign-grs.com
/// whois:        whois.verisign-grs.com
/// ```
pub fn parse_iana_refer_response(response: &str) -> Option<String> {
    let mut whois_server = None;

    for line in response.lines().map(str::trim) {
        if let Some(server) = line.strip_prefix("refer:").map(str::trim) {
            if !server.is_empty() {
                return Some(server.to_string());
            }
        } else if let Some(server) = line.strip_prefix("whois:").map(str::trim) {
            if !server.is_empty() {
                whois_server = Some(server.to_string());
            }
        }
    }

    whois_server
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_iana_refer_response() {
        let response = "% IANA WHOIS server\n\nrefer:        whois.verisign-grs.com\n\ndomain:       COM\n";
        assert_eq!(
            parse_iana_refer_response(response),
            Some("whois.verisign-grs.com".to_string())
        );

        let no_refer = "% IANA WHOIS server\ndomain: TEST\nstatus: ACTIVE\n";
        assert_eq!(parse_iana_refer_response(no_refer), None);

        assert_eq!(parse_iana_refer_response("refer:        \ndomain: COM\n"), None);

        let whois_field = "whois:        whois.nic.io\n\ndomain:       IO\n";
        assert_eq!(
            parse_iana_refer_response(whois_field),
            Some("whois.nic.io".to_string())
        );

        let both = "whois:        whois.old.example\nrefer:        whois.new.example\n";
        assert_eq!(
            parse_iana_refer_response(both),
            Some("whois.new.example".to_string())
        );
    }

    #[test]
    fn test_extract_referral() {
        assert_eq!(
            extract_referral("Domain Name: A.COM\n   Registrar WHOIS Server: whois.registrar.example\n"),
            Some("whois.registrar.example".to_string())
        );
        assert_eq!(
            extract_referral("ReferralServer: rwhois://rwhois.example.net:4321/\n"),
            Some("rwhois.example.net".to_string())
        );
        assert_eq!(extract_referral("Whois Server: \nDomain: a.com\n"), None);
        assert_eq!(extract_referral("No match for A.COM"), None);
    }

    #[test]
    fn test_builder() {
        let client = WhoisClient::new().with_server("  ").with_port(4343);
        assert_eq!(client.server, None);
        assert_eq!(client.port, 4343);

        let client = WhoisClient::new().with_server("whois.nic.example");
        assert_eq!(client.server.as_deref(), Some("whois.nic.example"));
    }

    /// Serves canned replies in order, one per connection.
    async fn serve(replies: Vec<&'static str>) -> (u16, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let reply = replies.get(n).copied().unwrap_or("");
                let mut line = vec![0u8; 256];
                let _ = socket.read(&mut line).await;
                let _ = socket.write_all(reply.as_bytes()).await;
            }
        });

        (port, hits)
    }

    #[tokio::test]
    async fn test_follows_referrals_up_to_depth() {
        let (port, hits) = serve(vec![
            "Domain Name: A.TEST\nWhois Server: 127.0.0.1\n",
            "Domain Name: A.TEST\nRegistrar: Example\nWhois Server: 127.0.0.1\n",
        ])
        .await;

        let client = WhoisClient::new().with_server("localhost").with_port(port);
        let opts = WhoisOptions {
            follow: 3,
            timeout: Duration::from_secs(5),
            proxy: None,
        };
        let reply = client.lookup("a.test", &opts).await.unwrap();
        assert!(reply.contains("Registrar: Example"));
        // The second referral points back at a visited server
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_zero_follow_stays_on_first_server() {
        let (port, hits) = serve(vec!["Whois Server: 127.0.0.1\nfirst\n", "second\n"]).await;

        let client = WhoisClient::new().with_server("localhost").with_port(port);
        let opts = WhoisOptions {
            follow: 0,
            timeout: Duration::from_secs(5),
            proxy: None,
        };
        let reply = client.lookup("a.test", &opts).await.unwrap();
        assert!(reply.contains("first"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_discovers_server_from_iana_reply() {
        let client = WhoisClient::new();
        client
            .discovered
            .write()
            .await
            .insert("test".to_string(), "127.0.0.1".to_string());
        let opts = WhoisOptions::default();
        assert_eq!(client.initial_server("a.test", &opts).await.unwrap(), "127.0.0.1");
        assert!(client.initial_server("nodot", &opts).await.is_err());
    }

    #[tokio::test]
    async fn test_latin1_fallback() {
        let (mut client, mut server) = tokio::io::duplex(64);
        tokio::spawn(async move {
            let mut line = [0u8; 16];
            let _ = server.read(&mut line).await;
            server.write_all(b"Registrant: M\xfcller\n").await.unwrap();
        });
        let reply = exchange(&mut client, "a.de").await.unwrap();
        assert_eq!(reply, "Registrant: Müller\n");
    }
}
