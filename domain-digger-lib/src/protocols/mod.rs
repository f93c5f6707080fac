//! Wire protocols used by the lookup transport.

/// NS lookups for DNS mode
pub mod dns;

/// RDAP over HTTP(S)
pub mod rdap;

/// SOCKS5 tunnelling for WHOIS
pub mod socks;

/// WHOIS over TCP/43 with referral following
pub mod whois;

pub use dns::{DnsClient, DnsOutcome};
pub use rdap::{RdapClient, RdapOptions, RdapReply};
pub use whois::{WhoisClient, WhoisOptions};
