//! Minimal SOCKS5 client (RFC 1928, RFC 1929).
//!
//! Only the CONNECT command is implemented. The target host is always sent as
//! a domain name so resolution happens on the proxy side.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::error::DiggerError;
use crate::proxy::ProxyInfo;

const VERSION: u8 = 0x05;
const AUTH_VERSION: u8 = 0x01;
const METHOD_NONE: u8 = 0x00;
const METHOD_USER_PASS: u8 = 0x02;
const METHOD_REJECTED: u8 = 0xff;
const CMD_CONNECT: u8 = 0x01;
const ATYP_IPV4: u8 = 0x01;
const ATYP_DOMAIN: u8 = 0x03;
const ATYP_IPV6: u8 = 0x04;

/// Open a tunnel to `host:port` through `proxy`.
pub async fn connect(proxy: &ProxyInfo, host: &str, port: u16) -> Result<TcpStream, DiggerError> {
    let mut stream = TcpStream::connect(proxy.socket_addr()).await.map_err(|e| {
        DiggerError::network_with_source(format!("Failed to reach proxy {}", proxy.key()), e.to_string())
    })?;

    let credentials = match (&proxy.username, &proxy.password) {
        (Some(user), Some(pass)) => Some((user.as_str(), pass.as_str())),
        (Some(user), None) => Some((user.as_str(), "")),
        _ => None,
    };

    handshake(&mut stream, host, port, credentials).await?;
    debug!(proxy = %proxy.key(), host, port, "socks tunnel established");
    Ok(stream)
}

/// Run the greeting, optional authentication and CONNECT exchange.
pub async fn handshake<S>(
    stream: &mut S,
    host: &str,
    port: u16,
    credentials: Option<(&str, &str)>,
) -> Result<(), DiggerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if host.len() > 255 {
        return Err(DiggerError::invalid_domain(host, "Host name too long for SOCKS5"));
    }

    let greeting: &[u8] = if credentials.is_some() {
        &[VERSION, 2, METHOD_NONE, METHOD_USER_PASS]
    } else {
        &[VERSION, 1, METHOD_NONE]
    };
    stream.write_all(greeting).await?;

    let mut choice = [0u8; 2];
    stream.read_exact(&mut choice).await?;
    if choice[0] != VERSION {
        return Err(DiggerError::network(format!(
            "Proxy answered with SOCKS version {}",
            choice[0]
        )));
    }

    match (choice[1], credentials) {
        (METHOD_NONE, _) => {}
        (METHOD_USER_PASS, Some((user, pass))) => authenticate(stream, user, pass).await?,
        (METHOD_REJECTED, _) | (METHOD_USER_PASS, None) => {
            return Err(DiggerError::network("Proxy rejected all authentication methods"));
        }
        (other, _) => {
            return Err(DiggerError::network(format!(
                "Proxy selected unsupported method {:#04x}",
                other
            )));
        }
    }

    let mut request = Vec::with_capacity(7 + host.len());
    request.extend_from_slice(&[VERSION, CMD_CONNECT, 0x00, ATYP_DOMAIN, host.len() as u8]);
    request.extend_from_slice(host.as_bytes());
    request.extend_from_slice(&port.to_be_bytes());
    stream.write_all(&request).await?;

    let mut head = [0u8; 4];
    stream.read_exact(&mut head).await?;
    if head[1] != 0x00 {
        return Err(DiggerError::network(format!(
            "Proxy CONNECT failed: {}",
            reply_message(head[1])
        )));
    }

    // Bound address is unused but must be drained
    let addr_len = match head[3] {
        ATYP_IPV4 => 4,
        ATYP_IPV6 => 16,
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream.read_exact(&mut len).await?;
            len[0] as usize
        }
        other => {
            return Err(DiggerError::network(format!(
                "Proxy replied with unknown address type {}",
                other
            )));
        }
    };
    let mut bound = vec![0u8; addr_len + 2];
    stream.read_exact(&mut bound).await?;

    Ok(())
}

async fn authenticate<S>(stream: &mut S, user: &str, pass: &str) -> Result<(), DiggerError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    if user.len() > 255 || pass.len() > 255 {
        return Err(DiggerError::config("Proxy credentials longer than 255 bytes"));
    }

    let mut request = Vec::with_capacity(3 + user.len() + pass.len());
    request.push(AUTH_VERSION);
    request.push(user.len() as u8);
    request.extend_from_slice(user.as_bytes());
    request.push(pass.len() as u8);
    request.extend_from_slice(pass.as_bytes());
    stream.write_all(&request).await?;

    let mut status = [0u8; 2];
    stream.read_exact(&mut status).await?;
    if status[1] != 0x00 {
        return Err(DiggerError::network("Proxy authentication failed"));
    }
    Ok(())
}

fn reply_message(code: u8) -> &'static str {
    match code {
        0x01 => "general failure",
        0x02 => "connection not allowed by ruleset",
        0x03 => "network unreachable",
        0x04 => "host unreachable",
        0x05 => "connection refused",
        0x06 => "TTL expired",
        0x07 => "command not supported",
        0x08 => "address type not supported",
        _ => "unknown error",
    }
}
