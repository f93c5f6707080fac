//! Error handling for bulk lookup operations.
//!
//! Transport failures, bad configuration and illegal run transitions all
//! surface as [`DiggerError`]. Classification outcomes are *not* errors; an
//! unreadable reply becomes a [`crate::Classification::Error`] value instead.

use std::fmt;
use std::time::Duration;

/// Main error type for the engine.
#[derive(Debug, Clone)]
pub enum DiggerError {
    /// Invalid domain name format
    InvalidDomain {
        domain: String,
        reason: String,
    },

    /// A proxy entry that could not be parsed
    InvalidProxy {
        entry: String,
        reason: String,
    },

    /// Network-related errors (connection refused, reset, etc.)
    NetworkError {
        message: String,
        source: Option<String>,
    },

    /// WHOIS protocol specific errors
    WhoisError {
        domain: String,
        message: String,
    },

    /// RDAP protocol specific errors
    RdapError {
        domain: String,
        message: String,
        status_code: Option<u16>,
    },

    /// Resolver failures other than NXDOMAIN
    DnsError {
        domain: String,
        message: String,
    },

    /// Parsing errors for replies, models and proxy strings
    ParseError {
        message: String,
        content: Option<String>,
    },

    /// Configuration errors (invalid settings, etc.)
    ConfigError {
        message: String,
    },

    /// File I/O errors when reading word lists, configs or models
    FileError {
        path: String,
        message: String,
    },

    /// Timeout errors when operations take too long
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// The statistical model could not be loaded or is malformed
    ModelError {
        message: String,
    },

    /// A run control call made from a state that does not allow it
    InvalidState {
        operation: String,
        state: String,
    },

    /// Generic internal errors that don't fit other categories
    Internal {
        message: String,
    },
}

impl DiggerError {
    /// Create a new invalid domain error.
    pub fn invalid_domain<D: Into<String>, R: Into<String>>(domain: D, reason: R) -> Self {
        Self::InvalidDomain {
            domain: domain.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid proxy error.
    pub fn invalid_proxy<E: Into<String>, R: Into<String>>(entry: E, reason: R) -> Self {
        Self::InvalidProxy {
            entry: entry.into(),
            reason: reason.into(),
        }
    }

    /// Create a new network error.
    pub fn network<M: Into<String>>(message: M) -> Self {
        Self::NetworkError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new network error with source information.
    pub fn network_with_source<M: Into<String>, S: Into<String>>(message: M, source: S) -> Self {
        Self::NetworkError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new WHOIS error.
    pub fn whois<D: Into<String>, M: Into<String>>(domain: D, message: M) -> Self {
        Self::WhoisError {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Create a new RDAP error.
    pub fn rdap<D: Into<String>, M: Into<String>>(domain: D, message: M) -> Self {
        Self::RdapError {
            domain: domain.into(),
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a new RDAP error with HTTP status code.
    pub fn rdap_with_status<D: Into<String>, M: Into<String>>(
        domain: D,
        message: M,
        status_code: u16,
    ) -> Self {
        Self::RdapError {
            domain: domain.into(),
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Create a new DNS error.
    pub fn dns<D: Into<String>, M: Into<String>>(domain: D, message: M) -> Self {
        Self::DnsError {
            domain: domain.into(),
            message: message.into(),
        }
    }

    /// Create a new parse error.
    pub fn parse<M: Into<String>>(message: M) -> Self {
        Self::ParseError {
            message: message.into(),
            content: None,
        }
    }

    /// Create a new configuration error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new timeout error.
    pub fn timeout<O: Into<String>>(operation: O, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a new model error.
    pub fn model<M: Into<String>>(message: M) -> Self {
        Self::ModelError {
            message: message.into(),
        }
    }

    /// Create a new invalid state error.
    pub fn invalid_state<O: Into<String>, S: Into<String>>(operation: O, state: S) -> Self {
        Self::InvalidState {
            operation: operation.into(),
            state: state.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if this error suggests the lookup should be retried
    /// (possibly through a different proxy).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. }
                | Self::Timeout { .. }
                | Self::WhoisError { .. }
                | Self::RdapError {
                    status_code: None | Some(429) | Some(500..=599),
                    ..
                }
        )
    }

    /// Text stored in the results row when a task ends in this error.
    ///
    /// WHOIS failures keep the `lookup: timeout` marker so the reply parser
    /// recognises them later.
    pub fn reply_text(&self) -> String {
        match self {
            Self::Timeout { .. } => "Whois lookup error, lookup: timeout".to_string(),
            other => format!("Whois lookup error, {}", other),
        }
    }
}

impl fmt::Display for DiggerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDomain { domain, reason } => {
                write!(f, "Invalid domain '{}': {}", domain, reason)
            }
            Self::InvalidProxy { entry, reason } => {
                write!(f, "Invalid proxy '{}': {}", entry, reason)
            }
            Self::NetworkError { message, source } => {
                if let Some(source) = source {
                    write!(f, "Network error: {} (source: {})", message, source)
                } else {
                    write!(f, "Network error: {}", message)
                }
            }
            Self::WhoisError { domain, message } => {
                write!(f, "WHOIS error for '{}': {}", domain, message)
            }
            Self::RdapError {
                domain,
                message,
                status_code,
            } => {
                if let Some(code) = status_code {
                    write!(f, "RDAP error for '{}' (HTTP {}): {}", domain, code, message)
                } else {
                    write!(f, "RDAP error for '{}': {}", domain, message)
                }
            }
            Self::DnsError { domain, message } => {
                write!(f, "DNS error for '{}': {}", domain, message)
            }
            Self::ParseError { message, .. } => write!(f, "Parse error: {}", message),
            Self::ConfigError { message } => write!(f, "Configuration error: {}", message),
            Self::FileError { path, message } => {
                write!(f, "File error at '{}': {}", path, message)
            }
            Self::Timeout {
                operation,
                duration,
            } => write!(f, "Timeout after {:?} during: {}", duration, operation),
            Self::ModelError { message } => write!(f, "Model error: {}", message),
            Self::InvalidState { operation, state } => {
                write!(f, "Cannot {} while run is {}", operation, state)
            }
            Self::Internal { message } => write!(f, "Internal error: {}", message),
        }
    }
}

impl std::error::Error for DiggerError {}

impl From<reqwest::Error> for DiggerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::timeout("HTTP request", Duration::from_secs(30))
        } else if err.is_connect() {
            Self::network_with_source("Connection failed", err.to_string())
        } else {
            Self::network_with_source("HTTP request failed", err.to_string())
        }
    }
}

impl From<serde_json::Error> for DiggerError {
    fn from(err: serde_json::Error) -> Self {
        Self::ParseError {
            message: format!("JSON parsing failed: {}", err),
            content: None,
        }
    }
}

impl From<toml::de::Error> for DiggerError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", err),
        }
    }
}

impl From<std::io::Error> for DiggerError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::timeout("socket I/O", Duration::ZERO),
            _ => Self::network_with_source("I/O error", err.to_string()),
        }
    }
}

impl From<hickory_resolver::error::ResolveError> for DiggerError {
    fn from(err: hickory_resolver::error::ResolveError) -> Self {
        Self::DnsError {
            domain: String::new(),
            message: err.to_string(),
        }
    }
}

impl From<regex::Error> for DiggerError {
    fn from(err: regex::Error) -> Self {
        Self::Internal {
            message: format!("Regex error: {}", err),
        }
    }
}
