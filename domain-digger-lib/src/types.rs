//! Core data types for bulk lookups.
//!
//! Tasks produced by the planner, verdicts produced by the classifier and the
//! rows collected into the results table all live here.

use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::DiggerError;

/// Which service a run queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LookupKind {
    /// Port-43 WHOIS with referral following
    #[default]
    Whois,
    /// NS record lookup; NXDOMAIN means available
    Dns,
    /// RDAP over HTTPS
    Rdap,
}

impl LookupKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Whois => "whois",
            Self::Dns => "dns",
            Self::Rdap => "rdap",
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LookupKind {
    type Err = DiggerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "whois" => Ok(Self::Whois),
            "dns" => Ok(Self::Dns),
            "rdap" => Ok(Self::Rdap),
            other => Err(DiggerError::config(format!(
                "Unknown lookup type '{}'. Use whois, dns or rdap",
                other
            ))),
        }
    }
}

/// One scheduled lookup: a single (domain, TLD) pair with its pacing.
///
/// Created once when the schedule is built and read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTask {
    /// Fully qualified name, e.g. `example.com`
    pub domain: String,
    /// Position in the compiled queue (0-based)
    pub index: usize,
    /// Delay from the schedule anchor until dispatch, cumulative over prior tasks
    pub dispatch_offset_ms: u64,
    /// Maximum number of WHOIS referrals to follow
    pub follow_depth: u32,
    /// Per-request timeout
    pub timeout_ms: u64,
}

/// Why a reply could not be turned into a verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    NoContent,
    Unauthorized,
    RateLimiting,
    Unretrievable,
    Forbidden,
    ReservedByRegulator,
    Unregistrable,
    ReplyError,
    Unparsable,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoContent => "nocontent",
            Self::Unauthorized => "unauthorized",
            Self::RateLimiting => "ratelimiting",
            Self::Unretrievable => "unretrievable",
            Self::Forbidden => "forbidden",
            Self::ReservedByRegulator => "reservedbyregulator",
            Self::Unregistrable => "unregistrable",
            Self::ReplyError => "replyerror",
            Self::Unparsable => "unparsable",
        }
    }
}

/// Tri-state verdict for a single reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Classification {
    Available,
    Unavailable,
    Error(ErrorKind),
}

impl Classification {
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available)
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Bucket used by the aggregate counters; every error subtype shares one.
    pub fn category(&self) -> StatusCategory {
        match self {
            Self::Available => StatusCategory::Available,
            Self::Unavailable => StatusCategory::Unavailable,
            Self::Error(_) => StatusCategory::Error,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Available => f.write_str("available"),
            Self::Unavailable => f.write_str("unavailable"),
            Self::Error(kind) => write!(f, "error:{}", kind.as_str()),
        }
    }
}

impl Serialize for Classification {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Counter bucket for a classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusCategory {
    Available,
    Unavailable,
    Error,
}

impl StatusCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Available => "available",
            Self::Unavailable => "unavailable",
            Self::Error => "error",
        }
    }
}

/// One completed lookup in the results table.
#[derive(Debug, Clone, Serialize)]
pub struct ResultRow {
    /// 1-based position in the queue
    pub id: usize,
    pub domain: String,
    pub status: Classification,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub creation_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_date: Option<String>,
    /// Raw reply text (or the transport error text)
    pub reply: String,
    /// Key/value fields parsed out of the reply
    pub fields: BTreeMap<String, String>,
    /// Round-trip time in milliseconds
    pub request_time_ms: f64,
}

/// Results indexed by queue position.
///
/// Rows arrive out of order; unfinished slots stay empty.
#[derive(Debug, Clone, Default)]
pub struct ResultsTable {
    slots: Vec<Option<ResultRow>>,
}

impl ResultsTable {
    /// Create a table with room for `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
        }
    }

    /// Store a row at its queue index, growing the table if needed.
    pub fn insert(&mut self, index: usize, row: ResultRow) {
        if index >= self.slots.len() {
            self.slots.resize(index + 1, None);
        }
        self.slots[index] = Some(row);
    }

    pub fn get(&self, index: usize) -> Option<&ResultRow> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    /// Completed rows in queue order.
    pub fn rows(&self) -> impl Iterator<Item = &ResultRow> {
        self.slots.iter().flatten()
    }

    /// Number of completed rows.
    pub fn completed(&self) -> usize {
        self.rows().count()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.completed() == 0
    }
}

impl Serialize for ResultsTable {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.rows())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: usize, domain: &str, status: Classification) -> ResultRow {
        ResultRow {
            id,
            domain: domain.to_string(),
            status,
            registrar: None,
            company: None,
            creation_date: None,
            update_date: None,
            expiry_date: None,
            reply: String::new(),
            fields: BTreeMap::new(),
            request_time_ms: 1.5,
        }
    }

    #[test]
    fn test_classification_display() {
        assert_eq!(Classification::Available.to_string(), "available");
        assert_eq!(
            Classification::Error(ErrorKind::ReservedByRegulator).to_string(),
            "error:reservedbyregulator"
        );
        assert_eq!(
            Classification::Error(ErrorKind::RateLimiting).category(),
            StatusCategory::Error
        );
    }

    #[test]
    fn test_lookup_kind_parse() {
        assert_eq!("DNS".parse::<LookupKind>().unwrap(), LookupKind::Dns);
        assert_eq!(" rdap ".parse::<LookupKind>().unwrap(), LookupKind::Rdap);
        assert!("ftp".parse::<LookupKind>().is_err());
    }

    #[test]
    fn test_results_table_out_of_order() {
        let mut table = ResultsTable::with_capacity(3);
        table.insert(2, row(3, "c.com", Classification::Unavailable));
        table.insert(0, row(1, "a.com", Classification::Available));

        assert_eq!(table.completed(), 2);
        assert!(table.get(1).is_none());
        let domains: Vec<_> = table.rows().map(|r| r.domain.as_str()).collect();
        assert_eq!(domains, vec!["a.com", "c.com"]);

        let json = serde_json::to_value(&table).unwrap();
        assert_eq!(json.as_array().unwrap().len(), 2);
        assert_eq!(json[0]["status"], "available");
    }
}
