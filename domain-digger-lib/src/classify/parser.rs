//! WHOIS reply parsing.
//!
//! Turns free-form `Key: value` text into a camelCase field map and pulls the
//! registration fields (registrar, company, dates) out of it.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::collections::BTreeMap;

lazy_static! {
    static ref TAB_COLON: Regex = Regex::new(r":\t{1,2}").unwrap();
    static ref HTML_ENTITY: Regex = Regex::new(r"&(#[0-9]+|#[xX][0-9a-fA-F]+|[a-zA-Z]+);").unwrap();
}

/// Marker the transport leaves in a reply when the request timed out.
pub const TIMEOUT_MARKER: &str = "lookup: timeout";

/// Parsed `Key: value` fields of a reply.
pub type ReplyFields = BTreeMap<String, String>;

pub fn is_timeout_reply(text: &str) -> bool {
    text.contains(TIMEOUT_MARKER)
}

/// Parse a raw WHOIS reply into camelCase keys.
///
/// Lines without `": "` are ignored. A line ending in `:` followed by a line
/// without any colon is read as one field. Repeated keys are joined with a
/// space.
pub fn parse_reply(raw: &str) -> ReplyFields {
    let text = decode_html_entities(raw);
    let text = TAB_COLON.replace_all(&text, ": ");
    let text = text.replace("\r\n", "\n").replace('\r', "\n");
    let text = join_dangling_colons(&text);

    let mut fields = ReplyFields::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || !line.contains(": ") {
            continue;
        }

        let Some((raw_key, value)) = line.split_once(':') else {
            continue;
        };
        let key = camel_case(raw_key);
        if key.is_empty() {
            continue;
        }

        let value = value.trim();
        fields
            .entry(key)
            .and_modify(|existing| {
                existing.push(' ');
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }

    fields
}

fn join_dangling_colons(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim_end();
        match lines.get(i + 1) {
            Some(next) if trimmed.ends_with(':') && !next.contains(':') => {
                out.push(format!("{} {}", trimmed, next));
                i += 2;
            }
            _ => {
                out.push(line.to_string());
                i += 1;
            }
        }
    }

    out.join("\n")
}

fn decode_html_entities(text: &str) -> String {
    HTML_ENTITY
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let entity = &caps[1];
            let decoded = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok().and_then(char::from_u32)
            } else if let Some(dec) = entity.strip_prefix('#') {
                dec.parse::<u32>().ok().and_then(char::from_u32)
            } else {
                match entity {
                    "amp" => Some('&'),
                    "lt" => Some('<'),
                    "gt" => Some('>'),
                    "quot" => Some('"'),
                    "apos" => Some('\''),
                    "nbsp" => Some('\u{a0}'),
                    _ => None,
                }
            };
            decoded.map_or_else(|| caps[0].to_string(), |c| c.to_string())
        })
        .into_owned()
}

/// camelCase a key: split on non-alphanumerics and case boundaries, lowercase
/// the first word, capitalise the rest.
pub fn camel_case(input: &str) -> String {
    let mut words: Vec<String> = Vec::new();

    for chunk in input.split(|c: char| !c.is_alphanumeric()) {
        let chars: Vec<char> = chunk.chars().collect();
        let mut current = String::new();
        for (i, &c) in chars.iter().enumerate() {
            if i > 0 && !current.is_empty() {
                let prev = chars[i - 1];
                let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_lowercase());
                let boundary = (c.is_uppercase() && (prev.is_lowercase() || prev.is_numeric()))
                    || (c.is_uppercase() && prev.is_uppercase() && next_is_lower);
                if boundary {
                    words.push(std::mem::take(&mut current));
                }
            }
            current.push(c);
        }
        if !current.is_empty() {
            words.push(current);
        }
    }

    let mut out = String::new();
    for (i, word) in words.iter().enumerate() {
        let lower = word.to_lowercase();
        if i == 0 {
            out.push_str(&lower);
        } else {
            let mut chars = lower.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
        }
    }
    out
}

/// Registration details extracted from a parsed reply.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainParameters {
    pub registrar: Option<String>,
    pub company: Option<String>,
    pub creation_date: Option<DateTime<Utc>>,
    pub update_date: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
}

const COMPANY_KEYS: &[&str] = &[
    "registrantOrganization",
    "registrant",
    "adminName",
    "ownerName",
    "contact",
    "name",
];

const CREATION_KEYS: &[&str] = &[
    "creationDate",
    "createdDate",
    "created",
    "registered",
    "registeredOn",
];

const UPDATE_KEYS: &[&str] = &[
    "updatedDate",
    "lastUpdated",
    "changed",
    "lastModified",
    "lastUpdate",
];

const EXPIRY_KEYS: &[&str] = &[
    "expires",
    "registryExpiryDate",
    "expiryDate",
    "registrarRegistrationExpirationDate",
    "expire",
    "expirationDate",
    "expiresOn",
    "paidTill",
];

fn first_value<'a>(fields: &'a ReplyFields, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .map(String::as_str)
        .find(|value| !value.is_empty())
}

impl DomainParameters {
    pub fn from_fields(fields: &ReplyFields) -> Self {
        Self {
            registrar: first_value(fields, &["registrar"]).map(str::to_string),
            company: first_value(fields, COMPANY_KEYS).map(str::to_string),
            creation_date: first_value(fields, CREATION_KEYS).and_then(parse_date),
            update_date: first_value(fields, UPDATE_KEYS).and_then(parse_date),
            expiry_date: first_value(fields, EXPIRY_KEYS).and_then(parse_date),
        }
    }
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y.%m.%d %H:%M:%S",
    "%d-%b-%Y %H:%M:%S",
    "%d.%m.%Y %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y.%m.%d", "%Y/%m/%d", "%d-%b-%Y", "%d.%m.%Y", "%d/%m/%Y", "%Y%m%d",
];

/// Parse the date formats registries commonly use. Anything without an
/// explicit offset is taken as UTC.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    // Some registries append a zone name or a note after the date
    let value = value.trim();
    let candidates = [value, value.split(" (").next().unwrap_or(value).trim()];

    for candidate in candidates {
        if let Ok(dt) = DateTime::parse_from_rfc3339(candidate) {
            return Some(dt.with_timezone(&Utc));
        }
        if let Ok(dt) = DateTime::parse_from_rfc2822(candidate) {
            return Some(dt.with_timezone(&Utc));
        }
        let bare = candidate
            .trim_end_matches(" UTC")
            .trim_end_matches(" GMT")
            .trim_end_matches('Z');
        for format in DATETIME_FORMATS {
            if let Ok(naive) = NaiveDateTime::parse_from_str(bare, format) {
                return Some(Utc.from_utc_datetime(&naive));
            }
        }
        for format in DATE_FORMATS {
            if let Ok(date) = NaiveDate::parse_from_str(bare, format) {
                return date.and_hms_opt(0, 0, 0).map(|naive| Utc.from_utc_datetime(&naive));
            }
        }
    }

    None
}

/// Render a date the way results rows show it.
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}
