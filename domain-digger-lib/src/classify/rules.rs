//! Declarative availability rules.
//!
//! A rule is a [`Condition`] plus the verdict it yields. Rules live in four
//! ordered groups (special, available, unavailable, error) and the first rule
//! whose condition holds decides the reply.

use serde::{Deserialize, Serialize};

use super::ClassificationContext;
use crate::config::Assumptions;
use crate::types::{Classification, ErrorKind};

/// Registration dates a [`Condition::MinusLessThan`] can compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateField {
    Creation,
    Update,
    Expiry,
    /// The moment the reply is classified
    Control,
}

/// One predicate over a [`ClassificationContext`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Condition {
    /// Reply text contains the value
    Includes { value: String },
    /// Reply text does not contain the value
    Excludes { value: String },
    /// Reply text length is below `length` characters
    LessThan { length: usize },
    /// `left - right` is below `threshold_secs`; false when either date is missing
    MinusLessThan {
        left: DateField,
        right: DateField,
        threshold_secs: i64,
    },
    /// The parsed fields contain the key
    HasKey { key: String },
    /// More than `count` parsed fields
    KeyCountGreaterThan { count: usize },
    /// Reply text equals the value exactly
    Equal { value: String },
    /// Every inner condition holds
    And { conditions: Vec<Condition> },
}

impl Condition {
    pub fn includes(value: &str) -> Self {
        Self::Includes {
            value: value.to_string(),
        }
    }

    pub fn excludes(value: &str) -> Self {
        Self::Excludes {
            value: value.to_string(),
        }
    }

    pub fn has_key(key: &str) -> Self {
        Self::HasKey {
            key: key.to_string(),
        }
    }

    pub fn equal(value: &str) -> Self {
        Self::Equal {
            value: value.to_string(),
        }
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Self::And { conditions }
    }

    pub fn evaluate(&self, ctx: &ClassificationContext<'_>) -> bool {
        match self {
            Self::Includes { value } => ctx.raw_text.contains(value.as_str()),
            Self::Excludes { value } => !ctx.raw_text.contains(value.as_str()),
            Self::LessThan { length } => ctx.raw_text.chars().count() < *length,
            Self::MinusLessThan {
                left,
                right,
                threshold_secs,
            } => match (ctx.date(*left), ctx.date(*right)) {
                (Some(left), Some(right)) => {
                    left.signed_duration_since(right).num_seconds() < *threshold_secs
                }
                _ => false,
            },
            Self::HasKey { key } => ctx.fields.contains_key(key),
            Self::KeyCountGreaterThan { count } => ctx.fields.len() > *count,
            Self::Equal { value } => ctx.raw_text == value,
            Self::And { conditions } => conditions.iter().all(|c| c.evaluate(ctx)),
        }
    }
}

/// Assumption switch a rule's verdict depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssumptionFlag {
    Uniregistry,
    Ratelimit,
}

impl AssumptionFlag {
    fn is_set(&self, assumptions: &Assumptions) -> bool {
        match self {
            Self::Uniregistry => assumptions.uniregistry,
            Self::Ratelimit => assumptions.ratelimit,
        }
    }
}

/// What a matching rule yields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleVerdict {
    Fixed(Classification),
    /// `Unavailable` when the flag is set, otherwise the error
    UnavailableIf(AssumptionFlag, ErrorKind),
}

impl RuleVerdict {
    pub fn resolve(&self, assumptions: &Assumptions) -> Classification {
        match self {
            Self::Fixed(classification) => *classification,
            Self::UnavailableIf(flag, kind) => {
                if flag.is_set(assumptions) {
                    Classification::Unavailable
                } else {
                    Classification::Error(*kind)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub condition: Condition,
    pub verdict: RuleVerdict,
}

impl Rule {
    pub fn new(condition: Condition, verdict: RuleVerdict) -> Self {
        Self { condition, verdict }
    }
}

/// Ordered rule groups.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    pub special: Vec<Rule>,
    pub available: Vec<Rule>,
    pub unavailable: Vec<Rule>,
    pub error: Vec<Rule>,
}

impl RuleSet {
    /// Evaluate every group in order and return the first matching verdict.
    pub fn first_match(&self, ctx: &ClassificationContext<'_>) -> Option<&Rule> {
        self.special
            .iter()
            .chain(&self.available)
            .chain(&self.unavailable)
            .chain(&self.error)
            .find(|rule| rule.condition.evaluate(ctx))
    }

    pub fn len(&self) -> usize {
        self.special.len() + self.available.len() + self.unavailable.len() + self.error.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        default_rules()
    }
}

fn substrings(values: &[&str], verdict: RuleVerdict) -> Vec<Rule> {
    values
        .iter()
        .map(|value| Rule::new(Condition::includes(value), verdict))
        .collect()
}

const NOT_FOUND: &[&str] = &[
    "NOT FOUND",
    "Not found: ",
    " not found",
    "Not found",
    "No Data Found",
    "nothing found",
    "Nothing found for",
];

const NOT_FOUND_TAIL: &[&str] = &[
    "Domain Status: No Object Found",
    "DOMAIN NOT FOUND",
    "Domain Not Found",
    "Domain not found",
    "NO OBJECT FOUND!",
];

const NO_MATCH: &[&str] = &[
    "No match for domain",
    "- No Match",
    "NO MATCH:",
    "No match for",
    "No match",
    "No matching record.",
    "Nincs talalat",
];

const STATUS_AVAILABLE: &[&str] = &[
    "Status: AVAILABLE",
    "Status:             AVAILABLE",
    "Status: \tavailable",
    "Status: free",
    "Status: Not Registered",
    "query_status: 220 Available",
];

const UNIQUE_HEAD: &[&str] = &[
    "This domain name has not been registered",
    "The domain has not been registered",
    "This query returned 0 objects",
];

const UNIQUE_TAIL: &[&str] = &[
    "Object does not exist",
    "The queried object does not exist",
    "Not Registered -",
    "is available for registration",
    "is available for purchase",
    "DOMAIN IS NOT A REGISTERD",
    "No such domain",
    "No_Se_Encontro_El_Objeto",
    "Domain unknown",
    "No information available about domain name",
];

const UNAVAILABLE: &[&str] = &[
    "Domain Status:ok",
    "Expiration Date:",
    "Expiry Date:",
    "Status: connect",
    "Changed:",
];

const RATE_LIMITING: &[&str] = &[
    "IP Address Has Reached Rate Limit",
    "Too many connection attempts",
    "Your request is being rate limited",
    "Your query is too often.",
    "Your connection limit exceeded.",
];

// "error" and "Error" also match replies that merely mention such a word,
// e.g. a registrant named "error.com"; the order is kept regardless.
const REPLY_ERROR: &[&str] = &[
    "error ",
    "error",
    "Error",
    "ERROR:101:",
    "Whois lookup error",
    "can temporarily not be answered",
    "Invalid input",
];

/// The built-in rule table.
pub fn default_rules() -> RuleSet {
    use Classification::{Available, Error, Unavailable};

    let available = RuleVerdict::Fixed(Available);
    let unavailable = RuleVerdict::Fixed(Unavailable);
    let error = |kind| RuleVerdict::Fixed(Error(kind));

    let special = vec![Rule::new(
        Condition::and(vec![
            Condition::includes("Uniregistry"),
            Condition::includes("Query limit exceeded"),
        ]),
        RuleVerdict::UnavailableIf(AssumptionFlag::Uniregistry, ErrorKind::RateLimiting),
    )];

    let mut available_rules = substrings(NOT_FOUND, available);
    available_rules.push(Rule::new(
        Condition::and(vec![
            Condition::includes("No entries found"),
            Condition::excludes("ERROR:101:"),
        ]),
        available,
    ));
    available_rules.extend(substrings(NOT_FOUND_TAIL, available));
    available_rules.extend(substrings(NO_MATCH, available));
    available_rules.extend(substrings(STATUS_AVAILABLE, available));
    available_rules.push(Rule::new(
        Condition::MinusLessThan {
            left: DateField::Expiry,
            right: DateField::Control,
            threshold_secs: 0,
        },
        available,
    ));
    available_rules.extend(substrings(UNIQUE_HEAD, available));
    available_rules.push(Rule::new(
        Condition::and(vec![
            Condition::includes(" is free"),
            Condition::LessThan { length: 50 },
        ]),
        available,
    ));
    available_rules.extend(substrings(
        &["domain name not known in", "registration status: available"],
        available,
    ));
    available_rules.push(Rule::new(
        Condition::and(vec![
            Condition::includes("whois.nic.bo"),
            Condition::LessThan { length: 55 },
        ]),
        available,
    ));
    available_rules.extend(substrings(UNIQUE_TAIL, available));
    available_rules.push(Rule::new(
        Condition::and(vec![
            Condition::includes("Error."),
            Condition::includes("SaudiNIC"),
        ]),
        available,
    ));
    available_rules.push(Rule::new(Condition::includes("is not valid!"), available));

    let mut unavailable_rules = vec![Rule::new(Condition::has_key("domainName"), unavailable)];
    unavailable_rules.extend(substrings(UNAVAILABLE, unavailable));
    unavailable_rules.push(Rule::new(
        Condition::KeyCountGreaterThan { count: 5 },
        unavailable,
    ));
    unavailable_rules.push(Rule::new(
        Condition::includes("organisation: Internet Assigned Numbers Authority"),
        unavailable,
    ));

    let mut error_rules = vec![Rule::new(Condition::equal(""), error(ErrorKind::NoContent))];
    error_rules.push(Rule::new(
        Condition::includes("You  are  not  authorized  to  access or query our Whois"),
        error(ErrorKind::Unauthorized),
    ));
    error_rules.extend(substrings(
        RATE_LIMITING,
        RuleVerdict::UnavailableIf(AssumptionFlag::Ratelimit, ErrorKind::RateLimiting),
    ));
    error_rules.push(Rule::new(
        Condition::includes("Could not retrieve Whois data"),
        error(ErrorKind::Unretrievable),
    ));
    error_rules.extend(substrings(
        &["si is forbidden", "Requests of this client are not permitted"],
        error(ErrorKind::Forbidden),
    ));
    error_rules.push(Rule::new(
        Condition::includes("reserved by aeDA Regulator"),
        error(ErrorKind::ReservedByRegulator),
    ));
    error_rules.push(Rule::new(
        Condition::includes("third-level domains may not start with"),
        error(ErrorKind::Unregistrable),
    ));
    error_rules.push(Rule::new(Condition::has_key("error"), error(ErrorKind::ReplyError)));
    error_rules.push(Rule::new(Condition::has_key("errno"), error(ErrorKind::ReplyError)));
    error_rules.extend(substrings(REPLY_ERROR, error(ErrorKind::ReplyError)));

    RuleSet {
        special,
        available: available_rules,
        unavailable: unavailable_rules,
        error: error_rules,
    }
}
