//! Reply classification.
//!
//! [`ClassificationEngine`] turns a raw reply into exactly one
//! [`Classification`]. WHOIS text goes through the optional model first, then
//! the ordered rule table, then the `unparsable` assumption. DNS and RDAP
//! outcomes map directly.

pub mod model;
pub mod parser;
pub mod rules;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{Assumptions, LookupSettings};
use crate::error::DiggerError;
use crate::transport::{DnsOutcome, RawReply};
use crate::types::{Classification, ErrorKind};

use model::NaiveBayesModel;
use parser::{DomainParameters, ReplyFields};
use rules::{DateField, RuleSet};

/// Everything a rule may look at. Built fresh for every call.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationContext<'a> {
    pub raw_text: &'a str,
    pub fields: &'a ReplyFields,
    pub params: &'a DomainParameters,
    pub control_date: DateTime<Utc>,
}

impl ClassificationContext<'_> {
    pub fn date(&self, field: DateField) -> Option<DateTime<Utc>> {
        match field {
            DateField::Creation => self.params.creation_date,
            DateField::Update => self.params.update_date,
            DateField::Expiry => self.params.expiry_date,
            DateField::Control => Some(self.control_date),
        }
    }
}

/// A verdict together with what was parsed on the way to it.
#[derive(Debug, Clone)]
pub struct ClassifiedReply {
    pub classification: Classification,
    pub reply_text: String,
    pub fields: ReplyFields,
    pub params: DomainParameters,
}

pub struct ClassificationEngine {
    rules: RuleSet,
    model: Option<NaiveBayesModel>,
    min_margin: f64,
    assumptions: Assumptions,
}

impl ClassificationEngine {
    /// Engine with the built-in rules, loading the model when enabled.
    ///
    /// # Errors
    ///
    /// Returns `ModelError`/`FileError` when the model is enabled but cannot
    /// be loaded.
    pub fn from_settings(settings: &LookupSettings) -> Result<Self, DiggerError> {
        let model = match (&settings.model.enabled, &settings.model.path) {
            (true, Some(path)) => Some(NaiveBayesModel::load(path)?),
            (true, None) => return Err(DiggerError::model("Model enabled without a path")),
            _ => None,
        };

        Ok(Self {
            rules: RuleSet::default(),
            model,
            min_margin: settings.model.min_margin,
            assumptions: settings.assumptions.clone(),
        })
    }

    pub fn new(assumptions: Assumptions) -> Self {
        Self {
            rules: RuleSet::default(),
            model: None,
            min_margin: 0.0,
            assumptions,
        }
    }

    pub fn with_rules(mut self, rules: RuleSet) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_model(mut self, model: NaiveBayesModel, min_margin: f64) -> Self {
        self.model = Some(model);
        self.min_margin = min_margin;
        self
    }

    pub fn assumptions(&self) -> &Assumptions {
        &self.assumptions
    }

    /// Classify WHOIS text against the current time.
    pub fn classify(&self, raw_text: &str) -> Classification {
        self.classify_text_at(raw_text, Utc::now()).classification
    }

    /// Classify WHOIS text against `control_date`.
    pub fn classify_text_at(&self, raw_text: &str, control_date: DateTime<Utc>) -> ClassifiedReply {
        let fields = if parser::is_timeout_reply(raw_text) {
            ReplyFields::new()
        } else {
            parser::parse_reply(raw_text)
        };
        let params = DomainParameters::from_fields(&fields);

        let classification = self.evaluate(raw_text, &fields, &params, control_date);
        debug!(%classification, fields = fields.len(), "classified reply");

        ClassifiedReply {
            classification,
            reply_text: raw_text.to_string(),
            fields,
            params,
        }
    }

    fn evaluate(
        &self,
        raw_text: &str,
        fields: &ReplyFields,
        params: &DomainParameters,
        control_date: DateTime<Utc>,
    ) -> Classification {
        if let Some(model) = &self.model {
            let prediction = model.score(raw_text);
            if prediction.margin() > self.min_margin {
                return prediction.label();
            }
        }

        let ctx = ClassificationContext {
            raw_text,
            fields,
            params,
            control_date,
        };

        match self.rules.first_match(&ctx) {
            Some(rule) => rule.verdict.resolve(&self.assumptions),
            None if self.assumptions.unparsable => Classification::Available,
            None => Classification::Error(ErrorKind::Unparsable),
        }
    }

    /// NS records mean taken, NXDOMAIN means free.
    pub fn classify_dns(&self, outcome: &DnsOutcome) -> Classification {
        match outcome {
            DnsOutcome::HasNameservers(_) => Classification::Unavailable,
            DnsOutcome::NoSuchDomain => Classification::Available,
            DnsOutcome::Failed(_) if self.assumptions.dns_failure_unavailable => {
                Classification::Unavailable
            }
            DnsOutcome::Failed(_) => Classification::Error(ErrorKind::ReplyError),
        }
    }

    /// 200 means taken, 404 means free.
    pub fn classify_rdap(&self, status_code: u16) -> Classification {
        match status_code {
            200 => Classification::Unavailable,
            404 => Classification::Available,
            _ => Classification::Error(ErrorKind::ReplyError),
        }
    }

    /// Classify any transport reply.
    pub fn classify_reply(&self, reply: &RawReply, control_date: DateTime<Utc>) -> ClassifiedReply {
        match reply {
            RawReply::Whois(text) => self.classify_text_at(text, control_date),
            RawReply::Dns(outcome) => ClassifiedReply {
                classification: self.classify_dns(outcome),
                reply_text: outcome.to_string(),
                fields: ReplyFields::new(),
                params: DomainParameters::default(),
            },
            RawReply::Rdap { status_code, body } => {
                let fields = rdap_fields(body);
                let params = DomainParameters::from_fields(&fields);
                ClassifiedReply {
                    classification: self.classify_rdap(*status_code),
                    reply_text: body.clone(),
                    fields,
                    params,
                }
            }
        }
    }
}

/// Pull registrar and event dates out of an RDAP JSON body.
fn rdap_fields(body: &str) -> ReplyFields {
    let mut fields = ReplyFields::new();
    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return fields;
    };

    if let Some(name) = json.get("ldhName").and_then(|v| v.as_str()) {
        fields.insert("domainName".to_string(), name.to_string());
    }

    if let Some(events) = json.get("events").and_then(|v| v.as_array()) {
        for event in events {
            let action = event.get("eventAction").and_then(|v| v.as_str());
            let date = event.get("eventDate").and_then(|v| v.as_str());
            let key = match action {
                Some("registration") => "creationDate",
                Some("expiration") => "expiryDate",
                Some("last changed") => "updatedDate",
                _ => continue,
            };
            if let Some(date) = date {
                fields.insert(key.to_string(), date.to_string());
            }
        }
    }

    if let Some(entities) = json.get("entities").and_then(|v| v.as_array()) {
        for entity in entities {
            let is_registrar = entity
                .get("roles")
                .and_then(|r| r.as_array())
                .is_some_and(|roles| roles.iter().any(|r| r.as_str() == Some("registrar")));
            if !is_registrar {
                continue;
            }
            // vCard: ["vcard", [["fn", {}, "text", "Name"], ...]]
            let name = entity
                .get("vcardArray")
                .and_then(|v| v.get(1))
                .and_then(|v| v.as_array())
                .and_then(|props| {
                    props
                        .iter()
                        .find(|p| p.get(0).and_then(|n| n.as_str()) == Some("fn"))
                })
                .and_then(|p| p.get(3))
                .and_then(|v| v.as_str());
            if let Some(name) = name {
                fields.insert("registrar".to_string(), name.to_string());
            }
        }
    }

    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn engine() -> ClassificationEngine {
        ClassificationEngine::new(Assumptions::default())
    }

    fn at(engine: &ClassificationEngine, text: &str) -> Classification {
        let control = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        engine.classify_text_at(text, control).classification
    }

    #[test]
    fn test_available_wordings() {
        let engine = engine();
        assert_eq!(at(&engine, "No match for domain example.com"), Classification::Available);
        assert_eq!(at(&engine, "%% NOT FOUND\n"), Classification::Available);
        assert_eq!(at(&engine, "Status: free\n"), Classification::Available);
        assert_eq!(at(&engine, "example.de is free"), Classification::Available);
    }

    #[test]
    fn test_unavailable_wordings() {
        let engine = engine();
        assert_eq!(
            at(&engine, "Domain Status:ok\nExpiration Date: 2099-01-01"),
            Classification::Unavailable
        );
        assert_eq!(
            at(&engine, "Domain Name: EXAMPLE.COM\n"),
            Classification::Unavailable
        );
    }

    #[test]
    fn test_expired_domain_is_available() {
        let engine = engine();
        assert_eq!(
            at(&engine, "Registry Expiry Date: 2020-01-01T00:00:00Z\n"),
            Classification::Available
        );
    }

    #[test]
    fn test_long_is_free_is_not_enough() {
        let engine = engine();
        let text = "The name you asked about is free to discuss, but we have no data for it.";
        assert_eq!(at(&engine, text), Classification::Error(ErrorKind::Unparsable));
    }

    #[test]
    fn test_error_subtypes() {
        let engine = engine();
        assert_eq!(at(&engine, ""), Classification::Error(ErrorKind::NoContent));
        assert_eq!(
            at(&engine, "Your connection limit exceeded."),
            Classification::Error(ErrorKind::RateLimiting)
        );
        assert_eq!(
            at(&engine, "Could not retrieve Whois data"),
            Classification::Error(ErrorKind::Unretrievable)
        );
        assert_eq!(
            at(&engine, "This name is reserved by aeDA Regulator"),
            Classification::Error(ErrorKind::ReservedByRegulator)
        );
        assert_eq!(
            at(&engine, "Whois lookup error, lookup: timeout"),
            Classification::Error(ErrorKind::ReplyError)
        );
    }

    #[test]
    fn test_ratelimit_assumption() {
        let engine = ClassificationEngine::new(Assumptions {
            ratelimit: true,
            ..Default::default()
        });
        assert_eq!(
            at(&engine, "Your connection limit exceeded."),
            Classification::Unavailable
        );
    }

    #[test]
    fn test_uniregistry_special_case() {
        let text = "Uniregistry\nQuery limit exceeded";
        assert_eq!(at(&engine(), text), Classification::Unavailable);

        let strict = ClassificationEngine::new(Assumptions {
            uniregistry: false,
            ..Default::default()
        });
        assert_eq!(at(&strict, text), Classification::Error(ErrorKind::RateLimiting));
    }

    #[test]
    fn test_unparsable_assumption() {
        let text = "something nobody has seen before";
        assert_eq!(at(&engine(), text), Classification::Error(ErrorKind::Unparsable));

        let lenient = ClassificationEngine::new(Assumptions {
            unparsable: true,
            ..Default::default()
        });
        assert_eq!(at(&lenient, text), Classification::Available);
    }

    #[test]
    fn test_error_substring_overlap_is_kept() {
        // A reply merely mentioning the word still lands in replyerror
        assert_eq!(
            at(&engine(), "see error.example for help"),
            Classification::Error(ErrorKind::ReplyError)
        );
    }

    #[test]
    fn test_model_preempts_rules() {
        let model = NaiveBayesModel::from_json(
            r#"{"vocabulary":["zzz"],"classTotals":{"available":1,"unavailable":1},
                "tokenTotals":{"available":5,"unavailable":5},
                "tokenCounts":{"available":{"zzz":5},"unavailable":{}}}"#,
        )
        .unwrap();
        let engine = engine().with_model(model, 0.0);
        assert_eq!(at(&engine, "Domain Name: zzz\n"), Classification::Available);

        // No confident score, the rules decide
        assert_eq!(at(&engine, "Domain Name: x\n"), Classification::Unavailable);
    }

    #[test]
    fn test_dns_and_rdap_mapping() {
        let engine = engine();
        assert_eq!(
            engine.classify_dns(&DnsOutcome::HasNameservers(vec!["ns1.example".into()])),
            Classification::Unavailable
        );
        assert_eq!(engine.classify_dns(&DnsOutcome::NoSuchDomain), Classification::Available);
        assert_eq!(
            engine.classify_dns(&DnsOutcome::Failed("SERVFAIL".into())),
            Classification::Unavailable
        );

        let strict = ClassificationEngine::new(Assumptions {
            dns_failure_unavailable: false,
            ..Default::default()
        });
        assert_eq!(
            strict.classify_dns(&DnsOutcome::Failed("SERVFAIL".into())),
            Classification::Error(ErrorKind::ReplyError)
        );

        assert_eq!(engine.classify_rdap(200), Classification::Unavailable);
        assert_eq!(engine.classify_rdap(404), Classification::Available);
        assert_eq!(engine.classify_rdap(503), Classification::Error(ErrorKind::ReplyError));
    }

    #[test]
    fn test_rdap_fields() {
        let body = r#"{
            "ldhName": "example.com",
            "events": [
                {"eventAction": "registration", "eventDate": "1995-08-14T04:00:00Z"},
                {"eventAction": "expiration", "eventDate": "2099-08-13T04:00:00Z"}
            ],
            "entities": [
                {"roles": ["registrar"], "vcardArray": ["vcard", [["version", {}, "text", "4.0"], ["fn", {}, "text", "Example Registrar"]]]}
            ]
        }"#;
        let control = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let reply = RawReply::Rdap {
            status_code: 200,
            body: body.to_string(),
        };
        let classified = engine().classify_reply(&reply, control);
        assert_eq!(classified.classification, Classification::Unavailable);
        assert_eq!(classified.params.registrar.as_deref(), Some("Example Registrar"));
        assert!(classified.params.expiry_date.is_some());
    }
}
