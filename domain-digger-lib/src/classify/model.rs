//! Naive Bayes fallback classifier.
//!
//! The model is trained elsewhere and shipped as JSON:
//!
//! ```json
//! {
//!   "vocabulary": ["no", "match", ...],
//!   "classTotals": {"available": 120, "unavailable": 340},
//!   "tokenTotals": {"available": 4100, "unavailable": 28000},
//!   "tokenCounts": {"available": {"no": 97}, "unavailable": {"registrar": 311}}
//! }
//! ```

use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::error::DiggerError;
use crate::types::Classification;

#[derive(Debug, Clone, Default, Deserialize)]
struct LabelCounts {
    available: f64,
    unavailable: f64,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct TokenCounts {
    #[serde(default)]
    available: HashMap<String, f64>,
    #[serde(default)]
    unavailable: HashMap<String, f64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelFile {
    vocabulary: Vec<String>,
    class_totals: LabelCounts,
    token_totals: LabelCounts,
    token_counts: TokenCounts,
}

/// Scores for both labels, natural-log space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub available: f64,
    pub unavailable: f64,
}

impl Prediction {
    pub fn label(&self) -> Classification {
        if self.available > self.unavailable {
            Classification::Available
        } else {
            Classification::Unavailable
        }
    }

    pub fn margin(&self) -> f64 {
        (self.available - self.unavailable).abs()
    }
}

/// A loaded binary Naive Bayes model with Laplace smoothing.
#[derive(Debug, Clone)]
pub struct NaiveBayesModel {
    vocabulary_size: usize,
    class_totals: LabelCounts,
    token_totals: LabelCounts,
    token_counts: TokenCounts,
}

impl NaiveBayesModel {
    /// Parse a model from its JSON text.
    pub fn from_json(json: &str) -> Result<Self, DiggerError> {
        let file: ModelFile = serde_json::from_str(json)
            .map_err(|e| DiggerError::model(format!("Invalid model JSON: {}", e)))?;

        let total = file.class_totals.available + file.class_totals.unavailable;
        if total <= 0.0 {
            return Err(DiggerError::model("Model has no training documents"));
        }
        if file.class_totals.available <= 0.0 || file.class_totals.unavailable <= 0.0 {
            return Err(DiggerError::model("Model needs documents for both labels"));
        }

        let vocabulary_size = file.vocabulary.iter().collect::<HashSet<_>>().len();

        Ok(Self {
            vocabulary_size,
            class_totals: file.class_totals,
            token_totals: file.token_totals,
            token_counts: file.token_counts,
        })
    }

    /// Read and parse a model file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DiggerError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            DiggerError::file_error(path.to_string_lossy(), format!("Failed to read model: {}", e))
        })?;
        Self::from_json(&json)
    }

    pub fn score(&self, text: &str) -> Prediction {
        let tokens = tokenize(text);
        let total_docs = self.class_totals.available + self.class_totals.unavailable;
        let vocab = self.vocabulary_size as f64;

        let score = |prior: f64, token_total: f64, counts: &HashMap<String, f64>| {
            tokens.iter().fold((prior / total_docs).ln(), |acc, token| {
                let count = counts.get(token).copied().unwrap_or(0.0);
                acc + ((count + 1.0) / (token_total + vocab)).ln()
            })
        };

        Prediction {
            available: score(
                self.class_totals.available,
                self.token_totals.available,
                &self.token_counts.available,
            ),
            unavailable: score(
                self.class_totals.unavailable,
                self.token_totals.unavailable,
                &self.token_counts.unavailable,
            ),
        }
    }

    pub fn predict(&self, text: &str) -> Classification {
        self.score(text).label()
    }
}

/// Lowercase, collapse every non `[a-z0-9]` run into a space, split.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    let mut tokens = Vec::new();
    let mut current = String::new();

    for c in lowered.chars() {
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            current.push(c);
        } else if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = r#"{
        "vocabulary": ["no", "match", "for", "registrar", "domain", "name"],
        "classTotals": {"available": 10, "unavailable": 10},
        "tokenTotals": {"available": 30, "unavailable": 30},
        "tokenCounts": {
            "available": {"no": 10, "match": 10, "for": 10},
            "unavailable": {"registrar": 10, "domain": 10, "name": 10}
        }
    }"#;

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("No match for \"EXAMPLE.COM\"!"),
            vec!["no", "match", "for", "example", "com"]
        );
        assert!(tokenize("  --  ").is_empty());
    }

    #[test]
    fn test_predict_labels() {
        let model = NaiveBayesModel::from_json(MODEL).unwrap();
        assert_eq!(model.predict("No match for x"), Classification::Available);
        assert_eq!(
            model.predict("Domain Name: X\nRegistrar: Y"),
            Classification::Unavailable
        );
    }

    #[test]
    fn test_score_matches_closed_form() {
        let model = NaiveBayesModel::from_json(MODEL).unwrap();
        let prediction = model.score("no");
        let expected_available = (0.5f64).ln() + (11.0f64 / 36.0).ln();
        let expected_unavailable = (0.5f64).ln() + (1.0f64 / 36.0).ln();
        assert!((prediction.available - expected_available).abs() < 1e-9);
        assert!((prediction.unavailable - expected_unavailable).abs() < 1e-9);
    }

    #[test]
    fn test_tie_has_zero_margin() {
        let model = NaiveBayesModel::from_json(MODEL).unwrap();
        let prediction = model.score("");
        assert_eq!(prediction.margin(), 0.0);
        assert_eq!(prediction.label(), Classification::Unavailable);
    }

    #[test]
    fn test_rejects_degenerate_models() {
        assert!(NaiveBayesModel::from_json("{}").is_err());
        let empty = MODEL.replace("\"available\": 10, \"unavailable\": 10", "\"available\": 0, \"unavailable\": 0");
        assert!(NaiveBayesModel::from_json(&empty).is_err());
    }
}
