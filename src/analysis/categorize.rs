use std::collections::BTreeSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::AnalysisError;

/// Answer a categorizer gives when no candidate fits.
pub const NO_MATCH: &str = "no match";
pub const DEFAULT_MIN_OVERLAP: f64 = 0.2;

/// Keyed catalog line offered to a categorizer: a heading or an article.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub key: String,
    pub text: String,
}

/// Picks one candidate key for a free-text description, or answers
/// [`NO_MATCH`]. Implementations may be remote; any answer is validated
/// against the candidate keys before use.
pub trait Categorizer {
    fn name(&self) -> &str;

    fn classify(&self, text: &str, candidates: &[CatalogEntry]) -> Result<String, AnalysisError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CategorizationOutcome {
    Matched(String),
    NoMatch,
    /// Answer outside the candidate vocabulary.
    Rejected(String),
    Failed(String),
}

pub fn validate_answer(answer: &str, candidates: &[CatalogEntry]) -> CategorizationOutcome {
    let answer = answer.trim();
    if answer.eq_ignore_ascii_case(NO_MATCH) {
        return CategorizationOutcome::NoMatch;
    }
    if candidates.iter().any(|candidate| candidate.key == answer) {
        CategorizationOutcome::Matched(answer.to_string())
    } else {
        CategorizationOutcome::Rejected(answer.to_string())
    }
}

pub fn categorize(
    categorizer: &dyn Categorizer,
    text: &str,
    candidates: &[CatalogEntry],
) -> CategorizationOutcome {
    match categorizer.classify(text, candidates) {
        Ok(answer) => validate_answer(&answer, candidates),
        Err(err) => CategorizationOutcome::Failed(err.to_string()),
    }
}

/// Offline categorizer scoring candidates by Jaccard overlap of lowercase word
/// tokens.
#[derive(Debug, Clone)]
pub struct KeywordCategorizer {
    min_overlap: f64,
    token_re: Regex,
}

impl KeywordCategorizer {
    pub fn new(min_overlap: f64) -> Result<Self, AnalysisError> {
        if !(0.0..=1.0).contains(&min_overlap) {
            return Err(AnalysisError::InvalidThreshold {
                name: "min_overlap",
                value: min_overlap,
                reason: "must lie in [0, 1]",
            });
        }
        let token_re = Regex::new(r"[\p{L}\p{N}]+").map_err(|err| AnalysisError::MalformedInput {
            input: "token pattern".to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            min_overlap,
            token_re,
        })
    }

    fn tokens(&self, text: &str) -> BTreeSet<String> {
        self.token_re
            .find_iter(text)
            .map(|token| token.as_str().to_lowercase())
            .collect()
    }

    pub fn overlap(&self, left: &str, right: &str) -> f64 {
        let left = self.tokens(left);
        let right = self.tokens(right);
        let union = left.union(&right).count();
        if union == 0 {
            return 0.0;
        }
        left.intersection(&right).count() as f64 / union as f64
    }
}

impl Categorizer for KeywordCategorizer {
    fn name(&self) -> &str {
        "keyword"
    }

    fn classify(&self, text: &str, candidates: &[CatalogEntry]) -> Result<String, AnalysisError> {
        let mut best: Option<(&str, f64)> = None;
        for candidate in candidates {
            let score = self.overlap(text, &candidate.text);
            match best {
                Some((_, current)) if score <= current => {}
                _ => best = Some((candidate.key.as_str(), score)),
            }
        }

        Ok(match best {
            Some((key, score)) if score > 0.0 && score >= self.min_overlap => key.to_string(),
            _ => NO_MATCH.to_string(),
        })
    }
}
