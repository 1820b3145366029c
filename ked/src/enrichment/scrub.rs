//! Regex-based PII redaction for transcripts.

use std::collections::HashMap;

use regex::{Captures, Regex};

use crate::error::{KedError, Result};

/// Phone candidates shorter than this are years, amounts and the like.
const MIN_PHONE_DIGITS: usize = 7;

/// Applied in order; narrower patterns first so `phone` cannot claim
/// the digits of an SSN or card number.
const PATTERNS: [(&str, &str); 4] = [
    ("ssn", r"\b\d{3}-\d{2}-\d{4}\b"),
    ("credit_card", r"\b\d{4}[-\s]?\d{4}[-\s]?\d{4}[-\s]?\d{4}\b"),
    ("email", r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b"),
    (
        "phone",
        r"\b\d{3}[-.]?\d{3}[-.]?\d{4}\b|\+?\d{1,3}[-.\s]?\d{1,4}[-.\s]?\d{1,9}\b",
    ),
];

/// Scrubbed text plus how many matches of each kind were replaced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scrubbed {
    pub text: String,
    pub redactions: HashMap<String, usize>,
}

pub struct PiiScrubber {
    patterns: Vec<(&'static str, Regex)>,
}

impl PiiScrubber {
    pub fn new() -> Result<Self> {
        let patterns = PATTERNS
            .iter()
            .map(|(kind, pattern)| {
                Regex::new(pattern)
                    .map(|re| (*kind, re))
                    .map_err(|e| KedError::Internal(format!("invalid {kind} pattern: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    /// Replace every match with `[REDACTED_<KIND>]`.
    pub fn scrub(&self, text: &str) -> Scrubbed {
        let mut text = text.to_string();
        let mut redactions = HashMap::new();

        for (kind, re) in &self.patterns {
            let marker = format!("[REDACTED_{}]", kind.to_uppercase());
            let mut count = 0usize;
            let replaced = re.replace_all(&text, |caps: &Captures| {
                let found = &caps[0];
                if *kind == "phone"
                    && found.chars().filter(char::is_ascii_digit).count() < MIN_PHONE_DIGITS
                {
                    return found.to_string();
                }
                count += 1;
                marker.clone()
            });
            let replaced = replaced.into_owned();
            if count > 0 {
                redactions.insert(kind.to_string(), count);
                text = replaced;
            }
        }

        Scrubbed { text, redactions }
    }
}
