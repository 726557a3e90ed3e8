//! PII detection and masking.
//!
//! A pure, stateless transform: detect personally-identifiable spans and
//! replace them with type tokens while preserving all surrounding text
//! verbatim. May run before text reaches a remote provider (in transit) or
//! on extracted values (at rest). Detection is pattern-based; false
//! negatives are a documented residual risk, not an error.

use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PiiKind {
    Ssn,
    Email,
    CreditCard,
    Phone,
    IpAddress,
}

impl PiiKind {
    fn token(&self) -> &'static str {
        match self {
            Self::Ssn => "[SSN]",
            Self::Email => "[EMAIL]",
            Self::CreditCard => "[CREDIT_CARD]",
            Self::Phone => "[PHONE]",
            Self::IpAddress => "[IP_ADDRESS]",
        }
    }
}

/// One detected span, with offsets into the ORIGINAL text.
#[derive(Debug, Clone, Serialize)]
pub struct PiiSpan {
    pub kind: PiiKind,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub struct MaskOutcome {
    pub masked: String,
    pub spans: Vec<PiiSpan>,
}

/// When the privacy filter runs relative to model calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaskingMode {
    Off,
    /// Mask raw text before splitting (protects data in transit).
    PreSplit,
    /// Mask extracted field values after merging (protects data at rest).
    PostExtract,
}

pub struct PrivacyFilter {
    patterns: Vec<(PiiKind, Regex)>,
}

impl PrivacyFilter {
    pub fn new() -> Self {
        // Order is detection precedence when spans overlap.
        let patterns = vec![
            (PiiKind::Ssn, Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").unwrap()),
            (
                PiiKind::Email,
                Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
            ),
            (
                PiiKind::CreditCard,
                Regex::new(r"\b\d(?:[ -]?\d){12,15}\b").unwrap(),
            ),
            (
                PiiKind::Phone,
                Regex::new(r"\b(?:\+?1[ .-]?)?\(?\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}\b").unwrap(),
            ),
            (
                PiiKind::IpAddress,
                Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").unwrap(),
            ),
        ];
        Self { patterns }
    }

    /// Detect and mask PII. Spans report offsets into the original text;
    /// everything outside a span is copied through verbatim.
    pub fn mask(&self, text: &str) -> MaskOutcome {
        let mut candidates: Vec<(usize, PiiSpan)> = Vec::new();

        for (precedence, (kind, pattern)) in self.patterns.iter().enumerate() {
            for m in pattern.find_iter(text) {
                if *kind == PiiKind::CreditCard && !luhn_valid(m.as_str()) {
                    continue;
                }
                candidates.push((
                    precedence,
                    PiiSpan {
                        kind: *kind,
                        start: m.start(),
                        end: m.end(),
                    },
                ));
            }
        }

        // Resolve overlaps: earlier start wins, then longer span, then
        // higher detection precedence.
        candidates.sort_by(|(pa, a), (pb, b)| {
            a.start
                .cmp(&b.start)
                .then(b.end.cmp(&a.end))
                .then(pa.cmp(pb))
        });

        let mut spans: Vec<PiiSpan> = Vec::new();
        for (_, span) in candidates {
            if spans.last().map_or(true, |prev| span.start >= prev.end) {
                spans.push(span);
            }
        }

        let mut masked = String::with_capacity(text.len());
        let mut cursor = 0;
        for span in &spans {
            masked.push_str(&text[cursor..span.start]);
            masked.push_str(span.kind.token());
            cursor = span.end;
        }
        masked.push_str(&text[cursor..]);

        if !spans.is_empty() {
            tracing::debug!(spans = spans.len(), "PII spans masked");
        }

        MaskOutcome { masked, spans }
    }
}

impl Default for PrivacyFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Luhn checksum over the digits of a candidate card number.
fn luhn_valid(candidate: &str) -> bool {
    let digits: Vec<u32> = candidate.chars().filter_map(|c| c.to_digit(10)).collect();
    if !(13..=16).contains(&digits.len()) {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ssn_pattern_never_survives() {
        let filter = PrivacyFilter::new();
        let outcome = filter.mask("Applicant SSN: 123-45-6789, verified.");
        assert!(!outcome.masked.contains("123-45-6789"));
        assert!(outcome.masked.contains("[SSN]"));
        assert_eq!(outcome.spans.len(), 1);
        assert_eq!(outcome.spans[0].kind, PiiKind::Ssn);
    }

    #[test]
    fn surrounding_text_preserved_verbatim() {
        let filter = PrivacyFilter::new();
        let outcome = filter.mask("Contact jane.doe@example.com for details.");
        assert_eq!(outcome.masked, "Contact [EMAIL] for details.");
    }

    #[test]
    fn spans_report_original_offsets() {
        let filter = PrivacyFilter::new();
        let text = "Call 555-123-4567 now";
        let outcome = filter.mask(text);
        assert_eq!(outcome.spans.len(), 1);
        let span = &outcome.spans[0];
        assert_eq!(&text[span.start..span.end], "555-123-4567");
        assert_eq!(span.kind, PiiKind::Phone);
    }

    #[test]
    fn credit_card_requires_luhn() {
        let filter = PrivacyFilter::new();

        // Valid test number (Visa)
        let valid = filter.mask("Card: 4111 1111 1111 1111 on file");
        assert!(valid.masked.contains("[CREDIT_CARD]"));

        // Same shape, bad checksum — left alone
        let invalid = filter.mask("Ref: 4111 1111 1111 1112 lot number");
        assert!(!invalid.masked.contains("[CREDIT_CARD]"));
        assert!(invalid.masked.contains("4111 1111 1111 1112"));
    }

    #[test]
    fn ip_addresses_masked() {
        let filter = PrivacyFilter::new();
        let outcome = filter.mask("Request from 192.168.1.100 at 09:14.");
        assert_eq!(outcome.masked, "Request from [IP_ADDRESS] at 09:14.");
    }

    #[test]
    fn multiple_kinds_in_one_text() {
        let filter = PrivacyFilter::new();
        let outcome = filter.mask(
            "Customer john@corp.example (SSN 987-65-4320) called from 555-867-5309.",
        );
        assert!(outcome.masked.contains("[EMAIL]"));
        assert!(outcome.masked.contains("[SSN]"));
        assert!(outcome.masked.contains("[PHONE]"));
        assert_eq!(outcome.spans.len(), 3);
        // Spans ordered by position
        assert!(outcome.spans[0].start < outcome.spans[1].start);
        assert!(outcome.spans[1].start < outcome.spans[2].start);
    }

    #[test]
    fn clean_text_unchanged() {
        let filter = PrivacyFilter::new();
        let text = "Invoice INV-042 total $1,250.00 due 2024-02-01.";
        let outcome = filter.mask(text);
        assert_eq!(outcome.masked, text);
        assert!(outcome.spans.is_empty());
    }

    #[test]
    fn ssn_not_double_matched_as_phone() {
        let filter = PrivacyFilter::new();
        let outcome = filter.mask("SSN 123-45-6789 only");
        assert_eq!(outcome.spans.len(), 1);
        assert_eq!(outcome.spans[0].kind, PiiKind::Ssn);
    }

    #[test]
    fn empty_input() {
        let filter = PrivacyFilter::new();
        let outcome = filter.mask("");
        assert_eq!(outcome.masked, "");
        assert!(outcome.spans.is_empty());
    }

    #[test]
    fn luhn_checksum() {
        assert!(luhn_valid("4111111111111111"));
        assert!(luhn_valid("4111 1111 1111 1111"));
        assert!(!luhn_valid("4111111111111112"));
        assert!(!luhn_valid("1234"));
    }
}
