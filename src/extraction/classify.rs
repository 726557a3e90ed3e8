//! Document type classification.
//!
//! Resolved once per document from the first unit before field extraction
//! begins; the label never changes mid-document. Low confidence tags the
//! result degraded, it never fails the document.

use serde::{Deserialize, Serialize};

use super::contract::ExtractionContract;
use super::parser::extract_json_block;

/// Confidence assigned when the model answered with a bare label instead of
/// the requested JSON shape.
const BARE_LABEL_CONFIDENCE: f32 = 0.4;

#[derive(Debug, Clone, Serialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f32,
}

impl Classification {
    pub fn unknown() -> Self {
        Self {
            label: "unknown".into(),
            confidence: 0.0,
        }
    }
}

/// Conflict policy when pagination could disagree on the document type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationPolicy {
    /// The first unit's classification is authoritative.
    FirstUnit,
    /// A low-confidence first classification may be replaced by a more
    /// confident read of the next unit, before extraction starts.
    HighestConfidence,
}

/// Parse the classifier's response. Accepts the requested JSON shape or,
/// leniently, a bare label on the first line.
pub fn parse_classification(response: &str) -> Classification {
    if let Ok(json_str) = extract_json_block(response) {
        #[derive(Deserialize)]
        struct Raw {
            label: Option<String>,
            confidence: Option<f32>,
        }
        if let Ok(raw) = serde_json::from_str::<Raw>(&json_str) {
            if let Some(label) = raw.label {
                let label = normalize_label(&label);
                if !label.is_empty() {
                    return Classification {
                        label,
                        confidence: raw.confidence.unwrap_or(BARE_LABEL_CONFIDENCE).clamp(0.0, 1.0),
                    };
                }
            }
        }
    }

    // Bare-label fallback: first non-empty line
    let label = response
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .map(normalize_label)
        .unwrap_or_default();

    if label.is_empty() {
        Classification::unknown()
    } else {
        Classification {
            label,
            confidence: BARE_LABEL_CONFIDENCE,
        }
    }
}

/// Match a classified label against the configured contracts.
pub fn match_contract<'a>(
    contracts: &'a [ExtractionContract],
    label: &str,
) -> Option<&'a ExtractionContract> {
    let normalized = normalize_label(label);
    contracts
        .iter()
        .find(|c| normalize_label(&c.doc_type) == normalized)
}

fn normalize_label(label: &str) -> String {
    label
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '.')
        .to_lowercase()
        .replace([' ', '-'], "_")
}
