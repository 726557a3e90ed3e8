//! Structured data extraction.
//!
//! Drives one or more model calls per document under a completion strategy
//! and assembles partial outputs into a single `ExtractionResult` with
//! per-field provenance and a failure manifest. Nothing is silently
//! dropped: every non-success outcome is recorded.

pub mod classify;
pub mod contract;
pub mod engine;
pub mod parser;
pub mod privacy;
pub mod prompt;

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::document::DocumentError;
use crate::providers::ProviderError;
use contract::FieldValue;
use privacy::PiiSpan;

/// Minimum input length for extraction (characters).
pub const MIN_INPUT_LENGTH: usize = 10;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("provider call failed: {0}")]
    Provider(#[from] ProviderError),

    #[error("document error: {0}")]
    Document(#[from] DocumentError),

    #[error("malformed model response: {0}")]
    MalformedResponse(String),

    #[error("input text too short for extraction (< {MIN_INPUT_LENGTH} characters)")]
    InputTooShort,

    #[error("processing cancelled")]
    Cancelled,
}

/// Which unit and which provider produced a field value.
#[derive(Debug, Clone, Serialize)]
pub struct FieldProvenance {
    pub unit_index: usize,
    pub provider: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedField {
    pub name: String,
    pub value: FieldValue,
    pub provenance: FieldProvenance,
}

/// One content unit whose extraction could not be completed.
#[derive(Debug, Clone, Serialize)]
pub struct UnitFailure {
    pub unit_index: usize,
    pub reason: String,
}

/// Final output of document processing. Built incrementally, finalized once
/// all units are processed or a terminal failure occurs.
#[derive(Debug, Clone, Serialize)]
pub struct ExtractionResult {
    pub document_id: Uuid,
    /// Classified document type label ("unknown" when classification failed).
    pub doc_type: String,
    pub classification_confidence: f32,
    /// Low classification confidence or an unmatched label tag the result
    /// degraded rather than failed.
    pub degraded: bool,
    pub fields: Vec<ExtractedField>,
    /// Indices of units whose extraction failed, with reasons.
    pub failed_units: Vec<UnitFailure>,
    /// Total number of units the document was split into.
    pub unit_count: usize,
    /// PII spans detected by the privacy filter, when masking ran.
    pub masked_spans: Vec<PiiSpan>,
}

impl ExtractionResult {
    pub fn field(&self, name: &str) -> Option<&FieldValue> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
    }

    /// A result is complete when no unit failed.
    pub fn is_complete(&self) -> bool {
        self.failed_units.is_empty()
    }
}
