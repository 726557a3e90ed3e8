//! Prompt assembly for classification and field extraction.

use super::contract::{ExtractionContract, FieldKind};

pub const CLASSIFICATION_SYSTEM_PROMPT: &str = "\
You are a document classifier. Respond with a single fenced JSON object of \
the form {\"label\": \"...\", \"confidence\": 0.0-1.0} and nothing else.";

pub const EXTRACTION_SYSTEM_PROMPT: &str = "\
You are a document data extraction engine. Extract only the requested fields \
from the provided text. Respond with a single fenced JSON object. Use null \
for any field not present in the text. Never invent values.";

/// Classification prompt over the configured contract set.
pub fn build_classification_prompt(contracts: &[ExtractionContract], excerpt: &str) -> String {
    let mut prompt = String::from("Classify this document as one of the following types:\n");
    for contract in contracts {
        prompt.push_str(&format!("- {}: {}\n", contract.doc_type, contract.description));
    }
    prompt.push_str("\nIf none fit, use the label \"unknown\".\n\nDocument excerpt:\n");
    prompt.push_str(excerpt);
    prompt
}

/// Field extraction prompt for one content unit under a contract.
pub fn build_extraction_prompt(contract: &ExtractionContract, unit_text: &str) -> String {
    let mut prompt = format!(
        "Document type: {}\n\nExtract the following fields:\n",
        contract.doc_type
    );
    for field in &contract.fields {
        prompt.push_str(&format!(
            "- {} ({}): {}\n",
            field.name,
            kind_hint(field.kind),
            field.description
        ));
    }
    prompt.push_str("\nDocument text:\n");
    prompt.push_str(unit_text);
    prompt
}

fn kind_hint(kind: FieldKind) -> &'static str {
    match kind {
        FieldKind::Text => "text",
        FieldKind::Number => "number",
        FieldKind::Date => "date, YYYY-MM-DD",
        FieldKind::List => "list of strings",
    }
}
