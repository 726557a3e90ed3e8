//! Model response parsing.
//!
//! Extracts the fenced JSON block from a model response and coerces fields
//! per the active contract. Parsing is lenient: a field the model got wrong
//! is skipped, the rest of the object survives.

use super::contract::{ExtractionContract, FieldValue};
use super::ExtractError;

/// Pull the JSON payload out of a response: a ```json fence when present,
/// otherwise a raw top-level object.
pub fn extract_json_block(response: &str) -> Result<String, ExtractError> {
    if let Some(fence_start) = response.find("```json") {
        let content_start = fence_start + 7;
        let fence_end = response[content_start..].find("```").ok_or_else(|| {
            ExtractError::MalformedResponse("unclosed JSON block".into())
        })?;
        return Ok(response[content_start..content_start + fence_end]
            .trim()
            .to_string());
    }

    // No fence — accept a bare object
    let trimmed = response.trim();
    if let (Some(open), Some(close)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if open < close {
            return Ok(trimmed[open..=close].to_string());
        }
    }

    Err(ExtractError::MalformedResponse(
        "no JSON object found in response".into(),
    ))
}

/// Parse a response into (field name, value) pairs for a contract.
/// Missing, null, and uncoercible fields are skipped.
pub fn parse_field_values(
    response: &str,
    contract: &ExtractionContract,
) -> Result<Vec<(String, FieldValue)>, ExtractError> {
    let json_str = extract_json_block(response)?;

    let object: serde_json::Map<String, serde_json::Value> = serde_json::from_str(&json_str)
        .map_err(|e| ExtractError::MalformedResponse(e.to_string()))?;

    let mut values = Vec::new();
    for spec in &contract.fields {
        let Some(raw) = object.get(&spec.name) else {
            continue;
        };
        if let Some(value) = FieldValue::coerce(spec.kind, raw) {
            values.push((spec.name.clone(), value));
        }
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::contract::{FieldKind, FieldSpec};

    fn contract() -> ExtractionContract {
        ExtractionContract::new("invoice", "billing document")
            .with_field(FieldSpec::new("invoice_number", "id", FieldKind::Text))
            .with_field(FieldSpec::new("total_amount", "total", FieldKind::Number))
            .with_field(FieldSpec::new("invoice_date", "date", FieldKind::Date))
            .with_field(FieldSpec::new("line_items", "items", FieldKind::List))
    }

    #[test]
    fn parses_fenced_json() {
        let response = r#"Here is the extraction:

```json
{
  "invoice_number": "INV-042",
  "total_amount": 1250.0,
  "invoice_date": "2024-01-15",
  "line_items": ["Widget x2", "Gadget x1"]
}
```

Done."#;

        let values = parse_field_values(response, &contract()).unwrap();
        assert_eq!(values.len(), 4);
        assert_eq!(
            values[0],
            ("invoice_number".into(), FieldValue::Text("INV-042".into()))
        );
        assert_eq!(
            values[1],
            ("total_amount".into(), FieldValue::Number(1250.0))
        );
    }

    #[test]
    fn parses_bare_object_without_fence() {
        let response = r#"{"invoice_number": "INV-7", "total_amount": "$42.50"}"#;
        let values = parse_field_values(response, &contract()).unwrap();
        assert_eq!(values.len(), 2);
        assert_eq!(values[1].1, FieldValue::Number(42.5));
    }

    #[test]
    fn null_and_bad_fields_skipped() {
        let response = r#"```json
{
  "invoice_number": null,
  "total_amount": "not a number",
  "invoice_date": "2024-03-01",
  "unknown_extra": "ignored"
}
```"#;
        let values = parse_field_values(response, &contract()).unwrap();
        assert_eq!(values.len(), 1);
        assert_eq!(
            values[0],
            ("invoice_date".into(), FieldValue::Date("2024-03-01".into()))
        );
    }

    #[test]
    fn unclosed_fence_is_malformed() {
        let response = "```json\n{\"invoice_number\": \"INV-1\"";
        assert!(matches!(
            parse_field_values(response, &contract()),
            Err(ExtractError::MalformedResponse(_))
        ));
    }

    #[test]
    fn prose_without_json_is_malformed() {
        let response = "I could not find any of the requested fields.";
        assert!(matches!(
            extract_json_block(response),
            Err(ExtractError::MalformedResponse(_))
        ));
    }

    #[test]
    fn broken_json_is_malformed() {
        let response = "```json\n{ broken json here\n```";
        assert!(matches!(
            parse_field_values(response, &contract()),
            Err(ExtractError::MalformedResponse(_))
        ));
    }
}
