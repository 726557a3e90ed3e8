//! Extraction contracts.
//!
//! A contract declares the typed fields expected for one document type.
//! Contracts are configuration data supplied by the caller; the engine never
//! hardcodes one.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    List,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub description: String,
    pub kind: FieldKind,
    pub required: bool,
    /// A later unit may replace this field's value once populated.
    pub overwritable: bool,
}

impl FieldSpec {
    pub fn new(name: &str, description: &str, kind: FieldKind) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            kind,
            required: false,
            overwritable: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn overwritable(mut self) -> Self {
        self.overwritable = true;
        self
    }
}

/// Schema for one classified document type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionContract {
    pub doc_type: String,
    pub description: String,
    pub fields: Vec<FieldSpec>,
}

impl ExtractionContract {
    pub fn new(doc_type: &str, description: &str) -> Self {
        Self {
            doc_type: doc_type.to_string(),
            description: description.to_string(),
            fields: Vec::new(),
        }
    }

    pub fn with_field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// A typed, schema-validated field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum FieldValue {
    Text(String),
    Number(f64),
    /// Date kept as its source string, validated against known formats.
    Date(String),
    List(Vec<String>),
}

impl FieldValue {
    /// Coerce a raw JSON value to the declared kind. Returns None when the
    /// value is null, empty, or cannot be represented in that kind.
    pub fn coerce(kind: FieldKind, raw: &serde_json::Value) -> Option<FieldValue> {
        if raw.is_null() {
            return None;
        }
        match kind {
            FieldKind::Text => {
                let s = raw.as_str()?.trim();
                if s.is_empty() || s.eq_ignore_ascii_case("null") {
                    None
                } else {
                    Some(FieldValue::Text(s.to_string()))
                }
            }
            FieldKind::Number => match raw {
                serde_json::Value::Number(n) => n.as_f64().map(FieldValue::Number),
                serde_json::Value::String(s) => parse_number(s).map(FieldValue::Number),
                _ => None,
            },
            FieldKind::Date => {
                let s = raw.as_str()?.trim();
                parse_date(s).map(|_| FieldValue::Date(s.to_string()))
            }
            FieldKind::List => match raw {
                serde_json::Value::Array(items) => {
                    let values: Vec<String> = items
                        .iter()
                        .filter_map(|v| match v {
                            serde_json::Value::String(s) if !s.trim().is_empty() => {
                                Some(s.trim().to_string())
                            }
                            serde_json::Value::Number(n) => Some(n.to_string()),
                            serde_json::Value::Object(_) => {
                                serde_json::to_string(v).ok()
                            }
                            _ => None,
                        })
                        .collect();
                    if values.is_empty() {
                        None
                    } else {
                        Some(FieldValue::List(values))
                    }
                }
                serde_json::Value::String(s) if !s.trim().is_empty() => {
                    Some(FieldValue::List(vec![s.trim().to_string()]))
                }
                _ => None,
            },
        }
    }
}

/// Parse a numeric string, tolerating currency symbols and separators.
fn parse_number(s: &str) -> Option<f64> {
    let cleaned: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse().ok()
}

/// Validate a date string against the formats models actually emit.
/// Supports ISO 8601, European DD/MM/YYYY, US MM/DD/YYYY, and DD-MM-YYYY.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let trimmed = s.trim();
    if trimmed.is_empty() || trimmed == "null" || trimmed == "NOT_FOUND" {
        return None;
    }
    for format in ["%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y"] {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(d);
        }
    }
    None
}
