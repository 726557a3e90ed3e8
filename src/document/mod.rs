//! Document model and ingestion seam.

pub mod format;
pub mod loader;
pub mod split;

use std::path::PathBuf;

use thiserror::Error;
use uuid::Uuid;

use format::DocumentFormat;

#[derive(Error, Debug)]
pub enum DocumentError {
    /// The file format is not supported by the active loader.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The file could not be read.
    #[error("failed to load document: {0}")]
    Load(#[from] std::io::Error),

    /// The file decoded but contains no usable text.
    #[error("document contains no text content")]
    Empty,
}

/// An ingested document. Immutable once split into content units.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: Uuid,
    pub path: PathBuf,
    pub format: DocumentFormat,
    /// Raw bytes as loaded from disk.
    pub bytes: Vec<u8>,
    /// Text content produced by the loader (native text, or OCR output for
    /// scanned formats handled by an external loader).
    pub text: String,
}

impl Document {
    /// Build a document directly from text. Used by tests and by callers
    /// that already hold extracted content.
    pub fn from_text(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            id: Uuid::new_v4(),
            path: path.into(),
            format: DocumentFormat::PlainText,
            bytes: text.as_bytes().to_vec(),
            text,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_text_sets_identity_and_bytes() {
        let doc = Document::from_text("invoice.txt", "Invoice #42");
        assert_eq!(doc.text, "Invoice #42");
        assert_eq!(doc.bytes, b"Invoice #42");
        assert_eq!(doc.format, DocumentFormat::PlainText);
        assert!(!doc.id.is_nil());
    }

    #[test]
    fn documents_get_distinct_ids() {
        let a = Document::from_text("a.txt", "a");
        let b = Document::from_text("b.txt", "b");
        assert_ne!(a.id, b.id);
    }
}
