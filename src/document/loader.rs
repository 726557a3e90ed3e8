//! Document loading seam.
//!
//! The engine consumes documents through `DocumentLoader`; PDF rendering and
//! image OCR live behind this trait in external collaborators. The built-in
//! `TextLoader` handles native text files.

use std::path::Path;

use uuid::Uuid;

use super::format::{detect_format, DocumentFormat};
use super::{Document, DocumentError};

pub trait DocumentLoader: Send + Sync {
    /// Load a file into a `Document` with its text content populated.
    fn load(&self, path: &Path) -> Result<Document, DocumentError>;
}

/// Loader for native text files. Rejects formats that need rendering or OCR.
pub struct TextLoader;

impl DocumentLoader for TextLoader {
    fn load(&self, path: &Path) -> Result<Document, DocumentError> {
        let detection = detect_format(path)?;

        match detection.format {
            DocumentFormat::PlainText => {}
            DocumentFormat::Pdf | DocumentFormat::Image => {
                return Err(DocumentError::UnsupportedFormat(format!(
                    "{} requires an external loader",
                    detection.mime_type
                )));
            }
            DocumentFormat::Unsupported => {
                return Err(DocumentError::UnsupportedFormat(detection.mime_type));
            }
        }

        let bytes = std::fs::read(path)?;
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if text.trim().is_empty() {
            return Err(DocumentError::Empty);
        }

        tracing::debug!(
            path = %path.display(),
            size = bytes.len(),
            "document loaded"
        );

        Ok(Document {
            id: Uuid::new_v4(),
            path: path.to_path_buf(),
            format: detection.format,
            bytes,
            text,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content).unwrap();
        path
    }

    #[test]
    fn loads_plain_text_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "report.txt",
            b"Quarterly report.\n\nRevenue: $4.2M\nGrowth: 12% YoY",
        );

        let doc = TextLoader.load(&path).unwrap();
        assert_eq!(doc.format, DocumentFormat::PlainText);
        assert!(doc.text.contains("Revenue: $4.2M"));
        assert_eq!(doc.path, path);
    }

    #[test]
    fn pdf_needs_external_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "doc.pdf", b"%PDF-1.7 stream data");

        let err = TextLoader.load(&path).unwrap_err();
        match err {
            DocumentError::UnsupportedFormat(msg) => assert!(msg.contains("pdf")),
            other => panic!("expected UnsupportedFormat, got {other:?}"),
        }
    }

    #[test]
    fn binary_file_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "blob.bin", &[0u8, 1, 2, 0xFE]);

        assert!(matches!(
            TextLoader.load(&path),
            Err(DocumentError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn whitespace_only_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "blank.txt", b"   \n\n  \n");

        assert!(matches!(TextLoader.load(&path), Err(DocumentError::Empty)));
    }

    #[test]
    fn missing_file_is_load_error() {
        let result = TextLoader.load(Path::new("/nonexistent/input.txt"));
        assert!(matches!(result, Err(DocumentError::Load(_))));
    }
}
