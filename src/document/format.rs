use std::io::Read;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::DocumentError;

/// Broad document formats the pipeline distinguishes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    PlainText,
    Pdf,
    Image,
    Unsupported,
}

impl DocumentFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PlainText => "plain_text",
            Self::Pdf => "pdf",
            Self::Image => "image",
            Self::Unsupported => "unsupported",
        }
    }

    /// Formats with no native text layer need a vision-capable model.
    pub fn needs_vision(&self) -> bool {
        matches!(self, Self::Image)
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Unsupported)
    }
}

/// Result of format detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatDetection {
    pub mime_type: String,
    pub format: DocumentFormat,
    pub file_size_bytes: u64,
}

const MAX_FILE_SIZE: u64 = 100 * 1024 * 1024; // 100MB

/// Detect file format from magic bytes (NOT file extensions).
/// Magic bytes don't lie — extensions can be wrong.
pub fn detect_format(path: &Path) -> Result<FormatDetection, DocumentError> {
    let metadata = std::fs::metadata(path)?;
    let file_size = metadata.len();

    if file_size > MAX_FILE_SIZE {
        return Ok(FormatDetection {
            mime_type: "unknown".into(),
            format: DocumentFormat::Unsupported,
            file_size_bytes: file_size,
        });
    }

    // Read first 16 bytes for magic number detection
    let mut file = std::fs::File::open(path)?;
    let mut header = [0u8; 16];
    let bytes_read = file.read(&mut header)?;

    let (mime_type, format) = match &header[..bytes_read.min(8)] {
        // PDF: starts with %PDF
        [0x25, 0x50, 0x44, 0x46, ..] => ("application/pdf".to_string(), DocumentFormat::Pdf),
        // JPEG: starts with FF D8 FF
        [0xFF, 0xD8, 0xFF, ..] => ("image/jpeg".to_string(), DocumentFormat::Image),
        // PNG: starts with 89 50 4E 47
        [0x89, 0x50, 0x4E, 0x47, ..] => ("image/png".to_string(), DocumentFormat::Image),
        // TIFF: little-endian (49 49 2A 00) or big-endian (4D 4D 00 2A)
        [0x49, 0x49, 0x2A, 0x00, ..] | [0x4D, 0x4D, 0x00, 0x2A, ..] => {
            ("image/tiff".to_string(), DocumentFormat::Image)
        }
        _ => {
            // Try as plain text (UTF-8 validation on first chunk)
            if is_likely_text(path)? {
                ("text/plain".to_string(), DocumentFormat::PlainText)
            } else {
                (
                    "application/octet-stream".to_string(),
                    DocumentFormat::Unsupported,
                )
            }
        }
    };

    Ok(FormatDetection {
        mime_type,
        format,
        file_size_bytes: file_size,
    })
}

/// Check whether the first chunk of the file decodes as UTF-8 text with a
/// reasonable share of printable characters.
fn is_likely_text(path: &Path) -> Result<bool, DocumentError> {
    let file = std::fs::File::open(path)?;
    let mut buffer = Vec::new();
    let mut limited = file.take(8 * 1024);
    limited.read_to_end(&mut buffer)?;

    if buffer.is_empty() {
        return Ok(false);
    }

    let Ok(text) = std::str::from_utf8(&buffer) else {
        return Ok(false);
    };

    let control = text
        .chars()
        .filter(|c| c.is_control() && *c != '\n' && *c != '\r' && *c != '\t')
        .count();

    Ok(control * 20 < text.chars().count())
}
