//! Text extraction for uploaded source documents.
//!
//! Only `.pdf` and `.txt` are accepted by the dataset API; anything else is
//! reported as unsupported and skipped by the builder.

use std::path::Path;

pub const MIME_PDF: &str = "application/pdf";
pub const MIME_TEXT: &str = "text/plain";

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("PDF extraction failed: {0}")]
    Pdf(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Map a file name to the content type the builder knows how to read.
pub fn content_type_for(file_name: &str) -> Option<&'static str> {
    let lower = file_name.to_ascii_lowercase();
    if lower.ends_with(".pdf") {
        Some(MIME_PDF)
    } else if lower.ends_with(".txt") {
        Some(MIME_TEXT)
    } else {
        None
    }
}

/// Read a source file and return its plain UTF-8 text.
pub fn extract_file(path: &Path) -> Result<String, ExtractError> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let content_type = content_type_for(&name)
        .ok_or_else(|| ExtractError::UnsupportedFileType(name.clone()))?;

    let bytes = std::fs::read(path).map_err(|source| ExtractError::Io {
        path: path.display().to_string(),
        source,
    })?;

    extract_text(&bytes, content_type)
}

pub fn extract_text(bytes: &[u8], content_type: &str) -> Result<String, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf(bytes),
        MIME_TEXT => Ok(String::from_utf8_lossy(bytes).into_owned()),
        other => Err(ExtractError::UnsupportedFileType(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_type_by_extension() {
        assert_eq!(content_type_for("Paket.PDF"), Some(MIME_PDF));
        assert_eq!(content_type_for("harga.txt"), Some(MIME_TEXT));
        assert_eq!(content_type_for("foto.jpg"), None);
        assert_eq!(content_type_for("pdf"), None);
    }

    #[test]
    fn test_plain_text_lossy() {
        let text = extract_text(b"Sewa jeep \xff Bromo", MIME_TEXT).unwrap();
        assert!(text.starts_with("Sewa jeep"));
        assert!(text.ends_with("Bromo"));
    }

    #[test]
    fn test_unsupported_rejected() {
        let err = extract_text(b"", "image/png").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedFileType(_)));
    }

    #[test]
    fn test_garbage_pdf_is_error_not_panic() {
        let err = extract_text(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
    }

    #[test]
    fn test_extract_file_reads_txt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("info.txt");
        std::fs::write(&path, "Open trip Rp 350.000 / orang").unwrap();
        assert_eq!(extract_file(&path).unwrap(), "Open trip Rp 350.000 / orang");
    }
}
