//! PDF text extraction.
//!
//! A PDF becomes one [`Document`] per page, in page order. Pages without extractable text still
//! produce a (blank) document so that page labels stay aligned with the source file.

use lopdf::Document as PdfDocument;
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading a PDF.
#[derive(Debug, Error)]
pub enum DocumentError {
    /// The file could not be read from disk.
    #[error("Failed to read {path}: {source}")]
    Io {
        /// Path that failed to load.
        path: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },
    /// The bytes were not a PDF the parser understands.
    #[error("Failed to parse PDF '{file_name}': {message}")]
    Parse {
        /// Name of the offending file.
        file_name: String,
        /// Parser diagnostic.
        message: String,
    },
}

/// Source metadata attached to each extracted document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentMetadata {
    /// Name of the file the text came from.
    pub file_name: String,
    /// 1-based page number rendered as text.
    pub page_label: String,
}

/// One unit of extracted text ready for indexing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Extracted page text.
    pub text: String,
    /// Where the text came from.
    pub metadata: DocumentMetadata,
}

/// Load a PDF from disk.
pub fn load_path(path: &Path) -> Result<Vec<Document>, DocumentError> {
    let bytes = std::fs::read(path).map_err(|source| DocumentError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());
    load_bytes(&bytes, &file_name)
}

/// Load a PDF held in memory, tagging every page with `file_name`.
pub fn load_bytes(bytes: &[u8], file_name: &str) -> Result<Vec<Document>, DocumentError> {
    let parse_error = |message: String| DocumentError::Parse {
        file_name: file_name.to_string(),
        message,
    };

    let pdf = PdfDocument::load_mem(bytes).map_err(|error| parse_error(error.to_string()))?;

    let mut documents = Vec::new();
    for page_no in pdf.get_pages().into_keys() {
        let text = match pdf.extract_text(&[page_no]) {
            Ok(text) => text,
            Err(error) => {
                tracing::warn!(file_name, page = page_no, error = %error, "Page text extraction failed");
                String::new()
            }
        };
        documents.push(Document {
            text,
            metadata: DocumentMetadata {
                file_name: file_name.to_string(),
                page_label: page_no.to_string(),
            },
        });
    }

    tracing::debug!(file_name, pages = documents.len(), "Extracted PDF text");
    Ok(documents)
}


#[cfg(test)]
mod tests {
    use super::testing::pdf_with_pages;
    use super::*;

    #[test]
    fn load_bytes_yields_one_document_per_page() {
        let pdf = pdf_with_pages(&["Revenue grew", "Costs fell"]);
        let documents = load_bytes(&pdf, "report.pdf").expect("parse pdf");

        assert_eq!(documents.len(), 2);
        assert!(documents[0].text.contains("Revenue grew"));
        assert!(documents[1].text.contains("Costs fell"));
        assert_eq!(documents[0].metadata.file_name, "report.pdf");
        assert_eq!(documents[0].metadata.page_label, "1");
        assert_eq!(documents[1].metadata.page_label, "2");
    }

    #[test]
    fn load_bytes_rejects_non_pdf_input() {
        let error = load_bytes(b"definitely not a pdf", "notes.pdf").expect_err("parse failure");
        assert!(matches!(error, DocumentError::Parse { ref file_name, .. } if file_name == "notes.pdf"));
    }

    #[test]
    fn load_path_reads_from_disk() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("summary.pdf");
        std::fs::write(&path, pdf_with_pages(&["Page one"])).expect("write pdf");

        let documents = load_path(&path).expect("load from disk");
        assert_eq!(documents.len(), 1);
        assert_eq!(documents[0].metadata.file_name, "summary.pdf");
    }

    #[test]
    fn load_path_reports_missing_file() {
        let error = load_path(Path::new("/nonexistent/finfunc.pdf")).expect_err("missing file");
        assert!(matches!(error, DocumentError::Io { .. }));
    }
}
