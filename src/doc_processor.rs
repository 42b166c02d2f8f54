use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;

/// Separator placed between consecutive pages of extracted text.
const PAGE_SEPARATOR: &str = "\n\n";

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("PDF parse error: {0}")]
    Parse(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Extract the plain text of every page, in page order, joined by a blank line.
///
/// A document without any text (a scanned PDF, say) extracts to an empty
/// string rather than an error.
///
/// Works entirely on the in-memory buffer. `pdf_extract` can panic on
/// malformed input instead of returning an error, so the call runs behind
/// `catch_unwind` and a panic is reported as [`ExtractionError::Parse`].
pub fn extract(bytes: &[u8]) -> Result<String, ExtractionError> {
    let pages = extract_pages(bytes)?;
    let trimmed: Vec<&str> = pages.iter().map(|page| page.trim()).collect();
    let text = trimmed.join(PAGE_SEPARATOR).trim().to_string();

    tracing::debug!(pages = pages.len(), chars = text.chars().count(), "extracted PDF text");
    Ok(text)
}

/// Read a PDF from disk and extract its text.
pub fn extract_file(path: &Path) -> Result<String, ExtractionError> {
    let bytes = fs::read(path).map_err(|source| ExtractionError::Io {
        path: path.display().to_string(),
        source,
    })?;
    extract(&bytes)
}

fn extract_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractionError> {
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match result {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ExtractionError::Parse(e.to_string())),
        Err(_) => Err(ExtractionError::Parse(
            "extraction panicked (malformed document)".into(),
        )),
    }
}
