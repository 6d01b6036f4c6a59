use std::path::Path;

use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            classification::SourceClassification,
            extracted_document::{ExtractedDocument, ExtractionOutcome},
        },
    },
};
use lopdf::Document;
use tracing::{debug, warn};

/// Page delimiter in the concatenated extraction text.
pub const PAGE_DELIMITER: char = '\u{c}';

/// Extracts the text layer of one PDF and upserts it keyed by file path.
///
/// Returns `Ok(None)` for unsupported file types; those are skipped, not
/// failed, so the task completes without retries. Pages whose text layer
/// cannot be decoded are tolerated individually: the page contributes an
/// empty section and the rest of the document still goes through.
pub async fn crack_document(
    file_path: &str,
    relative_directory: &str,
    db: &SurrealDbClient,
) -> Result<Option<(ExtractedDocument, ExtractionOutcome)>, AppError> {
    let path = Path::new(file_path);

    if !is_supported(path) {
        warn!(path = %file_path, "unsupported file type; skipping extraction");
        return Ok(None);
    }

    let bytes = tokio::fs::read(path).await?;
    let file_size_bytes = bytes.len() as u64;

    let (extracted_text, page_count) = extract_pdf_text(bytes).await?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let classification = SourceClassification::from_relative_dir(relative_directory);

    let (document, outcome) = ExtractedDocument::upsert_extraction(
        file_path.to_string(),
        relative_directory.to_string(),
        file_name,
        extracted_text,
        page_count,
        file_size_bytes,
        classification.ruleset_tag,
        classification.document_kind,
        db,
    )
    .await?;

    debug!(
        path = %file_path,
        pages = page_count,
        chars = document.extracted_text.len(),
        changed = outcome == ExtractionOutcome::TextChanged,
        "cracked document"
    );

    Ok(Some((document, outcome)))
}

fn is_supported(path: &Path) -> bool {
    mime_guess::from_path(path)
        .first()
        .is_some_and(|mime| mime.essence_str() == "application/pdf")
}

/// Parses the PDF off the async executor and extracts text page by page,
/// joining pages with form feeds so downstream consumers can still find page
/// boundaries.
async fn extract_pdf_text(bytes: Vec<u8>) -> Result<(String, u32), AppError> {
    tokio::task::spawn_blocking(move || -> Result<(String, u32), AppError> {
        let document = Document::load_mem(&bytes)?;

        let mut page_numbers: Vec<u32> = document.get_pages().keys().copied().collect();
        page_numbers.sort_unstable();
        let page_count = page_numbers.len() as u32;

        let mut sections = Vec::with_capacity(page_numbers.len());
        for page_number in page_numbers {
            match document.extract_text(&[page_number]) {
                Ok(text) => sections.push(text.trim().to_string()),
                Err(err) => {
                    warn!(page = page_number, error = %err, "failed to extract page text");
                    sections.push(String::new());
                }
            }
        }

        Ok((sections.join(&PAGE_DELIMITER.to_string()), page_count))
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn supported_types_are_pdf_only() {
        assert!(is_supported(Path::new("5e/core/phb.pdf")));
        assert!(!is_supported(Path::new("5e/core/phb.epub")));
        assert!(!is_supported(Path::new("5e/core/notes.txt")));
    }

    #[tokio::test]
    async fn malformed_pdf_is_an_error() {
        let result = extract_pdf_text(b"not a pdf at all".to_vec()).await;
        assert!(result.is_err());
    }
}
