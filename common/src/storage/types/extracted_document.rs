use sha2::{Digest, Sha256};
use surrealdb::sql::Datetime as SurrealDatetime;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

use super::classification::DocumentKind;

stored_object!(ExtractedDocument, "extracted_document", {
    file_path: String,
    relative_directory: String,
    file_name: String,
    extracted_text: String,
    page_count: u32,
    file_size_bytes: u64,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    extracted_at: DateTime<Utc>,
    ruleset_tag: String,
    document_kind: DocumentKind,
    is_fully_processed: bool,
    // Chunks still awaiting embedding for the current text. NONE until the
    // chunking stage has run for this text revision.
    pending_chunks: Option<u32>
});

/// Outcome of an extraction upsert: whether the stored text actually changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionOutcome {
    TextChanged,
    TextUnchanged,
}

impl ExtractedDocument {
    pub fn stable_id(file_path: &str) -> String {
        format!("{:x}", Sha256::digest(file_path.as_bytes()))
    }

    pub async fn find_by_path(
        file_path: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(&Self::stable_id(file_path)).await?)
    }

    /// True when a prior extraction succeeded and produced non-empty text.
    /// The scanner uses this to distinguish "done" from "partially failed"
    /// for files whose hash has not moved.
    pub async fn has_successful_extraction(
        file_path: &str,
        db: &SurrealDbClient,
    ) -> Result<bool, AppError> {
        Ok(Self::find_by_path(file_path, db)
            .await?
            .is_some_and(|doc| !doc.extracted_text.trim().is_empty()))
    }

    /// Upserts the extraction keyed by file path. Content-level change
    /// detection is independent of the file hash: whenever the stored text
    /// differs from the new text, `is_fully_processed` is forced back to
    /// false so the document is re-chunked.
    #[allow(clippy::too_many_arguments)]
    pub async fn upsert_extraction(
        file_path: String,
        relative_directory: String,
        file_name: String,
        extracted_text: String,
        page_count: u32,
        file_size_bytes: u64,
        ruleset_tag: String,
        document_kind: DocumentKind,
        db: &SurrealDbClient,
    ) -> Result<(Self, ExtractionOutcome), AppError> {
        let existing = Self::find_by_path(&file_path, db).await?;
        let now = Utc::now();

        let outcome = match &existing {
            Some(doc) if doc.extracted_text == extracted_text => ExtractionOutcome::TextUnchanged,
            _ => ExtractionOutcome::TextChanged,
        };

        let (created_at, is_fully_processed, pending_chunks) = match (&existing, outcome) {
            (Some(doc), ExtractionOutcome::TextUnchanged) => {
                (doc.created_at, doc.is_fully_processed, doc.pending_chunks)
            }
            (Some(doc), ExtractionOutcome::TextChanged) => (doc.created_at, false, None),
            (None, _) => (now, false, None),
        };

        let document = Self {
            id: Self::stable_id(&file_path),
            created_at,
            updated_at: now,
            file_path,
            relative_directory,
            file_name,
            extracted_text,
            page_count,
            file_size_bytes,
            extracted_at: now,
            ruleset_tag,
            document_kind,
            is_fully_processed,
            pending_chunks,
        };

        db.upsert_item(document.clone()).await?;
        Ok((document, outcome))
    }

    /// Arms the completion counter for a freshly chunked text revision.
    /// A document with zero surviving chunks is trivially complete.
    pub async fn begin_chunk_tracking(
        document_id: &str,
        chunk_count: u32,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET pending_chunks = $count,
                     is_fully_processed = $complete,
                     updated_at = $now",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", document_id.to_string()))
            .bind(("count", chunk_count))
            .bind(("complete", chunk_count == 0))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;
        Ok(())
    }

    /// Records one embedded chunk. A single guarded UPDATE decrements the
    /// counter (clamped at zero) and flips `is_fully_processed` when the
    /// last pending chunk drains. Safe under redelivery: repeated calls for
    /// an already-drained counter leave the row converged.
    pub async fn complete_chunk(document_id: &str, db: &SurrealDbClient) -> Result<(), AppError> {
        db.client
            .query(
                "UPDATE type::thing($table, $id)
                 SET is_fully_processed = pending_chunks != NONE AND pending_chunks <= 1,
                     pending_chunks = math::max([pending_chunks - 1, 0]),
                     updated_at = $now
                 WHERE pending_chunks != NONE",
            )
            .bind(("table", Self::table_name()))
            .bind(("id", document_id.to_string()))
            .bind(("now", SurrealDatetime::from(Utc::now())))
            .await?;
        Ok(())
    }
}
