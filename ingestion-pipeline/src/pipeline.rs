use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            extracted_document::ExtractedDocument,
            pipeline_message::PipelineMessage,
            pipeline_task::{PipelineTask, TaskErrorInfo},
        },
    },
    utils::embedding::EmbeddingProvider,
    vector::VectorStore,
};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::{
    chunker::{chunk_document, ChunkerConfig},
    cracker::crack_document,
    embedder::DualStoreWriter,
};

const RETRY_BASE_DELAY_SECS: u64 = 30;
const RETRY_MAX_DELAY_SECS: u64 = 900;
const RETRY_BACKOFF_CAP_EXPONENT: u32 = 5;

/// Stage dispatcher shared by every worker in the process. Holds the
/// relational store, the embedding provider, and the dual-store writer;
/// which messages actually arrive depends on the stage each worker claims
/// from.
pub struct IngestionPipeline {
    db: Arc<SurrealDbClient>,
    embedding_provider: EmbeddingProvider,
    writer: DualStoreWriter,
    chunker_config: ChunkerConfig,
}

impl IngestionPipeline {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedding_provider: EmbeddingProvider,
        vector_store: Arc<dyn VectorStore>,
        chunker_config: ChunkerConfig,
    ) -> Self {
        let writer = DualStoreWriter::new(
            Arc::clone(&db),
            vector_store,
            embedding_provider.clone(),
        );

        Self {
            db,
            embedding_provider,
            writer,
            chunker_config,
        }
    }

    /// Drives one claimed task through its stage handler and records the
    /// outcome on the queue row: success, retry with backoff, or dead
    /// letter once attempts are exhausted. Validation failures never retry.
    #[tracing::instrument(
        skip_all,
        fields(
            task_id = %task.id,
            stage = %task.stage,
            attempt = task.attempts,
            worker_id = task.worker_id.as_deref().unwrap_or("unknown-worker"),
        )
    )]
    pub async fn process_task(&self, task: PipelineTask) -> Result<(), AppError> {
        let processing_task = task.mark_processing(&self.db).await?;
        let message = processing_task.message.clone();

        match self.dispatch(message).await {
            Ok(()) => {
                processing_task.mark_succeeded(&self.db).await?;
                info!(
                    task_id = %processing_task.id,
                    attempt = processing_task.attempts,
                    "pipeline task succeeded"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let retryable = !matches!(err, AppError::Validation(_));
                let error_info = TaskErrorInfo {
                    code: None,
                    message: reason.clone(),
                };

                if retryable && processing_task.can_retry() {
                    let delay = retry_delay(processing_task.attempts);
                    processing_task
                        .mark_failed(error_info, delay, &self.db)
                        .await?;
                    warn!(
                        task_id = %processing_task.id,
                        attempt = processing_task.attempts,
                        retry_in_secs = delay.as_secs(),
                        "pipeline task failed; scheduled retry"
                    );
                } else {
                    let failed_task = processing_task
                        .mark_failed(error_info.clone(), Duration::from_secs(0), &self.db)
                        .await?;
                    failed_task.mark_dead_letter(error_info, &self.db).await?;
                    warn!(
                        task_id = %failed_task.id,
                        attempt = failed_task.attempts,
                        "pipeline task failed; moved to dead letter queue"
                    );
                }

                Err(AppError::Processing(reason))
            }
        }
    }

    async fn dispatch(&self, message: PipelineMessage) -> Result<(), AppError> {
        match message {
            PipelineMessage::CrackDocument {
                file_path,
                relative_directory,
            } => self.handle_crack(&file_path, &relative_directory).await,
            PipelineMessage::DocumentReadyForChunking { document_id, .. } => {
                self.handle_chunking(&document_id).await
            }
            PipelineMessage::ChunkReadyForEmbedding {
                chunk_id,
                chunk_index,
                chunk_text,
                document_id,
                file_name,
                file_path,
                relative_directory,
                file_size,
                page_count,
                cracked_at,
            } => {
                self.handle_chunk_embedding(
                    &chunk_id,
                    chunk_index,
                    &chunk_text,
                    &document_id,
                    &file_name,
                    &file_path,
                    &relative_directory,
                    file_size,
                    page_count,
                    cracked_at,
                )
                .await
            }
            PipelineMessage::ConversationMessageReadyForEmbedding {
                message_id,
                game_id,
                text,
                role,
                created_at,
            } => {
                self.handle_message_embedding(&message_id, &game_id, &text, &role, created_at)
                    .await
            }
        }
    }

    /// Cracking stage: extract text, persist it, and hand any document that
    /// is not fully processed to the chunking queue. Stale-embedding cleanup
    /// is deferred to the chunking stage, which owns the fan-out.
    async fn handle_crack(
        &self,
        file_path: &str,
        relative_directory: &str,
    ) -> Result<(), AppError> {
        let Some((document, _)) =
            crack_document(file_path, relative_directory, self.db.as_ref()).await?
        else {
            return Ok(());
        };

        if document.is_fully_processed {
            debug!(path = %file_path, "extraction unchanged and fully processed; no downstream work");
            return Ok(());
        }

        PipelineTask::enqueue(
            PipelineMessage::DocumentReadyForChunking {
                document_id: document.id,
                file_path: document.file_path,
                file_name: document.file_name,
                relative_directory: document.relative_directory,
                file_size: document.file_size_bytes,
                page_count: document.page_count,
                cracked_at: document.extracted_at,
                document_kind: document.document_kind,
                ruleset_tag: document.ruleset_tag,
            },
            &self.db,
        )
        .await?;

        Ok(())
    }

    /// Chunking stage: compact the previous revision's embeddings, split the
    /// stored text, arm the completion counter, and fan out one embedding
    /// task per surviving chunk.
    ///
    /// Compaction runs unconditionally on this task rather than at crack
    /// time: the extraction upsert and the cleanup are separate writes, and
    /// only work attached to a queue task is redelivered after a crash
    /// between them. Delete and fan-out are both keyed, so a redelivered
    /// chunking task converges to the same end state.
    async fn handle_chunking(&self, document_id: &str) -> Result<(), AppError> {
        let document: ExtractedDocument = self
            .db
            .get_item(document_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("extracted_document:{document_id}")))?;

        self.writer.compact_document(document_id).await?;

        let chunks = chunk_document(
            document_id,
            &document.extracted_text,
            &self.embedding_provider,
            &self.chunker_config,
        )
        .await?;

        ExtractedDocument::begin_chunk_tracking(document_id, chunks.len() as u32, &self.db)
            .await?;

        if chunks.is_empty() {
            info!(document_id, "no chunks survived; document trivially complete");
            return Ok(());
        }

        for chunk in chunks {
            PipelineTask::enqueue(
                PipelineMessage::ChunkReadyForEmbedding {
                    chunk_id: chunk.chunk_id,
                    chunk_index: chunk.ordinal,
                    chunk_text: chunk.text,
                    document_id: document.id.clone(),
                    file_name: document.file_name.clone(),
                    file_path: document.file_path.clone(),
                    relative_directory: document.relative_directory.clone(),
                    file_size: document.file_size_bytes,
                    page_count: document.page_count,
                    cracked_at: document.extracted_at,
                },
                &self.db,
            )
            .await?;
        }

        Ok(())
    }

    /// Embedding stage for document chunks: embed, dual-store write, then
    /// drain one slot from the owning document's pending counter.
    #[allow(clippy::too_many_arguments)]
    async fn handle_chunk_embedding(
        &self,
        chunk_id: &str,
        chunk_index: u32,
        chunk_text: &str,
        document_id: &str,
        file_name: &str,
        file_path: &str,
        relative_directory: &str,
        file_size: u64,
        page_count: u32,
        cracked_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let vector = self.embedding_provider.embed(chunk_text).await?;

        let payload = json!({
            "chunk_id": chunk_id,
            "chunk_index": chunk_index,
            "text": chunk_text,
            "document_id": document_id,
            "file_name": file_name,
            "file_path": file_path,
            "relative_directory": relative_directory,
            "file_size": file_size,
            "page_count": page_count,
            "cracked_at": cracked_at.to_rfc3339(),
        });

        self.writer
            .store_embedding(chunk_id, chunk_id, document_id, vector, payload)
            .await?;

        ExtractedDocument::complete_chunk(document_id, &self.db).await?;

        Ok(())
    }

    /// Embedding stage for live conversation messages; same dual-store
    /// write, keyed by message id and grouped under the game id.
    async fn handle_message_embedding(
        &self,
        message_id: &str,
        game_id: &str,
        text: &str,
        role: &str,
        created_at: DateTime<Utc>,
    ) -> Result<(), AppError> {
        let vector = self.embedding_provider.embed(text).await?;

        let payload = json!({
            "message_id": message_id,
            "game_id": game_id,
            "text": text,
            "role": role,
            "created_at": created_at.to_rfc3339(),
        });

        self.writer
            .store_embedding(message_id, message_id, game_id, vector, payload)
            .await?;

        Ok(())
    }
}

/// Capped exponential backoff for queue retries: 30s, 60s, ... up to 15min.
fn retry_delay(attempt: u32) -> Duration {
    let capped_attempt = attempt.saturating_sub(1).min(RETRY_BACKOFF_CAP_EXPONENT);
    let multiplier = 2_u64.saturating_pow(capped_attempt);
    let delay = RETRY_BASE_DELAY_SECS.saturating_mul(multiplier);

    Duration::from_secs(delay.min(RETRY_MAX_DELAY_SECS))
}
