use std::sync::Arc;

use common::{
    error::AppError,
    storage::{db::SurrealDbClient, types::embedding_twin::EmbeddingTwin},
    utils::embedding::EmbeddingProvider,
    vector::{derive_point_id, VectorStore},
};
use tokio::sync::OnceCell;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::debug;

/// Writes one embedding into both stores: the ANN store first, then the
/// relational twin. There is no transaction across the two; convergence
/// under queue redelivery is the consistency mechanism, so both writes are
/// keyed upserts.
pub struct DualStoreWriter {
    db: Arc<SurrealDbClient>,
    vector_store: Arc<dyn VectorStore>,
    embedding_provider: EmbeddingProvider,
    // Guards collection creation so concurrent first writers race exactly
    // once per process.
    collection_ready: OnceCell<()>,
}

impl DualStoreWriter {
    pub fn new(
        db: Arc<SurrealDbClient>,
        vector_store: Arc<dyn VectorStore>,
        embedding_provider: EmbeddingProvider,
    ) -> Self {
        Self {
            db,
            vector_store,
            embedding_provider,
            collection_ready: OnceCell::new(),
        }
    }

    async fn ensure_collection_once(&self) -> Result<(), AppError> {
        self.collection_ready
            .get_or_try_init(|| async {
                let dimension = self.embedding_provider.dimension().await?;
                self.vector_store.ensure_collection(dimension).await
            })
            .await?;
        Ok(())
    }

    /// Upserts `(point, twin)` for one owning entity.
    ///
    /// `external_id` feeds the deterministic point id, `owner_id` keys the
    /// relational twin, and `source_id` groups twins for compaction (the
    /// document id for chunks, the game id for conversation messages).
    /// Returns the derived point id.
    pub async fn store_embedding(
        &self,
        external_id: &str,
        owner_id: &str,
        source_id: &str,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> Result<u64, AppError> {
        let point_id = derive_point_id(external_id);

        self.ensure_collection_once().await?;

        let strategy = ExponentialBackoff::from_millis(100).map(jitter).take(3);
        RetryIf::spawn(
            strategy,
            || {
                self.vector_store
                    .upsert_point(point_id, vector.clone(), payload.clone())
            },
            AppError::is_retryable,
        )
        .await?;

        EmbeddingTwin::new(
            owner_id.to_string(),
            source_id.to_string(),
            point_id,
            vector,
        )
        .upsert(&self.db)
        .await?;

        debug!(external_id, point_id, "stored embedding in both stores");
        Ok(point_id)
    }

    /// Removes every point and twin derived from one source document. Run
    /// before re-chunking changed text so a shrunken chunk count cannot
    /// leave orphans in either store.
    pub async fn compact_document(&self, document_id: &str) -> Result<(), AppError> {
        self.vector_store.delete_by_document(document_id).await?;
        EmbeddingTwin::delete_by_source_id(document_id, &self.db).await?;
        debug!(document_id, "compacted stale embeddings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::vector::MemoryVectorStore;
    use serde_json::json;
    use uuid::Uuid;

    async fn writer() -> (DualStoreWriter, Arc<SurrealDbClient>, MemoryVectorStore) {
        let db = Arc::new(
            SurrealDbClient::memory("test_ns", &Uuid::new_v4().to_string())
                .await
                .expect("in-memory surrealdb"),
        );
        let store = MemoryVectorStore::new();
        let writer = DualStoreWriter::new(
            Arc::clone(&db),
            Arc::new(store.clone()),
            EmbeddingProvider::new_hashed(8),
        );
        (writer, db, store)
    }

    #[tokio::test]
    async fn double_delivery_converges_to_one_point_and_one_row() {
        let (writer, db, store) = writer().await;
        let vector = vec![1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];
        let payload = json!({"document_id": "doc1", "chunk_id": "doc1_chunk_0"});

        let first = writer
            .store_embedding(
                "doc1_chunk_0",
                "doc1_chunk_0",
                "doc1",
                vector.clone(),
                payload.clone(),
            )
            .await
            .expect("first write");
        let second = writer
            .store_embedding("doc1_chunk_0", "doc1_chunk_0", "doc1", vector, payload)
            .await
            .expect("second write");

        assert_eq!(first, second);
        assert_eq!(store.point_count().await.expect("count"), 1);
        assert_eq!(
            EmbeddingTwin::count_by_source_id("doc1", &db)
                .await
                .expect("twins"),
            1
        );
    }

    #[tokio::test]
    async fn compaction_clears_both_stores_for_one_document() {
        let (writer, db, store) = writer().await;
        let vector = vec![0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0];

        writer
            .store_embedding(
                "doc1_chunk_0",
                "doc1_chunk_0",
                "doc1",
                vector.clone(),
                json!({"document_id": "doc1"}),
            )
            .await
            .expect("write");
        writer
            .store_embedding(
                "doc2_chunk_0",
                "doc2_chunk_0",
                "doc2",
                vector,
                json!({"document_id": "doc2"}),
            )
            .await
            .expect("write");

        writer.compact_document("doc1").await.expect("compact");

        assert_eq!(store.point_count().await.expect("count"), 1);
        assert_eq!(
            EmbeddingTwin::count_by_source_id("doc1", &db)
                .await
                .expect("twins"),
            0
        );
        assert_eq!(
            EmbeddingTwin::count_by_source_id("doc2", &db)
                .await
                .expect("twins"),
            1
        );
    }
}
