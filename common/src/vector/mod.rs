use async_trait::async_trait;

use crate::error::AppError;

pub mod memory;
pub mod point;
pub mod qdrant;

pub use memory::MemoryVectorStore;
pub use point::derive_point_id;
pub use qdrant::QdrantVectorStore;

/// Seam over the ANN store. Workers share one store handle per process; the
/// handle is a process-scoped shared resource, not a per-call factory, and
/// callers must not assume independent lifetimes.
///
/// All writes are keyed upserts: calling any operation twice with the same
/// arguments converges to the same store state, which is what the
/// at-least-once queue relies on.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Creates the collection sized to `dimension` with cosine distance if
    /// it does not exist yet; a pre-existing collection is a no-op.
    async fn ensure_collection(&self, dimension: usize) -> Result<(), AppError>;

    /// Upserts one point. Payload must be a JSON object.
    async fn upsert_point(
        &self,
        point_id: u64,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> Result<(), AppError>;

    /// Deletes every point whose payload `document_id` matches. Used for
    /// compaction before re-chunking an edited document.
    async fn delete_by_document(&self, document_id: &str) -> Result<(), AppError>;

    async fn point_count(&self) -> Result<u64, AppError>;
}
