use surrealdb::sql::Datetime as SurrealDatetime;

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

stored_object!(EmbeddingTwin, "embedding_twin", {
    // Document id for chunks, game id for conversation messages.
    source_id: String,
    point_id: String,
    embedding: Vec<f32>,
    #[serde(serialize_with = "serialize_datetime", deserialize_with = "deserialize_datetime")]
    embedded_at: DateTime<Utc>
});

impl EmbeddingTwin {
    /// One row per owning entity, keyed by the owner's id and overwritten on
    /// re-embedding. The stored vector is the raw model output; the ANN
    /// store's normalised copy legitimately diverges from it.
    pub fn new(owner_id: String, source_id: String, point_id: u64, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            id: owner_id,
            created_at: now,
            updated_at: now,
            source_id,
            point_id: point_id.to_string(),
            embedding,
            embedded_at: now,
        }
    }

    pub async fn upsert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.upsert_item(self).await?;
        Ok(())
    }

    pub async fn find_by_owner(
        owner_id: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<Self>, AppError> {
        Ok(db.get_item::<Self>(owner_id).await?)
    }

    /// Removes every twin derived from one source document. Run before
    /// re-chunking so a shrunken chunk count cannot leave orphan rows.
    pub async fn delete_by_source_id(
        source_id: &str,
        db: &SurrealDbClient,
    ) -> Result<(), AppError> {
        db.client
            .query("DELETE type::table($table) WHERE source_id = $source_id")
            .bind(("table", Self::table_name()))
            .bind(("source_id", source_id.to_string()))
            .await?;
        Ok(())
    }

    pub async fn count_by_source_id(
        source_id: &str,
        db: &SurrealDbClient,
    ) -> Result<usize, AppError> {
        let rows: Vec<Self> = db
            .client
            .query("SELECT * FROM type::table($table) WHERE source_id = $source_id")
            .bind(("table", Self::table_name()))
            .bind(("source_id", source_id.to_string()))
            .await?
            .take(0)?;
        Ok(rows.len())
    }
}
