use async_trait::async_trait;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter,
    PointStruct, UpsertPointsBuilder, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use tracing::{debug, info};

use crate::error::AppError;

use super::VectorStore;

/// Qdrant-backed ANN store. One gRPC client per worker process.
pub struct QdrantVectorStore {
    client: Qdrant,
    collection_name: String,
}

impl QdrantVectorStore {
    pub fn new(
        url: &str,
        api_key: Option<String>,
        collection_name: String,
    ) -> Result<Self, AppError> {
        info!(%url, collection = %collection_name, "connecting to qdrant");

        let mut client_config = qdrant_client::config::QdrantConfig::from_url(url);
        if let Some(api_key) = &api_key {
            client_config.set_api_key(api_key);
        }
        let client = Qdrant::new(client_config)?;

        Ok(Self {
            client,
            collection_name,
        })
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }
}

#[async_trait]
impl VectorStore for QdrantVectorStore {
    async fn ensure_collection(&self, dimension: usize) -> Result<(), AppError> {
        if self.client.collection_exists(&self.collection_name).await? {
            return Ok(());
        }

        info!(
            collection = %self.collection_name,
            dimension,
            "creating qdrant collection"
        );

        let result = self
            .client
            .create_collection(
                CreateCollectionBuilder::new(&self.collection_name)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
            )
            .await;

        match result {
            Ok(_) => Ok(()),
            // Another replica can win the creation race between our
            // existence check and the create call.
            Err(err) if err.to_string().contains("already exists") => Ok(()),
            Err(err) => Err(AppError::from(err)),
        }
    }

    async fn upsert_point(
        &self,
        point_id: u64,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> Result<(), AppError> {
        let payload = Payload::try_from(payload)
            .map_err(|err| AppError::Validation(format!("point payload must be an object: {err}")))?;

        let point = PointStruct::new(point_id, vector, payload);

        debug!(point_id, collection = %self.collection_name, "upserting point");
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.collection_name, vec![point]).wait(true))
            .await?;

        Ok(())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<(), AppError> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(&self.collection_name)
                    .points(Filter::must([Condition::matches(
                        "document_id",
                        document_id.to_string(),
                    )]))
                    .wait(true),
            )
            .await?;

        Ok(())
    }

    async fn point_count(&self) -> Result<u64, AppError> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.collection_name).exact(true))
            .await?;

        Ok(response.result.map_or(0, |r| r.count))
    }
}
