use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::AppError;

use super::VectorStore;

#[derive(Debug, Clone)]
pub struct MemoryPoint {
    pub vector: Vec<f32>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Default)]
struct MemoryInner {
    dimension: Option<usize>,
    points: HashMap<u64, MemoryPoint>,
}

/// In-memory ANN store for tests. Mirrors the cosine-distance contract of
/// the real store by normalizing vectors on write.
#[derive(Debug, Default, Clone)]
pub struct MemoryVectorStore {
    inner: Arc<RwLock<MemoryInner>>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get_point(&self, point_id: u64) -> Option<MemoryPoint> {
        self.inner.read().await.points.get(&point_id).cloned()
    }

    pub async fn payloads(&self) -> Vec<serde_json::Value> {
        self.inner
            .read()
            .await
            .points
            .values()
            .map(|p| p.payload.clone())
            .collect()
    }

    pub async fn dimension(&self) -> Option<usize> {
        self.inner.read().await.dimension
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }
    vector
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn ensure_collection(&self, dimension: usize) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        match inner.dimension {
            None => {
                inner.dimension = Some(dimension);
                Ok(())
            }
            Some(existing) if existing == dimension => Ok(()),
            Some(existing) => Err(AppError::Validation(format!(
                "collection already sized to {existing}, got {dimension}"
            ))),
        }
    }

    async fn upsert_point(
        &self,
        point_id: u64,
        vector: Vec<f32>,
        payload: serde_json::Value,
    ) -> Result<(), AppError> {
        if !payload.is_object() {
            return Err(AppError::Validation(
                "point payload must be an object".to_string(),
            ));
        }

        let mut inner = self.inner.write().await;
        if let Some(dimension) = inner.dimension {
            if vector.len() != dimension {
                return Err(AppError::Validation(format!(
                    "vector has {} dimensions, collection expects {dimension}",
                    vector.len()
                )));
            }
        }

        inner.points.insert(
            point_id,
            MemoryPoint {
                vector: normalize(vector),
                payload,
            },
        );

        Ok(())
    }

    async fn delete_by_document(&self, document_id: &str) -> Result<(), AppError> {
        let mut inner = self.inner.write().await;
        inner
            .points
            .retain(|_, point| point.payload.get("document_id").and_then(|v| v.as_str()) != Some(document_id));

        Ok(())
    }

    async fn point_count(&self) -> Result<u64, AppError> {
        Ok(self.inner.read().await.points.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn upsert_with_same_id_overwrites() {
        let store = MemoryVectorStore::new();
        store.ensure_collection(3).await.unwrap();

        store
            .upsert_point(7, vec![1.0, 0.0, 0.0], json!({"document_id": "doc1"}))
            .await
            .unwrap();
        store
            .upsert_point(7, vec![0.0, 1.0, 0.0], json!({"document_id": "doc1"}))
            .await
            .unwrap();

        assert_eq!(store.point_count().await.unwrap(), 1);
        let point = store.get_point(7).await.unwrap();
        assert_eq!(point.vector, vec![0.0, 1.0, 0.0]);
    }

    #[tokio::test]
    async fn vectors_are_normalized_on_write() {
        let store = MemoryVectorStore::new();
        store.ensure_collection(2).await.unwrap();

        store
            .upsert_point(1, vec![3.0, 4.0], json!({"document_id": "doc1"}))
            .await
            .unwrap();

        let point = store.get_point(1).await.unwrap();
        let norm: f32 = point.vector.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn delete_by_document_only_touches_that_document() {
        let store = MemoryVectorStore::new();
        store.ensure_collection(2).await.unwrap();

        store
            .upsert_point(1, vec![1.0, 0.0], json!({"document_id": "doc1"}))
            .await
            .unwrap();
        store
            .upsert_point(2, vec![0.0, 1.0], json!({"document_id": "doc1"}))
            .await
            .unwrap();
        store
            .upsert_point(3, vec![1.0, 1.0], json!({"document_id": "doc2"}))
            .await
            .unwrap();

        store.delete_by_document("doc1").await.unwrap();

        assert_eq!(store.point_count().await.unwrap(), 1);
        assert!(store.get_point(3).await.is_some());
    }

    #[tokio::test]
    async fn dimension_mismatch_is_rejected() {
        let store = MemoryVectorStore::new();
        store.ensure_collection(3).await.unwrap();

        assert!(store.ensure_collection(3).await.is_ok());
        assert!(store.ensure_collection(4).await.is_err());
        assert!(store
            .upsert_point(1, vec![1.0, 0.0], json!({"document_id": "doc1"}))
            .await
            .is_err());
    }
}
