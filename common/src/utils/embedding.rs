use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::Arc,
};

use async_openai::{types::CreateEmbeddingRequestArgs, Client};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::{
    error::AppError,
    utils::config::{AppConfig, EmbeddingBackendKind},
};

/// Adapter over the remote embedding model.
///
/// The vector dimensionality is not known statically: it is resolved once per
/// process by inspecting the length of a probe embedding and memoised for the
/// life of the worker. A model change is an operational event handled by
/// restarting the worker, so the cache is never invalidated at runtime.
#[derive(Clone)]
pub struct EmbeddingProvider {
    inner: EmbeddingInner,
    // Shared across clones; the OnceCell guards the first-use race so
    // concurrent callers never issue duplicate probe calls.
    dimension: Arc<OnceCell<usize>>,
}

#[derive(Clone)]
enum EmbeddingInner {
    OpenAI {
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
    },
    Hashed {
        dimension: usize,
    },
}

impl EmbeddingProvider {
    pub fn new_openai(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: String,
    ) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::OpenAI { client, model },
            dimension: Arc::new(OnceCell::new()),
        }
    }

    /// Deterministic token-bucket embeddings, used in tests and offline runs.
    pub fn new_hashed(dimension: usize) -> Self {
        EmbeddingProvider {
            inner: EmbeddingInner::Hashed {
                dimension: dimension.max(1),
            },
            dimension: Arc::new(OnceCell::new()),
        }
    }

    pub fn from_config(
        config: &AppConfig,
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
    ) -> Self {
        match config.embedding_backend {
            EmbeddingBackendKind::OpenAI => {
                Self::new_openai(client, config.embedding_model.clone())
            }
            EmbeddingBackendKind::Hashed => Self::new_hashed(config.hashed_embedding_dimension),
        }
    }

    pub fn backend_label(&self) -> &'static str {
        match self.inner {
            EmbeddingInner::OpenAI { .. } => "openai",
            EmbeddingInner::Hashed { .. } => "hashed",
        }
    }

    pub fn model_code(&self) -> Option<String> {
        match &self.inner {
            EmbeddingInner::OpenAI { model, .. } => Some(model.clone()),
            EmbeddingInner::Hashed { .. } => None,
        }
    }

    /// Resolved vector dimensionality, probing the model on first use.
    pub async fn dimension(&self) -> Result<usize, AppError> {
        let dim = self
            .dimension
            .get_or_try_init(|| async {
                let resolved = match &self.inner {
                    EmbeddingInner::Hashed { dimension } => *dimension,
                    EmbeddingInner::OpenAI { .. } => {
                        let probe = self.request_embeddings(vec!["dimension probe".into()]).await?;
                        probe
                            .first()
                            .map(Vec::len)
                            .ok_or_else(|| {
                                AppError::Embedding(
                                    "embedding model returned no vectors for probe input".into(),
                                )
                            })?
                    }
                };
                if resolved == 0 {
                    return Err(AppError::Embedding(
                        "embedding model reported a zero-length vector".into(),
                    ));
                }
                debug!(dimension = resolved, "resolved embedding dimensionality");
                Ok(resolved)
            })
            .await?;
        Ok(*dim)
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, AppError> {
        let mut vectors = self.embed_batch(vec![text.to_owned()]).await?;
        vectors
            .pop()
            .ok_or_else(|| AppError::Embedding("no embedding returned for input".into()))
    }

    pub async fn embed_batch(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let expected = texts.len();
        let vectors = self.request_embeddings(texts).await?;
        if vectors.len() != expected {
            return Err(AppError::Embedding(format!(
                "embedding model returned {} vectors for {} inputs",
                vectors.len(),
                expected
            )));
        }
        Ok(vectors)
    }

    async fn request_embeddings(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, AppError> {
        match &self.inner {
            EmbeddingInner::Hashed { dimension } => Ok(texts
                .iter()
                .map(|text| hashed_embedding(text, *dimension))
                .collect()),
            EmbeddingInner::OpenAI { client, model } => {
                let request = CreateEmbeddingRequestArgs::default()
                    .model(model.clone())
                    .input(texts)
                    .build()?;

                let response = client.embeddings().create(request).await?;

                if response.data.is_empty() {
                    return Err(AppError::Embedding(
                        "no embedding data received from API".into(),
                    ));
                }

                Ok(response
                    .data
                    .into_iter()
                    .map(|item| item.embedding)
                    .collect())
            }
        }
    }
}

fn hashed_embedding(text: &str, dimension: usize) -> Vec<f32> {
    let dim = dimension.max(1);
    let mut vector = vec![0.0f32; dim];
    if text.is_empty() {
        return vector;
    }

    for token in tokens(text) {
        let idx = bucket(&token, dim);
        if let Some(value) = vector.get_mut(idx) {
            *value += 1.0;
        }
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for value in &mut vector {
            *value /= norm;
        }
    }

    vector
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(|token| token.to_ascii_lowercase())
}

fn bucket(token: &str, dimension: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    token.hash(&mut hasher);
    (hasher.finish() as usize) % dimension
}

/// Cosine distance between two vectors, `1 - cos(a, b)`.
/// Zero-norm inputs are treated as maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}
