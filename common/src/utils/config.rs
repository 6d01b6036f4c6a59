use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingBackendKind {
    OpenAI,
    Hashed,
}

fn default_embedding_backend() -> EmbeddingBackendKind {
    EmbeddingBackendKind::OpenAI
}

/// Breakpoint policy for the semantic chunker. `percentile` derives the
/// boundary threshold from the observed distance distribution; `absolute`
/// uses the configured amount directly as a cosine distance.
#[derive(Clone, Copy, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BreakpointPolicy {
    Percentile,
    Absolute,
}

fn default_breakpoint_policy() -> BreakpointPolicy {
    BreakpointPolicy::Percentile
}

#[derive(Clone, Deserialize, Debug)]
pub struct AppConfig {
    pub surrealdb_address: String,
    pub surrealdb_username: String,
    pub surrealdb_password: String,
    pub surrealdb_namespace: String,
    pub surrealdb_database: String,
    pub openai_api_key: String,
    #[serde(default = "default_base_url")]
    pub openai_base_url: String,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
    #[serde(default = "default_embedding_backend")]
    pub embedding_backend: EmbeddingBackendKind,
    #[serde(default = "default_hashed_dimension")]
    pub hashed_embedding_dimension: usize,
    pub qdrant_url: String,
    #[serde(default)]
    pub qdrant_api_key: Option<String>,
    #[serde(default = "default_qdrant_collection")]
    pub qdrant_collection: String,
    /// Root of the sourcebook library scanned for PDFs.
    pub library_root: String,
    #[serde(default)]
    pub status_endpoint: Option<String>,
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
    #[serde(default = "default_unit_min_chars")]
    pub chunk_unit_min_chars: usize,
    #[serde(default = "default_unit_max_chars")]
    pub chunk_unit_max_chars: usize,
    #[serde(default = "default_buffer_size")]
    pub chunk_buffer_size: usize,
    #[serde(default = "default_breakpoint_policy")]
    pub chunk_breakpoint_policy: BreakpointPolicy,
    #[serde(default = "default_breakpoint_amount")]
    pub chunk_breakpoint_amount: f32,
    #[serde(default = "default_min_chunk_chars")]
    pub min_chunk_chars: usize,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_hashed_dimension() -> usize {
    384
}

fn default_qdrant_collection() -> String {
    "sourcebook_embeddings".to_string()
}

fn default_status_interval_secs() -> u64 {
    30
}

fn default_unit_min_chars() -> usize {
    50
}

fn default_unit_max_chars() -> usize {
    400
}

fn default_buffer_size() -> usize {
    1
}

fn default_breakpoint_amount() -> f32 {
    95.0
}

fn default_min_chunk_chars() -> usize {
    120
}

pub fn get_config() -> Result<AppConfig, ConfigError> {
    let config = Config::builder()
        .add_source(File::with_name("config").required(false))
        .add_source(Environment::default())
        .build()?;

    config.try_deserialize()
}
