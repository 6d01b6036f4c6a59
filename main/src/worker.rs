use std::{str::FromStr, sync::Arc};

use common::{
    storage::{db::SurrealDbClient, types::pipeline_message::PipelineStage},
    utils::{config::get_config, embedding::EmbeddingProvider},
    vector::QdrantVectorStore,
};
use ingestion_pipeline::{
    chunker::ChunkerConfig, pipeline::IngestionPipeline, run_worker_loop, status::StatusReporter,
};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Stage worker binary: `worker <stage>` (or the PIPELINE_STAGE variable)
/// runs a claim-process loop for one queue partition until Ctrl-C.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let stage = resolve_stage()?;
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let embedding_provider = EmbeddingProvider::from_config(&config, openai_client);

    let vector_store = Arc::new(QdrantVectorStore::new(
        &config.qdrant_url,
        config.qdrant_api_key.clone(),
        config.qdrant_collection.clone(),
    )?);

    let pipeline = Arc::new(IngestionPipeline::new(
        Arc::clone(&db),
        embedding_provider,
        vector_store,
        ChunkerConfig::from_app_config(&config),
    ));

    let shutdown = CancellationToken::new();

    let worker_source = format!("{stage}-{}", uuid::Uuid::new_v4());
    if let Some(reporter) =
        StatusReporter::from_config(&config, Arc::clone(&db), stage, worker_source)
    {
        tokio::spawn(reporter.run(shutdown.clone()));
    }

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
            ctrl_c_shutdown.cancel();
        }
    });

    run_worker_loop(db, pipeline, stage, shutdown).await?;
    Ok(())
}

fn resolve_stage() -> anyhow::Result<PipelineStage> {
    let raw = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PIPELINE_STAGE").ok())
        .ok_or_else(|| {
            anyhow::anyhow!("missing stage: pass it as the first argument or set PIPELINE_STAGE")
        })?;

    PipelineStage::from_str(&raw)
}
