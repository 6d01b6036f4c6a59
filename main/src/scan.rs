use std::{path::PathBuf, sync::Arc};

use common::{storage::db::SurrealDbClient, utils::config::get_config};
use ingestion_pipeline::scanner::scan_and_enqueue;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// One-shot change detector: walks the library root and enqueues crack
/// tasks for every new or changed PDF, then exits. Intended to run from
/// cron or by hand after dropping new sourcebooks into the library.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let config = get_config()?;
    let root = PathBuf::from(&config.library_root);

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

    let shutdown = CancellationToken::new();
    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received; finishing current file");
            ctrl_c_shutdown.cancel();
        }
    });

    let summary = scan_and_enqueue(&root, &db, &shutdown).await?;

    println!(
        "scanned {} files: {} enqueued, {} unchanged, {} errors",
        summary.scanned, summary.enqueued, summary.unchanged, summary.errors
    );

    Ok(())
}
