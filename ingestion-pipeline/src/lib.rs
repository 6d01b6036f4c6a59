#![allow(clippy::missing_docs_in_private_items, clippy::result_large_err)]

pub mod chunker;
pub mod cracker;
pub mod embedder;
pub mod pipeline;
pub mod scanner;
pub mod status;

use std::sync::Arc;

use chrono::Utc;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        types::{
            pipeline_message::PipelineStage,
            pipeline_task::{PipelineTask, DEFAULT_LEASE_SECS},
        },
    },
};
pub use pipeline::IngestionPipeline;
use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Claim-process loop for one stage. Every stage can run any number of these
/// concurrently (across processes too); the atomic claim query keeps them
/// from stepping on each other. Returns cleanly once `shutdown` fires.
pub async fn run_worker_loop(
    db: Arc<SurrealDbClient>,
    pipeline: Arc<IngestionPipeline>,
    stage: PipelineStage,
    shutdown: CancellationToken,
) -> Result<(), AppError> {
    let worker_id = format!("{stage}-worker-{}", Uuid::new_v4());
    let lease_duration = Duration::from_secs(DEFAULT_LEASE_SECS.unsigned_abs());
    let idle_backoff = Duration::from_millis(500);

    info!(%worker_id, %stage, "worker loop started");

    loop {
        if shutdown.is_cancelled() {
            info!(%worker_id, %stage, "worker loop stopping");
            return Ok(());
        }

        match PipelineTask::claim_next_ready(&db, stage, &worker_id, Utc::now(), lease_duration)
            .await
        {
            Ok(Some(task)) => {
                let task_id = task.id.clone();
                info!(
                    %worker_id,
                    %task_id,
                    attempt = task.attempts,
                    "claimed pipeline task"
                );
                if let Err(err) = pipeline.process_task(task).await {
                    error!(%worker_id, %task_id, error = %err, "pipeline task failed");
                }
            }
            Ok(None) => {
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = sleep(idle_backoff) => {}
                }
            }
            Err(err) => {
                error!(%worker_id, error = %err, "failed to claim pipeline task");
                warn!("Backing off for 1s after claim error");
                tokio::select! {
                    () = shutdown.cancelled() => {}
                    () = sleep(Duration::from_secs(1)) => {}
                }
            }
        }
    }
}
