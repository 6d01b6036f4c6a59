use std::sync::Arc;

use common::{
    storage::{
        db::SurrealDbClient,
        types::{pipeline_message::PipelineStage, pipeline_task::PipelineTask},
    },
    utils::config::AppConfig,
};
use serde::Serialize;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Serialize)]
struct StatusReport<'a> {
    stage: &'a str,
    queue_size: u64,
    worker_source: &'a str,
}

/// Fire-and-forget heartbeat: periodically POSTs this worker's stage and
/// queue depth to the aggregator endpoint. Purely informational; a dead
/// aggregator never slows the pipeline down, so failures are logged at
/// debug and dropped.
pub struct StatusReporter {
    db: Arc<SurrealDbClient>,
    client: reqwest::Client,
    endpoint: String,
    stage: PipelineStage,
    worker_source: String,
    interval: Duration,
}

impl StatusReporter {
    /// Returns `None` when no endpoint is configured; reporting is opt-in.
    pub fn from_config(
        config: &AppConfig,
        db: Arc<SurrealDbClient>,
        stage: PipelineStage,
        worker_source: String,
    ) -> Option<Self> {
        let endpoint = config.status_endpoint.clone()?;
        Some(Self {
            db,
            client: reqwest::Client::new(),
            endpoint,
            stage,
            worker_source,
            interval: Duration::from_secs(config.status_interval_secs.max(1)),
        })
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(endpoint = %self.endpoint, stage = %self.stage, "status reporter started");

        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!(stage = %self.stage, "status reporter stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.report_once().await;
                }
            }
        }
    }

    async fn report_once(&self) {
        let queue_size = match PipelineTask::queue_depth(&self.db, self.stage).await {
            Ok(depth) => depth,
            Err(err) => {
                debug!(error = %err, "failed to read queue depth for status report");
                return;
            }
        };

        let report = StatusReport {
            stage: self.stage.as_str(),
            queue_size,
            worker_source: &self.worker_source,
        };

        match self
            .client
            .post(&self.endpoint)
            .json(&report)
            .send()
            .await
        {
            Ok(response) => {
                debug!(
                    status = %response.status(),
                    queue_size,
                    "posted status report"
                );
            }
            Err(err) => {
                debug!(error = %err, "failed to post status report");
            }
        }
    }
}
