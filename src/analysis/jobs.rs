//! Job tracking for aggregate calls.
//!
//! Each submitted request runs as one spawned task. Its record moves
//! Pending → Running → Completed / Failed / Cancelled in the job store,
//! where callers poll it. Terminal records expire after the retention
//! period.

use super::aggregator::Aggregator;
use crate::error::{AggregateError, StorageError};
use crate::models::{AggregateResult, AnalysisRequest, JobRecord, JobStatus};
use crate::storage::JobStore;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct JobTracker {
    aggregator: Arc<Aggregator>,
    store: Arc<dyn JobStore>,
    retention: chrono::Duration,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl JobTracker {
    pub fn new(
        aggregator: Arc<Aggregator>,
        store: Arc<dyn JobStore>,
        retention: chrono::Duration,
    ) -> Self {
        Self {
            aggregator,
            store,
            retention,
            running: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start aggregating `request` in the background and return the job id.
    pub async fn submit(&self, request: AnalysisRequest) -> Result<String, StorageError> {
        let id = Uuid::new_v4().to_string();
        let record = JobRecord::new(&id, request.requested_modalities());
        self.store.put(&id, &record).await?;

        let token = CancellationToken::new();
        if let Ok(mut running) = self.running.lock() {
            running.insert(id.clone(), token.clone());
        }

        info!("Submitted job {} ({} modalities)", id, record.modalities.len());

        let job = Job {
            record,
            request,
            aggregator: self.aggregator.clone(),
            store: self.store.clone(),
            running: self.running.clone(),
        };
        tokio::spawn(job.run(token));

        Ok(id)
    }

    /// Current record of a job, or `None` if it is unknown or expired.
    pub async fn status(&self, id: &str) -> Result<Option<JobRecord>, StorageError> {
        let Some(record) = self.store.get(id).await? else {
            return Ok(None);
        };

        if record.is_expired(self.retention, Utc::now()) {
            debug!("Job {} expired, removing", id);
            self.store.delete(id).await?;
            return Ok(None);
        }

        Ok(Some(record))
    }

    /// Request cooperative cancellation. Returns false if the job is not
    /// running.
    pub fn cancel(&self, id: &str) -> bool {
        let token = self
            .running
            .lock()
            .ok()
            .and_then(|running| running.get(id).cloned());

        match token {
            Some(token) => {
                info!("Cancelling job {}", id);
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// State moved into a job's task.
struct Job {
    record: JobRecord,
    request: AnalysisRequest,
    aggregator: Arc<Aggregator>,
    store: Arc<dyn JobStore>,
    running: Arc<Mutex<HashMap<String, CancellationToken>>>,
}

impl Job {
    async fn run(mut self, token: CancellationToken) {
        self.record.transition(JobStatus::Running);
        self.save().await;

        tokio::select! {
            _ = token.cancelled() => {
                self.record.transition(JobStatus::Cancelled);
            }
            outcome = self.aggregator.aggregate_checked(&self.request) => {
                match outcome {
                    Ok(result) => {
                        self.record.result = Some(result);
                        self.record.transition(JobStatus::Completed);
                    }
                    Err(e) => {
                        warn!(
                            "Job {} failed: no modality succeeded ({:?})",
                            self.record.id,
                            e.failed_modalities()
                        );
                        self.record.error = Some(e.to_string());
                        let AggregateError::AllModalitiesFailed { failures } = e;
                        self.record.result = Some(AggregateResult {
                            failures,
                            ..Default::default()
                        });
                        self.record.transition(JobStatus::Failed);
                    }
                }
            }
        }

        info!("Job {} {}", self.record.id, self.record.status);
        self.save().await;

        if let Ok(mut running) = self.running.lock() {
            running.remove(&self.record.id);
        }
    }

    async fn save(&self) {
        if let Err(e) = self.store.put(&self.record.id, &self.record).await {
            warn!("Failed to store job {}: {}", self.record.id, e);
        }
    }
}
