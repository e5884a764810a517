use crate::{
    batch::{BatchOptions, run_batch},
    models::{ApiError, BatchRecord, ItemRow},
    pipeline::Pipeline,
};
use serde::Serialize;
use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU8, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Finished jobs stay pollable this long.
pub const DEFAULT_JOB_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    ttl: Duration,
}

struct Job {
    id: Uuid,
    rows: Vec<ItemRow>,
    options: BatchOptions,
}

struct JobEntry {
    state: JobState,
    progress: Arc<AtomicU8>,
    cancel: Arc<AtomicBool>,
    finished_at: Option<Instant>,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running { progress: u8 },
    Completed { results: Vec<BatchRecord> },
    Cancelled { results: Vec<BatchRecord> },
    Failed { error: String },
}

impl JobState {
    pub fn label(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Running { .. } => "running",
            JobState::Completed { .. } => "completed",
            JobState::Cancelled { .. } => "cancelled",
            JobState::Failed { .. } => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobState::Completed { .. } | JobState::Cancelled { .. } | JobState::Failed { .. }
        )
    }
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

impl JobEntry {
    fn finish(&mut self, state: JobState) {
        self.state = state;
        self.finished_at = Some(Instant::now());
    }

    fn expired(&self, ttl: Duration) -> bool {
        self.finished_at.is_some_and(|at| at.elapsed() >= ttl)
    }

    fn info(&self, id: Uuid) -> JobInfo {
        let state = match &self.state {
            JobState::Running { .. } => JobState::Running {
                progress: self.progress.load(Ordering::Relaxed),
            },
            other => other.clone(),
        };
        JobInfo {
            id: id.to_string(),
            state,
        }
    }
}

impl JobQueue {
    /// Starts the single batch worker. Batches run one after another in arrival order.
    pub fn spawn(pipeline: Pipeline, capacity: usize) -> (Self, JoinHandle<()>) {
        Self::spawn_with_ttl(pipeline, capacity, DEFAULT_JOB_TTL)
    }

    pub fn spawn_with_ttl(
        pipeline: Pipeline,
        capacity: usize,
        ttl: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses: Arc<Mutex<HashMap<Uuid, JobEntry>>> = Arc::new(Mutex::new(HashMap::new()));
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let Job { id, rows, options } = job;
                let (progress, cancel) = {
                    let mut guard = statuses_bg.lock().await;
                    let Some(entry) = guard.get_mut(&id) else {
                        continue;
                    };
                    if entry.cancel.load(Ordering::SeqCst) {
                        continue;
                    }
                    entry.state = JobState::Running { progress: 0 };
                    (entry.progress.clone(), entry.cancel.clone())
                };

                let task = {
                    let pipeline = pipeline.clone();
                    let progress = progress.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        run_batch(
                            &pipeline,
                            &rows,
                            &options,
                            |pct| progress.store(pct, Ordering::Relaxed),
                            &cancel,
                        )
                        .await
                    })
                };

                let state = match task.await {
                    Ok(outcome) if outcome.cancelled => JobState::Cancelled {
                        results: outcome.records,
                    },
                    Ok(outcome) => JobState::Completed {
                        results: outcome.records,
                    },
                    Err(err) => {
                        warn!(target = "autolist.batch", job = %id, error = %err, "batch_worker_failed");
                        JobState::Failed {
                            error: err.to_string(),
                        }
                    }
                };
                info!(target = "autolist.batch", job = %id, state = state.label(), "batch_job_finished");
                let mut guard = statuses_bg.lock().await;
                if let Some(entry) = guard.get_mut(&id) {
                    entry.finish(state);
                }
            }
        });

        (Self { tx, statuses, ttl }, handle)
    }

    pub async fn enqueue_batch(
        &self,
        rows: Vec<ItemRow>,
        options: BatchOptions,
    ) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        {
            let mut guard = self.statuses.lock().await;
            guard.retain(|_, entry| !entry.expired(self.ttl));
            guard.insert(
                id,
                JobEntry {
                    state: JobState::Queued,
                    progress: Arc::new(AtomicU8::new(0)),
                    cancel: Arc::new(AtomicBool::new(false)),
                    finished_at: None,
                },
            );
        }
        let job = Job { id, rows, options };
        if self.tx.send(job).await.is_err() {
            self.statuses.lock().await.remove(&id);
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        let guard = self.statuses.lock().await;
        guard.get(&id).map(|entry| entry.info(id))
    }

    /// Flags a job for cancellation. A queued job is cancelled at once; a running
    /// one stops before its next row.
    pub async fn cancel(&self, id: Uuid) -> Option<JobInfo> {
        let mut guard = self.statuses.lock().await;
        let entry = guard.get_mut(&id)?;
        if !entry.state.is_terminal() {
            entry.cancel.store(true, Ordering::SeqCst);
            if matches!(entry.state, JobState::Queued) {
                entry.finish(JobState::Cancelled {
                    results: Vec::new(),
                });
            }
        }
        Some(entry.info(id))
    }
}
