//! Background clustering of the unassigned-face backlog.
//!
//! A job walks eligible unassigned faces in ascending id order, one batch at
//! a time. Each face either joins the person whose prototype matches best or
//! seeds a new person, depending on the job mode. Progress is persisted after
//! every batch in `cluster_jobs`, which stays the source of truth: the
//! in-memory token map and current-job id only accelerate lookups.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use crate::db::{query, writer, Db};
use crate::error::{FaceError, Result};
use crate::faces::cluster::ClusterManager;
use crate::faces::settings::SettingsStore;
use crate::faces::store::EmbeddingStore;
use crate::models::job::{ClusterMode, JobRecord, JobStatus};
use crate::stats::Stats;
use crate::utils::config::ClusterSettings;

pub const MAX_JOB_ERRORS: usize = 50;
const MAX_BATCH_SIZE: usize = 10_000;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default = "default_continuous")]
    pub continuous: bool,
    pub similarity_threshold: Option<f32>,
    #[serde(default = "default_mode")]
    pub mode: ClusterMode,
    /// Faces per batch.
    pub limit: Option<usize>,
    pub target_face_count: Option<i64>,
}

fn default_continuous() -> bool {
    true
}

fn default_mode() -> ClusterMode {
    ClusterMode::Both
}

impl Default for StartRequest {
    fn default() -> Self {
        Self {
            continuous: default_continuous(),
            similarity_threshold: None,
            mode: default_mode(),
            limit: None,
            target_face_count: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub job_id: String,
    pub initial_face_count: i64,
    pub target_face_count: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    #[serde(flatten)]
    pub job: JobRecord,
    /// A task in this process is driving the job.
    pub live: bool,
    pub progress_percent: f32,
}

impl JobSnapshot {
    fn new(job: JobRecord, live: bool) -> Self {
        let span = (job.initial_count - job.target_count).max(0);
        let progress_percent = match job.status {
            JobStatus::Completed => 100.0,
            _ if span == 0 => 0.0,
            _ => ((job.processed as f32 / span as f32) * 100.0).min(100.0),
        };
        Self { job, live, progress_percent }
    }
}

enum FaceOutcome {
    Assigned(i64),
    Created(i64),
    Skipped,
}

struct RunParams {
    threshold: f32,
    min_confidence: f32,
    batch_size: usize,
}

#[derive(Clone)]
pub struct BatchController {
    db: Db,
    store: Arc<dyn EmbeddingStore>,
    cluster: ClusterManager,
    settings: SettingsStore,
    config: ClusterSettings,
    stats: Arc<Stats>,
    live: Arc<parking_lot::Mutex<HashMap<String, CancellationToken>>>,
    current: Arc<parking_lot::Mutex<Option<String>>>,
    start_lock: Arc<AsyncMutex<()>>,
}

impl BatchController {
    pub fn new(
        db: Db,
        store: Arc<dyn EmbeddingStore>,
        cluster: ClusterManager,
        settings: SettingsStore,
        config: ClusterSettings,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            db,
            store,
            cluster,
            settings,
            config,
            stats,
            live: Arc::new(parking_lot::Mutex::new(HashMap::new())),
            current: Arc::new(parking_lot::Mutex::new(None)),
            start_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Reloads active jobs after a restart. Stale ones are failed. The most
    /// recent remaining job resumes after its persisted cursor; any older
    /// active job is cancelled. Returns the number of resumed jobs.
    pub async fn recover(&self) -> Result<usize> {
        let active = self.db.run(|conn| query::active_jobs(conn)).await?;
        let mut resumed = 0;
        for job in active {
            let job = self.reconcile(job).await?;
            if !job.status.is_active() || self.live.lock().contains_key(&job.id) {
                continue;
            }
            if resumed > 0 {
                let id = job.id.clone();
                self.db
                    .run(move |conn| writer::finish_job(conn, &id, JobStatus::Cancelled, Some("superseded on restart")))
                    .await?;
                tracing::warn!(job_id = %job.id, "Cancelled extra unfinished clustering job");
                continue;
            }
            let min_confidence = self.settings.confidence_threshold().await?;
            let params = RunParams {
                threshold: job.similarity_threshold,
                min_confidence,
                batch_size: (job.batch_size.max(1) as usize).min(MAX_BATCH_SIZE),
            };
            tracing::info!(
                job_id = %job.id,
                cursor = job.cursor,
                processed = job.processed,
                "Resuming unfinished clustering job"
            );
            self.spawn_job(job, params);
            resumed += 1;
        }
        Ok(resumed)
    }

    pub async fn start(&self, req: StartRequest) -> Result<StartResponse> {
        let threshold = self.settings.resolve_similarity(req.similarity_threshold).await?;
        let batch_size = req.limit.unwrap_or(self.config.batch_size);
        if batch_size == 0 {
            return Err(FaceError::invalid("limit must be at least 1"));
        }
        let batch_size = batch_size.min(MAX_BATCH_SIZE);
        if let Some(t) = req.target_face_count {
            if t < 0 {
                return Err(FaceError::invalid("targetFaceCount must not be negative"));
            }
        }

        let _start = self.start_lock.lock().await;
        if let Some(running) = self.running_job().await? {
            return Err(FaceError::JobAlreadyRunning { job_id: running.id });
        }

        let min_confidence = self.settings.confidence_threshold().await?;
        let initial = self.db.run(move |conn| query::count_unassigned_eligible(conn, min_confidence)).await?;
        let target = req
            .target_face_count
            .unwrap_or_else(|| (initial as f64 * self.config.batch_target_fraction as f64).floor() as i64)
            .min(initial);
        let work = (initial - target).max(0) as usize;
        let total_batches = if req.continuous { work.div_ceil(batch_size) } else { work.min(1) };

        let now = writer::now_ts();
        let job = JobRecord {
            id: uuid::Uuid::new_v4().to_string(),
            status: JobStatus::Starting,
            mode: req.mode,
            similarity_threshold: threshold,
            batch_size: batch_size as i64,
            continuous: req.continuous,
            initial_count: initial,
            target_count: target,
            processed: 0,
            assigned: 0,
            persons_created: 0,
            batch_index: 0,
            total_batches: total_batches as i64,
            cursor: 0,
            errors: Vec::new(),
            started_at: now,
            updated_at: now,
            finished_at: None,
        };
        let record = job.clone();
        self.db.run(move |conn| writer::save_job(conn, &record)).await?;
        self.stats.inc_jobs_started();

        tracing::info!(
            job_id = %job.id,
            mode = job.mode.as_str(),
            threshold,
            batch_size,
            initial,
            target,
            "Clustering job started"
        );
        let response = StartResponse { job_id: job.id.clone(), initial_face_count: initial, target_face_count: target };
        let params = RunParams { threshold, min_confidence, batch_size };
        self.spawn_job(job, params);
        Ok(response)
    }

    fn spawn_job(&self, job: JobRecord, params: RunParams) {
        let token = CancellationToken::new();
        self.live.lock().insert(job.id.clone(), token.clone());
        *self.current.lock() = Some(job.id.clone());
        let controller = self.clone();
        tokio::spawn(async move { controller.run_job(job, token, params).await });
    }

    /// Progress of `job_id`, or of the current/most recent job when omitted.
    pub async fn status(&self, job_id: Option<String>) -> Result<JobSnapshot> {
        let job_id = match job_id.or_else(|| self.current.lock().clone()) {
            Some(id) => id,
            None => {
                let latest = self.db.run(|conn| query::list_jobs(conn, 1)).await?;
                latest
                    .into_iter()
                    .next()
                    .map(|j| j.id)
                    .ok_or_else(|| FaceError::JobNotFound { job_id: "latest".to_string() })?
            }
        };
        let job = self.load(&job_id).await?;
        let job = self.reconcile(job).await?;
        let live = self.live.lock().contains_key(&job.id);
        Ok(JobSnapshot::new(job, live))
    }

    /// Signals a running job to stop. A job with no task in this process is
    /// marked cancelled directly.
    pub async fn cancel(&self, job_id: &str) -> Result<JobSnapshot> {
        let job = self.load(job_id).await?;
        if !job.status.is_active() {
            return Ok(JobSnapshot::new(job, false));
        }
        let token = self.live.lock().get(job_id).cloned();
        match token {
            Some(token) => {
                tracing::info!(job_id, "Cancellation requested");
                token.cancel();
            }
            None => {
                let id = job_id.to_string();
                self.db
                    .run(move |conn| writer::finish_job(conn, &id, JobStatus::Cancelled, None))
                    .await?;
                self.clear_current(job_id);
            }
        }
        let job = self.load(job_id).await?;
        let live = self.live.lock().contains_key(job_id);
        Ok(JobSnapshot::new(job, live))
    }

    pub async fn list(&self, limit: i64) -> Result<Vec<JobRecord>> {
        let limit = limit.clamp(1, 200);
        self.db.run(move |conn| query::list_jobs(conn, limit)).await
    }

    async fn load(&self, job_id: &str) -> Result<JobRecord> {
        let id = job_id.to_string();
        self.db
            .run(move |conn| query::get_job(conn, &id))
            .await?
            .ok_or_else(|| FaceError::JobNotFound { job_id: job_id.to_string() })
    }

    async fn running_job(&self) -> Result<Option<JobRecord>> {
        let active = self.db.run(|conn| query::active_jobs(conn)).await?;
        for job in active {
            let job = self.reconcile(job).await?;
            if job.status.is_active() {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Fails an active job that has made no progress within the staleness window.
    async fn reconcile(&self, job: JobRecord) -> Result<JobRecord> {
        if !job.status.is_active() {
            self.clear_current(&job.id);
            return Ok(job);
        }
        let idle = writer::now_ts() - job.updated_at;
        if idle <= self.config.job_stale_secs {
            return Ok(job);
        }
        tracing::warn!(job_id = %job.id, idle_secs = idle, "Marking stale clustering job as failed");
        if let Some(token) = self.live.lock().remove(&job.id) {
            token.cancel();
        }
        let id = job.id.clone();
        let message = format!("stale: no progress for {idle}s");
        self.db
            .run(move |conn| writer::finish_job(conn, &id, JobStatus::Failed, Some(&message)))
            .await?;
        self.clear_current(&job.id);
        self.load(&job.id).await
    }

    fn clear_current(&self, job_id: &str) {
        let mut current = self.current.lock();
        if current.as_deref() == Some(job_id) {
            *current = None;
        }
    }

    async fn save(&self, job: &JobRecord) -> Result<()> {
        let record = job.clone();
        self.db.run(move |conn| writer::save_job(conn, &record)).await
    }

    async fn run_job(self, mut job: JobRecord, token: CancellationToken, params: RunParams) {
        job.status = JobStatus::Running;
        job.updated_at = writer::now_ts();
        let (status, error) = match self.save(&job).await {
            Ok(()) => match self.drive(&mut job, &token, &params).await {
                Ok(status) => (status, None),
                Err(e) => (JobStatus::Failed, Some(e.to_string())),
            },
            Err(e) => (JobStatus::Failed, Some(e.to_string())),
        };

        // Counters first, then the terminal transition; both keep an earlier terminal status.
        job.updated_at = writer::now_ts();
        if let Err(e) = self.save(&job).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to persist final job progress");
        }
        let id = job.id.clone();
        let message = error.clone();
        if let Err(e) = self
            .db
            .run(move |conn| writer::finish_job(conn, &id, status, message.as_deref()))
            .await
        {
            tracing::error!(job_id = %job.id, error = %e, "Failed to record job outcome");
        }
        self.live.lock().remove(&job.id);
        self.clear_current(&job.id);
        self.stats.mark_job_finished();

        match error {
            Some(err) => tracing::error!(job_id = %job.id, error = %err, processed = job.processed, "Clustering job failed"),
            None => tracing::info!(
                job_id = %job.id,
                status = %status,
                processed = job.processed,
                assigned = job.assigned,
                persons_created = job.persons_created,
                "Clustering job finished"
            ),
        }
    }

    async fn drive(&self, job: &mut JobRecord, token: &CancellationToken, params: &RunParams) -> Result<JobStatus> {
        let pause = Duration::from_millis(self.config.batch_pause_ms);
        loop {
            if token.is_cancelled() {
                return Ok(JobStatus::Cancelled);
            }
            let min_confidence = params.min_confidence;
            let remaining = self.db.run(move |conn| query::count_unassigned_eligible(conn, min_confidence)).await?;
            if remaining <= job.target_count {
                return Ok(JobStatus::Completed);
            }
            let (after, limit) = (job.cursor, params.batch_size as i64);
            let batch = self
                .db
                .run(move |conn| query::next_unassigned_batch(conn, after, min_confidence, limit))
                .await?;
            if batch.is_empty() {
                return Ok(JobStatus::Completed);
            }

            job.batch_index += 1;
            job.total_batches = job.total_batches.max(job.batch_index);
            let mut touched = BTreeSet::new();
            for (face_id, embedding) in batch {
                if token.is_cancelled() {
                    break;
                }
                job.cursor = face_id;
                match self.process_face(face_id, embedding, job.mode, params.threshold).await {
                    Ok(FaceOutcome::Assigned(person_id)) => {
                        job.assigned += 1;
                        touched.insert(person_id);
                    }
                    Ok(FaceOutcome::Created(_)) => job.persons_created += 1,
                    Ok(FaceOutcome::Skipped) => {}
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, face_id, error = %e, "Face skipped");
                        if job.errors.len() < MAX_JOB_ERRORS {
                            job.errors.push(format!("face {face_id}: {e}"));
                        }
                    }
                }
                job.processed += 1;
            }

            let touched: Vec<i64> = touched.into_iter().collect();
            self.cluster.prototypes().refresh(&touched).await;
            job.updated_at = writer::now_ts();
            self.save(job).await?;
            tracing::debug!(
                job_id = %job.id,
                batch = job.batch_index,
                processed = job.processed,
                remaining,
                "Batch finished"
            );

            if !job.continuous {
                return Ok(if token.is_cancelled() { JobStatus::Cancelled } else { JobStatus::Completed });
            }
            tokio::select! {
                _ = token.cancelled() => return Ok(JobStatus::Cancelled),
                _ = tokio::time::sleep(pause) => {}
            }
        }
    }

    async fn process_face(&self, face_id: i64, embedding: Vec<f32>, mode: ClusterMode, threshold: f32) -> Result<FaceOutcome> {
        if mode.allows_assignment() {
            let best = self
                .store
                .find_nearest_prototypes(embedding, threshold, 1, None)
                .await?
                .into_iter()
                .next();
            if let Some(best) = best {
                let person_id = best.person_id;
                let guard = self.cluster.prototypes().locks().lock(person_id).await;
                let outcome = self
                    .db
                    .run(move |conn| {
                        // The person may have been merged away since its prototype was read.
                        if query::get_person(conn, person_id)?.is_none() {
                            return Ok(None);
                        }
                        writer::assign_faces_to_person(conn, person_id, &[face_id]).map(Some)
                    })
                    .await?;
                drop(guard);
                match outcome {
                    Some(o) if !o.assigned.is_empty() => {
                        self.stats.inc_faces_assigned(1);
                        return Ok(FaceOutcome::Assigned(person_id));
                    }
                    Some(_) => return Ok(FaceOutcome::Skipped),
                    None => {}
                }
            }
        }
        if mode.allows_creation() {
            let created = self.cluster.create_person_with_faces(None, &[face_id]).await?;
            if created.count == 0 {
                // Claimed by someone else in the meantime; drop the empty person.
                self.cluster.delete_person(created.person_id).await?;
                return Ok(FaceOutcome::Skipped);
            }
            return Ok(FaceOutcome::Created(created.person_id));
        }
        Ok(FaceOutcome::Skipped)
    }
}
