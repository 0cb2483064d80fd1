use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

pub struct Stats {
    searches: AtomicU64,
    faces_assigned: AtomicU64,
    persons_created: AtomicU64,
    persons_merged: AtomicU64,
    prototypes_recomputed: AtomicU64,
    prototype_failures: AtomicU64,
    jobs_started: AtomicU64,
    started: Instant,
    last_job_finished: parking_lot::Mutex<Option<Instant>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsSnapshot {
    pub uptime_secs: u64,
    pub searches: u64,
    pub faces_assigned: u64,
    pub persons_created: u64,
    pub persons_merged: u64,
    pub prototypes_recomputed: u64,
    pub prototype_failures: u64,
    pub jobs_started: u64,
    pub secs_since_last_job: Option<u64>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            searches: AtomicU64::new(0),
            faces_assigned: AtomicU64::new(0),
            persons_created: AtomicU64::new(0),
            persons_merged: AtomicU64::new(0),
            prototypes_recomputed: AtomicU64::new(0),
            prototype_failures: AtomicU64::new(0),
            jobs_started: AtomicU64::new(0),
            started: Instant::now(),
            last_job_finished: parking_lot::Mutex::new(None),
        }
    }
    pub fn inc_searches(&self) { self.searches.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_faces_assigned(&self, n: u64) { self.faces_assigned.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_persons_created(&self, n: u64) { self.persons_created.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_persons_merged(&self, n: u64) { self.persons_merged.fetch_add(n, Ordering::Relaxed); }
    pub fn inc_prototypes_recomputed(&self) { self.prototypes_recomputed.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_prototype_failures(&self) { self.prototype_failures.fetch_add(1, Ordering::Relaxed); }
    pub fn inc_jobs_started(&self) { self.jobs_started.fetch_add(1, Ordering::Relaxed); }
    pub fn mark_job_finished(&self) {
        *self.last_job_finished.lock() = Some(Instant::now());
    }
    pub fn uptime_secs(&self) -> u64 { self.started.elapsed().as_secs() }
    pub fn prototype_failures(&self) -> u64 { self.prototype_failures.load(Ordering::Relaxed) }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            uptime_secs: self.uptime_secs(),
            searches: self.searches.load(Ordering::Relaxed),
            faces_assigned: self.faces_assigned.load(Ordering::Relaxed),
            persons_created: self.persons_created.load(Ordering::Relaxed),
            persons_merged: self.persons_merged.load(Ordering::Relaxed),
            prototypes_recomputed: self.prototypes_recomputed.load(Ordering::Relaxed),
            prototype_failures: self.prototype_failures(),
            jobs_started: self.jobs_started.load(Ordering::Relaxed),
            secs_since_last_job: self.last_job_finished.lock().map(|t| t.elapsed().as_secs()),
        }
    }
}
