//! Per-person representative vectors.
//!
//! A prototype is the normalized mean of a person's highest-confidence,
//! non-ignored embeddings, rebuilt from scratch on every recompute.

use anyhow::Result as AnyResult;
use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::db::{query, writer, Db};
use crate::error::Result;
use crate::faces::vector::{mean_vector, normalize};
use crate::stats::Stats;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrototypeSummary {
    pub person_id: i64,
    pub sample_size: usize,
    pub dimension: usize,
}

/// Normalized mean of `samples`. Vectors whose length differs from the first
/// one are skipped. Returns the prototype and how many vectors went into it.
pub fn compute_prototype(samples: &[Vec<f32>]) -> Option<(Vec<f32>, usize)> {
    let dim = samples.iter().find(|v| !v.is_empty())?.len();
    let usable: Vec<Vec<f32>> = samples.iter().filter(|v| v.len() == dim).cloned().collect();
    let mean = mean_vector(&usable).ok()?;
    Some((normalize(&mean), usable.len()))
}

/// Rebuilds and stores the prototype, clearing it when no eligible face remains.
pub fn recompute_with_conn(conn: &Connection, person_id: i64, sample_size: usize) -> AnyResult<Option<PrototypeSummary>> {
    let samples = query::get_person_sample_embeddings(conn, person_id, sample_size)?;
    let vectors: Vec<Vec<f32>> = samples.into_iter().map(|(_, v)| v).collect();
    match compute_prototype(&vectors) {
        Some((prototype, used)) => {
            writer::upsert_prototype(conn, person_id, &prototype, used)?;
            Ok(Some(PrototypeSummary { person_id, sample_size: used, dimension: prototype.len() }))
        }
        None => {
            writer::clear_prototype(conn, person_id)?;
            Ok(None)
        }
    }
}

/// Per-person async locks. Writers into a person and its prototype recompute
/// take the same lock, so a recompute never interleaves with an assignment.
#[derive(Default)]
pub struct PersonLocks {
    inner: parking_lot::Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

const LOCK_TABLE_PRUNE_AT: usize = 1024;

impl PersonLocks {
    pub async fn lock(&self, person_id: i64) -> OwnedMutexGuard<()> {
        let slot = {
            let mut map = self.inner.lock();
            if map.len() >= LOCK_TABLE_PRUNE_AT {
                map.retain(|_, m| Arc::strong_count(m) > 1);
            }
            map.entry(person_id).or_default().clone()
        };
        slot.lock_owned().await
    }

    /// Locks several persons in ascending id order.
    pub async fn lock_many(&self, person_ids: &[i64]) -> Vec<OwnedMutexGuard<()>> {
        let mut ids = person_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            guards.push(self.lock(id).await);
        }
        guards
    }
}

#[derive(Clone)]
pub struct PrototypeEngine {
    db: Db,
    sample_size: usize,
    locks: Arc<PersonLocks>,
    stats: Arc<Stats>,
}

impl PrototypeEngine {
    pub fn new(db: Db, sample_size: usize, stats: Arc<Stats>) -> Self {
        Self { db, sample_size: sample_size.max(1), locks: Arc::new(PersonLocks::default()), stats }
    }

    pub fn locks(&self) -> &PersonLocks {
        &self.locks
    }

    pub fn sample_size(&self) -> usize {
        self.sample_size
    }

    pub async fn recompute(&self, person_id: i64) -> Result<Option<PrototypeSummary>> {
        let _guard = self.locks.lock(person_id).await;
        let sample_size = self.sample_size;
        let summary = self.db.run(move |conn| recompute_with_conn(conn, person_id, sample_size)).await?;
        self.stats.inc_prototypes_recomputed();
        Ok(summary)
    }

    /// Best-effort recompute for each person. Failures are logged and counted,
    /// never returned: the mutation that triggered the refresh already committed.
    pub async fn refresh(&self, person_ids: &[i64]) {
        let mut ids = person_ids.to_vec();
        ids.sort_unstable();
        ids.dedup();
        let handles: Vec<_> = ids
            .into_iter()
            .map(|person_id| {
                let engine = self.clone();
                (person_id, tokio::spawn(async move { engine.recompute(person_id).await }))
            })
            .collect();
        for (person_id, handle) in handles {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    self.stats.inc_prototype_failures();
                    tracing::warn!(person_id, error = %e, "Prototype refresh failed");
                }
                Err(e) => {
                    self.stats.inc_prototype_failures();
                    tracing::warn!(person_id, error = %e, "Prototype refresh task aborted");
                }
            }
        }
    }

    pub async fn sample_faces(&self, person_id: i64, limit: usize) -> Result<Vec<query::SampledFace>> {
        self.db.run(move |conn| query::get_person_sample_embeddings(conn, person_id, limit)).await
    }

    /// Stored prototype, or the normalized mean of the top sample faces when none is stored.
    pub async fn representative(&self, person_id: i64) -> Result<Option<Vec<f32>>> {
        let sample_size = self.sample_size;
        self.db
            .run(move |conn| {
                if let Some(stored) = query::get_person_prototype(conn, person_id)? {
                    return Ok(Some(stored));
                }
                let samples = query::get_person_sample_embeddings(conn, person_id, sample_size)?;
                let vectors: Vec<Vec<f32>> = samples.into_iter().map(|(_, v)| v).collect();
                Ok(compute_prototype(&vectors).map(|(v, _)| v))
            })
            .await
    }
}
