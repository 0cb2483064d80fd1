//! Nearest-neighbour access to stored face embeddings.
//!
//! Two interchangeable strategies sit behind [`EmbeddingStore`]:
//! [`LinearScanStore`] loads eligible rows and scores them in process with
//! rayon, [`IndexedStore`] pushes scoring and filtering into SQLite through
//! the `vec_cosine_distance` function registered on every pooled connection.
//! Both return the same ranked lists for the same inputs.

use async_trait::async_trait;
use rayon::prelude::*;
use rusqlite::{params, Connection};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::db::{query, Db, COSINE_DISTANCE_FN};
use crate::error::Result;
use crate::faces::vector::{cosine_similarity, similarity_to_distance};
use crate::utils::config::SearchBackend;

/// Slack on the SQL distance bound; exact threshold checks happen in Rust.
const DISTANCE_SLACK: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct NearestQuery {
    /// One or more query embeddings; a candidate scores its best match.
    pub queries: Vec<Vec<f32>>,
    pub threshold: f32,
    pub limit: usize,
    pub exclude_ids: Vec<i64>,
    pub min_confidence: f32,
    pub unassigned_only: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbor {
    pub face_id: i64,
    pub person_id: Option<i64>,
    pub similarity: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PrototypeMatch {
    pub person_id: i64,
    pub similarity: f32,
}

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    fn strategy(&self) -> &'static str;

    /// Faces ranked by similarity descending (ties by ascending id), at or
    /// above `threshold`. Multi-query searches record the maximum similarity
    /// over all queries for each candidate.
    async fn find_nearest(&self, query: NearestQuery) -> Result<Vec<Neighbor>>;

    /// Person prototypes ranked the same way.
    async fn find_nearest_prototypes(
        &self,
        query: Vec<f32>,
        threshold: f32,
        limit: usize,
        exclude_person: Option<i64>,
    ) -> Result<Vec<PrototypeMatch>>;

    async fn find_nearest_for_vector(
        &self,
        query: Vec<f32>,
        threshold: f32,
        limit: usize,
        exclude_self: Option<i64>,
        min_confidence: f32,
    ) -> Result<Vec<Neighbor>> {
        self.find_nearest(NearestQuery {
            queries: vec![query],
            threshold,
            limit,
            exclude_ids: exclude_self.into_iter().collect(),
            min_confidence,
            unassigned_only: false,
        })
        .await
    }
}

pub fn build_store(backend: SearchBackend, db: Db) -> Arc<dyn EmbeddingStore> {
    match backend {
        SearchBackend::Linear => Arc::new(LinearScanStore::new(db)),
        SearchBackend::Indexed => Arc::new(IndexedStore::new(db)),
    }
}

fn rank(a_sim: f32, a_id: i64, b_sim: f32, b_id: i64) -> Ordering {
    b_sim.partial_cmp(&a_sim).unwrap_or(Ordering::Equal).then(a_id.cmp(&b_id))
}

fn sort_neighbors(hits: &mut [Neighbor]) {
    hits.sort_by(|a, b| rank(a.similarity, a.face_id, b.similarity, b.face_id));
}

fn sort_prototypes(hits: &mut [PrototypeMatch]) {
    hits.sort_by(|a, b| rank(a.similarity, a.person_id, b.similarity, b.person_id));
}

fn usable_queries(queries: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
    queries.into_iter().filter(|q| !q.is_empty()).collect()
}

pub struct LinearScanStore {
    db: Db,
}

impl LinearScanStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

/// Best similarity of `candidate` over all `queries`.
fn best_of(queries: &[Vec<f32>], candidate: &[f32]) -> f32 {
    queries
        .iter()
        .map(|q| cosine_similarity(q, candidate))
        .fold(f32::NEG_INFINITY, f32::max)
}

#[async_trait]
impl EmbeddingStore for LinearScanStore {
    fn strategy(&self) -> &'static str {
        "linear"
    }

    async fn find_nearest(&self, query: NearestQuery) -> Result<Vec<Neighbor>> {
        let queries = usable_queries(query.queries);
        if queries.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        let filter = query::CandidateFilter {
            min_confidence: query.min_confidence,
            unassigned_only: query.unassigned_only,
        };
        let candidates = self.db.run(move |conn| query::scan_candidates(conn, &filter)).await?;
        let exclude: HashSet<i64> = query.exclude_ids.into_iter().collect();
        let threshold = query.threshold;

        let mut hits: Vec<Neighbor> = candidates
            .par_iter()
            .filter(|(id, _, _)| !exclude.contains(id))
            .filter_map(|(id, person_id, embedding)| {
                let similarity = best_of(&queries, embedding);
                (similarity >= threshold).then_some(Neighbor { face_id: *id, person_id: *person_id, similarity })
            })
            .collect();
        sort_neighbors(&mut hits);
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn find_nearest_prototypes(
        &self,
        query: Vec<f32>,
        threshold: f32,
        limit: usize,
        exclude_person: Option<i64>,
    ) -> Result<Vec<PrototypeMatch>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let prototypes = self.db.run(move |conn| query::list_prototypes(conn, exclude_person)).await?;
        let mut hits: Vec<PrototypeMatch> = prototypes
            .par_iter()
            .filter_map(|(person_id, prototype)| {
                let similarity = cosine_similarity(&query, prototype);
                (similarity >= threshold).then_some(PrototypeMatch { person_id: *person_id, similarity })
            })
            .collect();
        sort_prototypes(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }
}

pub struct IndexedStore {
    db: Db,
}

impl IndexedStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

fn indexed_face_query(
    conn: &Connection,
    embedding: &[f32],
    max_distance: f64,
    min_confidence: f32,
    unassigned_only: bool,
    limit: usize,
) -> anyhow::Result<Vec<(i64, Option<i64>, f64)>> {
    let assigned_clause = if unassigned_only { "AND person_id IS NULL" } else { "" };
    let sql = format!(
        "SELECT id, person_id, dist FROM (
            SELECT id, person_id, {COSINE_DISTANCE_FN}(embedding_blob, ?1) AS dist FROM faces
            WHERE ignored = 0 AND embedding_blob IS NOT NULL AND confidence >= ?2 {assigned_clause}
         ) WHERE dist IS NOT NULL AND dist <= ?3
         ORDER BY dist ASC, id ASC LIMIT ?4"
    );
    let blob = crate::db::blob::encode_embedding(embedding);
    let mut stmt = conn.prepare_cached(&sql)?;
    let rows = stmt
        .query_map(params![blob, min_confidence as f64, max_distance, limit as i64], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn max_distance_for(threshold: f32) -> f64 {
    similarity_to_distance(threshold) as f64 + DISTANCE_SLACK
}

/// Inverse of the SQL distance, done in f64. Recovers the f32 cosine exactly
/// while |similarity| >= 2^-29; below that `1 - s` rounds and the result is 0.
fn similarity_from_distance(dist: f64) -> f32 {
    (1.0 - dist) as f32
}

#[async_trait]
impl EmbeddingStore for IndexedStore {
    fn strategy(&self) -> &'static str {
        "indexed"
    }

    async fn find_nearest(&self, query: NearestQuery) -> Result<Vec<Neighbor>> {
        let queries = usable_queries(query.queries);
        if queries.is_empty() || query.limit == 0 {
            return Ok(Vec::new());
        }
        let exclude: HashSet<i64> = query.exclude_ids.into_iter().collect();
        // Excluded rows may occupy slots in each per-query page.
        let sql_limit = query.limit.saturating_add(exclude.len());
        let max_distance = max_distance_for(query.threshold);
        let (min_confidence, unassigned_only) = (query.min_confidence, query.unassigned_only);

        let pages = self
            .db
            .run(move |conn| {
                let mut pages = Vec::with_capacity(queries.len());
                for q in &queries {
                    pages.push(indexed_face_query(conn, q, max_distance, min_confidence, unassigned_only, sql_limit)?);
                }
                Ok(pages)
            })
            .await?;

        // The true top-k of the merged ranking is always inside the top-k of its best query.
        let mut best: HashMap<i64, Neighbor> = HashMap::new();
        for (face_id, person_id, dist) in pages.into_iter().flatten() {
            if exclude.contains(&face_id) {
                continue;
            }
            let similarity = similarity_from_distance(dist);
            if similarity < query.threshold {
                continue;
            }
            best.entry(face_id)
                .and_modify(|n| n.similarity = n.similarity.max(similarity))
                .or_insert(Neighbor { face_id, person_id, similarity });
        }
        let mut hits: Vec<Neighbor> = best.into_values().collect();
        sort_neighbors(&mut hits);
        hits.truncate(query.limit);
        Ok(hits)
    }

    async fn find_nearest_prototypes(
        &self,
        query: Vec<f32>,
        threshold: f32,
        limit: usize,
        exclude_person: Option<i64>,
    ) -> Result<Vec<PrototypeMatch>> {
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }
        let max_distance = max_distance_for(threshold);
        let rows: Vec<(i64, f64)> = self
            .db
            .run(move |conn| {
                let sql = format!(
                    "SELECT person_id, dist FROM (
                        SELECT person_id, {COSINE_DISTANCE_FN}(prototype_blob, ?1) AS dist
                        FROM person_prototypes WHERE person_id != ?2
                     ) WHERE dist IS NOT NULL AND dist <= ?3
                     ORDER BY dist ASC, person_id ASC LIMIT ?4"
                );
                let blob = crate::db::blob::encode_embedding(&query);
                let mut stmt = conn.prepare_cached(&sql)?;
                let rows = stmt
                    .query_map(
                        params![blob, exclude_person.unwrap_or(-1), max_distance, limit as i64],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut hits: Vec<PrototypeMatch> = rows
            .into_iter()
            .map(|(person_id, dist)| PrototypeMatch { person_id, similarity: similarity_from_distance(dist) })
            .filter(|m| m.similarity >= threshold)
            .collect();
        sort_prototypes(&mut hits);
        hits.truncate(limit);
        Ok(hits)
    }
}
