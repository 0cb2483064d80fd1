use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::{query, Db};
use crate::error::{FaceError, Result};
use crate::faces::settings::SettingsStore;
use crate::faces::store::{EmbeddingStore, NearestQuery, Neighbor};
use crate::models::face::SimilarFace;
use crate::stats::Stats;

pub const DEFAULT_SELECTION_LIMIT: usize = 200;
pub const DEFAULT_FACE_LIMIT: usize = 50;
pub const MAX_FACE_LIMIT: usize = 500;
/// Upper bound on hits counted for `totalFound`.
const TOTAL_FOUND_CAP: usize = 5000;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectionResult {
    pub similar_faces: Vec<SimilarFace>,
    pub used_threshold: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceSimilarResult {
    pub similar_faces: Vec<SimilarFace>,
    pub used_threshold: f32,
    pub total_found: usize,
    pub returned: usize,
}

#[derive(Clone)]
pub struct SimilaritySearch {
    db: Db,
    store: Arc<dyn EmbeddingStore>,
    settings: SettingsStore,
    stats: Arc<Stats>,
}

impl SimilaritySearch {
    pub fn new(db: Db, store: Arc<dyn EmbeddingStore>, settings: SettingsStore, stats: Arc<Stats>) -> Self {
        Self { db, store, settings, stats }
    }

    pub fn store(&self) -> &Arc<dyn EmbeddingStore> {
        &self.store
    }

    /// Unassigned faces similar to the best of the selected faces.
    pub async fn similar_to_selection(
        &self,
        face_ids: Vec<i64>,
        threshold: Option<f32>,
        limit: Option<usize>,
    ) -> Result<SelectionResult> {
        if face_ids.is_empty() {
            return Err(FaceError::invalid("faceIds must not be empty"));
        }
        let used_threshold = self.settings.resolve_similarity(threshold).await?;
        let limit = limit.unwrap_or(DEFAULT_SELECTION_LIMIT).clamp(1, MAX_FACE_LIMIT);

        let ids = face_ids.clone();
        let selected = self.db.run(move |conn| query::get_faces(conn, &ids)).await?;
        let queries: Vec<Vec<f32>> = selected.into_iter().filter_map(|f| f.embedding).collect();
        if queries.is_empty() {
            tracing::debug!(selected = face_ids.len(), "No selected face has an embedding");
            return Ok(SelectionResult { similar_faces: Vec::new(), used_threshold });
        }

        let min_confidence = self.settings.confidence_threshold().await?;
        let hits = self
            .store
            .find_nearest(NearestQuery {
                queries,
                threshold: used_threshold,
                limit,
                exclude_ids: face_ids,
                min_confidence,
                unassigned_only: true,
            })
            .await?;
        self.stats.inc_searches();
        let similar_faces = self.decorate(hits, false).await?;
        Ok(SelectionResult { similar_faces, used_threshold })
    }

    /// Faces in any assignment state similar to one anchor face.
    pub async fn similar_to_face(
        &self,
        face_id: i64,
        threshold: Option<f32>,
        limit: Option<usize>,
    ) -> Result<FaceSimilarResult> {
        let used_threshold = self.settings.resolve_similarity(threshold).await?;
        let limit = limit.unwrap_or(DEFAULT_FACE_LIMIT).clamp(1, MAX_FACE_LIMIT);

        let anchor = self
            .db
            .run(move |conn| query::get_face(conn, face_id))
            .await?
            .ok_or_else(|| FaceError::face_not_found(face_id))?;
        let embedding = anchor.embedding.ok_or(FaceError::NoEmbeddingData { face_id })?;

        let min_confidence = self.settings.confidence_threshold().await?;
        let mut hits = self
            .store
            .find_nearest_for_vector(embedding, used_threshold, TOTAL_FOUND_CAP, Some(face_id), min_confidence)
            .await?;
        self.stats.inc_searches();
        let total_found = hits.len();
        hits.truncate(limit);
        let similar_faces = self.decorate(hits, true).await?;
        let returned = similar_faces.len();
        Ok(FaceSimilarResult { similar_faces, used_threshold, total_found, returned })
    }

    /// Attaches face, photo and (optionally) person context, preserving rank order.
    async fn decorate(&self, hits: Vec<Neighbor>, with_person: bool) -> Result<Vec<SimilarFace>> {
        if hits.is_empty() {
            return Ok(Vec::new());
        }
        self.db
            .run(move |conn| {
                let ids: Vec<i64> = hits.iter().map(|h| h.face_id).collect();
                let faces: HashMap<i64, _> = query::get_faces(conn, &ids)?.into_iter().map(|f| (f.id, f)).collect();
                let mut photo_ids: Vec<i64> = faces.values().map(|f| f.photo_id).collect();
                photo_ids.sort_unstable();
                photo_ids.dedup();
                let photos = query::photo_refs(conn, &photo_ids)?;
                let persons = if with_person {
                    let mut person_ids: Vec<i64> = faces.values().filter_map(|f| f.person_id).collect();
                    person_ids.sort_unstable();
                    person_ids.dedup();
                    query::person_refs(conn, &person_ids)?
                } else {
                    HashMap::new()
                };

                let out = hits
                    .into_iter()
                    .filter_map(|hit| {
                        // Rows deleted between scoring and decoration drop out.
                        let face = faces.get(&hit.face_id)?;
                        Some(SimilarFace {
                            id: face.id,
                            bounding_box: face.bounding_box,
                            confidence: face.confidence,
                            ignored: face.ignored,
                            photo: photos.get(&face.photo_id).cloned(),
                            person: face.person_id.and_then(|pid| persons.get(&pid).cloned()),
                            similarity: hit.similarity,
                        })
                    })
                    .collect();
                Ok(out)
            })
            .await
    }
}
