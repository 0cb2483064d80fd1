//! Person/face membership: assignment, merging, removal and duplicate suggestions.
//!
//! Every mutation validates all referenced ids before touching any row and
//! runs its row changes in one SQLite transaction. Prototype refresh happens
//! afterwards, outside the per-person lock, and is best-effort.

use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;

use crate::db::{query, writer, Db};
use crate::error::{FaceError, Result};
use crate::faces::duplicates::{self, ConfidenceTier};
use crate::faces::prototype::{compute_prototype, PrototypeEngine, PrototypeSummary};
use crate::faces::settings::SettingsStore;
use crate::faces::store::EmbeddingStore;
use crate::faces::vector::{cosine_similarity, validate_threshold};
use crate::models::face::{Face, Person};
use crate::stats::Stats;
use crate::utils::config::ClusterSettings;

pub const DEFAULT_NAME_THRESHOLD: f32 = 0.8;
const PERSON_DETAIL_FACES: i64 = 500;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignResult {
    pub success: bool,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPerson {
    pub person_id: i64,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeResult {
    pub success: bool,
    pub target_person_id: i64,
    pub merged_person_ids: Vec<i64>,
    pub faces_moved: usize,
    pub face_count: i64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResult {
    pub deleted_people: usize,
    pub unassigned_faces: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonDetail {
    #[serde(flatten)]
    pub person: Person,
    pub faces: Vec<Face>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PossibleDuplicate {
    pub id: i64,
    pub name: Option<String>,
    pub confirmed: bool,
    pub face_count: i64,
    pub preview_face_id: Option<i64>,
    pub best_similarity: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PossibleDuplicates {
    pub duplicates: Vec<PossibleDuplicate>,
    pub used_threshold: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonBrief {
    pub id: i64,
    pub name: Option<String>,
    pub confirmed: bool,
    pub face_count: i64,
}

impl From<&Person> for PersonBrief {
    fn from(p: &Person) -> Self {
        Self { id: p.id, name: p.name.clone(), confirmed: p.confirmed, face_count: p.face_count }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateGroup {
    pub persons: Vec<PersonBrief>,
    pub name_similarity: Option<f32>,
    pub face_similarity: Option<f32>,
    pub combined_score: f32,
    pub confidence: ConfidenceTier,
    pub suggested_target_id: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateStats {
    pub total_persons: usize,
    pub pairs_compared: usize,
    pub candidates: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub name_threshold: f32,
    pub face_threshold: f32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateReport {
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub stats: DuplicateStats,
}

fn dedup_ids(ids: &[i64]) -> Vec<i64> {
    let mut out = ids.to_vec();
    out.sort_unstable();
    out.dedup();
    out
}

fn require_ids(ids: &[i64], what: &str) -> Result<Vec<i64>> {
    if ids.is_empty() {
        return Err(FaceError::invalid(format!("{what} must not be empty")));
    }
    Ok(dedup_ids(ids))
}

#[derive(Clone)]
pub struct ClusterManager {
    db: Db,
    store: Arc<dyn EmbeddingStore>,
    prototypes: PrototypeEngine,
    settings: SettingsStore,
    config: ClusterSettings,
    stats: Arc<Stats>,
}

impl ClusterManager {
    pub fn new(
        db: Db,
        store: Arc<dyn EmbeddingStore>,
        prototypes: PrototypeEngine,
        settings: SettingsStore,
        config: ClusterSettings,
        stats: Arc<Stats>,
    ) -> Self {
        Self { db, store, prototypes, settings, config, stats }
    }

    pub fn prototypes(&self) -> &PrototypeEngine {
        &self.prototypes
    }

    // Reads

    pub async fn list_persons(&self) -> Result<Vec<Person>> {
        self.db.run(|conn| query::list_persons(conn)).await
    }

    pub async fn get_person(&self, person_id: i64) -> Result<PersonDetail> {
        self.db
            .run(move |conn| {
                let person = query::get_person(conn, person_id)?.ok_or(FaceError::person_not_found(person_id))?;
                let faces = query::list_person_faces(conn, person_id, PERSON_DETAIL_FACES)?;
                Ok(PersonDetail { person, faces })
            })
            .await
    }

    pub async fn list_unassigned(&self, offset: i64, limit: i64) -> Result<Vec<Face>> {
        let limit = limit.clamp(1, 1000);
        self.db.run(move |conn| query::list_unassigned_faces(conn, offset, limit)).await
    }

    // Assignment

    /// Assigns each still-unassigned face to the person. Faces that already
    /// belong to someone are skipped, so repeating the call is a no-op.
    pub async fn add_faces_to_person(&self, person_id: i64, face_ids: &[i64]) -> Result<AssignResult> {
        let face_ids = require_ids(face_ids, "faceIds")?;
        let guard = self.prototypes.locks().lock(person_id).await;
        let outcome = self
            .db
            .run(move |conn| {
                if query::get_person(conn, person_id)?.is_none() {
                    return Err(FaceError::person_not_found(person_id).into());
                }
                let existing = query::existing_face_ids(conn, &face_ids)?;
                if let Some(missing) = face_ids.iter().find(|id| !existing.contains(*id)) {
                    return Err(FaceError::face_not_found(*missing).into());
                }
                writer::assign_faces_to_person(conn, person_id, &face_ids)
            })
            .await?;
        drop(guard);

        let count = outcome.assigned.len();
        if count > 0 {
            self.stats.inc_faces_assigned(count as u64);
            self.prototypes.refresh(&[person_id]).await;
        }
        tracing::debug!(person_id, count, "Faces assigned");
        Ok(AssignResult { success: true, count })
    }

    /// Creates a person seeded with the given faces; the prototype is computed before returning.
    pub async fn create_person_with_faces(&self, name: Option<String>, face_ids: &[i64]) -> Result<CreatedPerson> {
        let face_ids = require_ids(face_ids, "faceIds")?;
        let (person_id, outcome) = self
            .db
            .run(move |conn| {
                let existing = query::existing_face_ids(conn, &face_ids)?;
                if let Some(missing) = face_ids.iter().find(|id| !existing.contains(*id)) {
                    return Err(FaceError::face_not_found(*missing).into());
                }
                writer::create_person_with_faces(conn, name.as_deref(), &face_ids)
            })
            .await?;
        self.stats.inc_persons_created(1);
        self.stats.inc_faces_assigned(outcome.assigned.len() as u64);
        self.prototypes.refresh(&[person_id]).await;
        Ok(CreatedPerson { person_id, count: outcome.assigned.len() })
    }

    /// Moves every face of `source_ids` into `target_id` and deletes the sources.
    pub async fn merge_persons(&self, target_id: i64, source_ids: &[i64]) -> Result<MergeResult> {
        let sources = require_ids(source_ids, "sourcePersonIds")?;
        if sources.contains(&target_id) {
            return Err(FaceError::invalid("target person cannot be one of the sources"));
        }
        let mut all = sources.clone();
        all.push(target_id);
        let guards = self.prototypes.locks().lock_many(&all).await;

        let merge_sources = sources.clone();
        let outcome = self
            .db
            .run(move |conn| {
                if let Some(&missing) = query::missing_person_ids(conn, &all)?.first() {
                    return Err(FaceError::person_not_found(missing).into());
                }
                writer::merge_persons(conn, target_id, &merge_sources)
            })
            .await?;
        drop(guards);

        self.stats.inc_persons_merged(outcome.persons_removed as u64);
        self.prototypes.refresh(&[target_id]).await;
        tracing::info!(
            target_id,
            sources = ?sources,
            faces_moved = outcome.faces_moved,
            "Persons merged"
        );
        Ok(MergeResult {
            success: true,
            target_person_id: target_id,
            merged_person_ids: sources,
            faces_moved: outcome.faces_moved,
            face_count: outcome.face_count,
        })
    }

    pub async fn delete_person(&self, person_id: i64) -> Result<DeleteResult> {
        let guard = self.prototypes.locks().lock(person_id).await;
        let unassigned = self
            .db
            .run(move |conn| {
                if query::get_person(conn, person_id)?.is_none() {
                    return Err(FaceError::person_not_found(person_id).into());
                }
                writer::delete_person(conn, person_id)
            })
            .await?;
        drop(guard);
        tracing::info!(person_id, unassigned, "Person deleted");
        Ok(DeleteResult { deleted_people: 1, unassigned_faces: unassigned })
    }

    pub async fn delete_all_people(&self) -> Result<DeleteResult> {
        let (deleted_people, unassigned_faces) = self.db.run(|conn| writer::delete_all_people(conn)).await?;
        tracing::info!(deleted_people, unassigned_faces, "All people deleted");
        Ok(DeleteResult { deleted_people, unassigned_faces })
    }

    pub async fn ignore_faces(&self, face_ids: &[i64]) -> Result<usize> {
        self.set_ignored(face_ids, true).await
    }

    pub async fn unignore_faces(&self, face_ids: &[i64]) -> Result<usize> {
        self.set_ignored(face_ids, false).await
    }

    async fn set_ignored(&self, face_ids: &[i64], ignored: bool) -> Result<usize> {
        let face_ids = require_ids(face_ids, "faceIds")?;
        let (updated, affected) = self
            .db
            .run(move |conn| {
                let affected = query::persons_of_faces(conn, &face_ids)?;
                let updated = writer::set_faces_ignored(conn, &face_ids, ignored)?;
                writer::recount_persons(conn, &affected)?;
                Ok((updated, affected))
            })
            .await?;
        if updated > 0 {
            self.prototypes.refresh(&affected).await;
        }
        Ok(updated)
    }

    /// Unassigns the given faces from one person; returns `(removed, face_count)`.
    pub async fn remove_faces_from_person(&self, person_id: i64, face_ids: &[i64]) -> Result<(usize, i64)> {
        let face_ids = require_ids(face_ids, "faceIds")?;
        let guard = self.prototypes.locks().lock(person_id).await;
        let (removed, face_count) = self
            .db
            .run(move |conn| {
                if query::get_person(conn, person_id)?.is_none() {
                    return Err(FaceError::person_not_found(person_id).into());
                }
                let removed = writer::unassign_faces_from_person(conn, person_id, &face_ids)?;
                let count = query::get_person(conn, person_id)?.map(|p| p.face_count).unwrap_or(0);
                Ok((removed, count))
            })
            .await?;
        drop(guard);
        if removed > 0 {
            self.prototypes.refresh(&[person_id]).await;
        }
        Ok((removed, face_count))
    }

    pub async fn delete_faces(&self, face_ids: &[i64]) -> Result<usize> {
        let face_ids = require_ids(face_ids, "faceIds")?;
        let (deleted, affected) = self
            .db
            .run(move |conn| {
                let affected = query::persons_of_faces(conn, &face_ids)?;
                let deleted = writer::delete_faces(conn, &face_ids)?;
                writer::recount_persons(conn, &affected)?;
                Ok((deleted, affected))
            })
            .await?;
        self.prototypes.refresh(&affected).await;
        Ok(deleted)
    }

    pub async fn update_person(&self, person_id: i64, name: Option<Option<String>>, confirmed: Option<bool>) -> Result<Person> {
        self.db
            .run(move |conn| {
                let name_ref = name.as_ref().map(|n| n.as_deref());
                if !writer::update_person(conn, person_id, name_ref, confirmed)? {
                    return Err(FaceError::person_not_found(person_id).into());
                }
                let person = query::get_person(conn, person_id)?.ok_or(FaceError::person_not_found(person_id))?;
                Ok(person)
            })
            .await
    }

    pub async fn recount_all(&self) -> Result<usize> {
        let updated = self.db.run(|conn| writer::recount_all(conn)).await?;
        if updated > 0 {
            tracing::info!(updated, "Repaired person face counts");
        }
        Ok(updated)
    }

    pub async fn recompute_prototype(&self, person_id: i64) -> Result<Option<PrototypeSummary>> {
        let exists = self.db.run(move |conn| Ok(query::get_person(conn, person_id)?.is_some())).await?;
        if !exists {
            return Err(FaceError::person_not_found(person_id));
        }
        self.prototypes.recompute(person_id).await
    }

    // Duplicate suggestions

    /// Other persons whose representative vector is close to this person's.
    pub async fn possible_duplicates(&self, person_id: i64, threshold: Option<f32>) -> Result<PossibleDuplicates> {
        let used_threshold = self.settings.resolve_similarity(threshold).await?;
        let exists = self.db.run(move |conn| Ok(query::get_person(conn, person_id)?.is_some())).await?;
        if !exists {
            return Err(FaceError::person_not_found(person_id));
        }
        let Some(target) = self.prototypes.representative(person_id).await? else {
            return Ok(PossibleDuplicates { duplicates: Vec::new(), used_threshold });
        };

        let total = self.db.run(|conn| query::count_persons(conn)).await?;
        let mut scores: HashMap<i64, f32> = self
            .store
            .find_nearest_prototypes(target.clone(), used_threshold, total.max(1) as usize, Some(person_id))
            .await?
            .into_iter()
            .map(|m| (m.person_id, m.similarity))
            .collect();

        let sample_size = self.prototypes.sample_size();
        let preview_sample = self.config.duplicate_face_sample;
        let duplicates = self
            .db
            .run(move |conn| {
                // Persons without a stored prototype fall back to their top-face mean.
                for candidate in query::persons_without_prototype(conn, Some(person_id))? {
                    let samples = query::get_person_sample_embeddings(conn, candidate, sample_size)?;
                    let vectors: Vec<Vec<f32>> = samples.into_iter().map(|(_, v)| v).collect();
                    if let Some((fallback, _)) = compute_prototype(&vectors) {
                        let sim = cosine_similarity(&target, &fallback);
                        if sim >= used_threshold {
                            scores.insert(candidate, sim);
                        }
                    }
                }

                let mut out = Vec::with_capacity(scores.len());
                for (candidate, best_similarity) in scores {
                    let Some(person) = query::get_person(conn, candidate)? else {
                        continue;
                    };
                    let preview_face_id = query::get_person_sample_embeddings(conn, candidate, preview_sample)?
                        .into_iter()
                        .map(|(id, v)| (id, cosine_similarity(&target, &v)))
                        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal).then(b.0.cmp(&a.0)))
                        .map(|(id, _)| id);
                    out.push(PossibleDuplicate {
                        id: person.id,
                        name: person.name,
                        confirmed: person.confirmed,
                        face_count: person.face_count,
                        preview_face_id,
                        best_similarity,
                    });
                }
                out.sort_by(|a, b| {
                    b.best_similarity
                        .partial_cmp(&a.best_similarity)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then(a.id.cmp(&b.id))
                });
                Ok(out)
            })
            .await?;
        self.stats.inc_searches();
        Ok(PossibleDuplicates { duplicates, used_threshold })
    }

    /// All-pairs duplicate scan over names and sampled faces.
    pub async fn detect_duplicate_people(
        &self,
        name_threshold: Option<f32>,
        face_threshold: Option<f32>,
    ) -> Result<DuplicateReport> {
        let name_threshold = validate_threshold("nameThreshold", name_threshold.unwrap_or(DEFAULT_NAME_THRESHOLD))?;
        let face_threshold = self.settings.resolve_similarity(face_threshold).await?;
        let sample = self.config.duplicate_face_sample;
        let bands = self.config.bands;

        let people = self
            .db
            .run(move |conn| {
                let persons = query::list_persons(conn)?;
                let mut out = Vec::with_capacity(persons.len());
                for person in persons {
                    let faces: Vec<Vec<f32>> = query::get_person_sample_embeddings(conn, person.id, sample)?
                        .into_iter()
                        .map(|(_, v)| v)
                        .collect();
                    out.push((person, faces));
                }
                Ok(out)
            })
            .await?;

        let n = people.len();
        let people_ref = &people;
        let mut groups: Vec<DuplicateGroup> = (0..n)
            .into_par_iter()
            .flat_map_iter(move |i| {
                (i + 1..n).filter_map(move |j| {
                    let (a, a_faces) = &people_ref[i];
                    let (b, b_faces) = &people_ref[j];
                    let name = duplicates::name_similarity(a.name.as_deref(), b.name.as_deref());
                    let face = duplicates::face_similarity(a_faces, b_faces);
                    if !duplicates::is_candidate(name, face, name_threshold, face_threshold) {
                        return None;
                    }
                    Some(DuplicateGroup {
                        persons: vec![PersonBrief::from(a), PersonBrief::from(b)],
                        name_similarity: name,
                        face_similarity: face,
                        combined_score: duplicates::combined_score(name, face),
                        confidence: duplicates::classify(name, face, &bands),
                        suggested_target_id: duplicates::suggested_target(
                            (a.id, a.confirmed, a.face_count),
                            (b.id, b.confirmed, b.face_count),
                        ),
                    })
                })
            })
            .collect();

        let tier_rank = |t: ConfidenceTier| match t {
            ConfidenceTier::High => 0,
            ConfidenceTier::Medium => 1,
            ConfidenceTier::Low => 2,
        };
        groups.sort_by(|a, b| {
            tier_rank(a.confidence)
                .cmp(&tier_rank(b.confidence))
                .then(b.combined_score.partial_cmp(&a.combined_score).unwrap_or(std::cmp::Ordering::Equal))
                .then(a.persons[0].id.cmp(&b.persons[0].id))
                .then(a.persons[1].id.cmp(&b.persons[1].id))
        });

        let mut stats = DuplicateStats {
            total_persons: n,
            pairs_compared: n * n.saturating_sub(1) / 2,
            candidates: groups.len(),
            name_threshold,
            face_threshold,
            ..Default::default()
        };
        for g in &groups {
            match g.confidence {
                ConfidenceTier::High => stats.high += 1,
                ConfidenceTier::Medium => stats.medium += 1,
                ConfidenceTier::Low => stats.low += 1,
            }
        }
        tracing::info!(persons = n, candidates = stats.candidates, "Duplicate person scan finished");
        Ok(DuplicateReport { duplicate_groups: groups, stats })
    }
}
