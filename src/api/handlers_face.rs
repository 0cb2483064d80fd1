use std::sync::Arc;
use axum::{extract::State, Json};
use serde::{Deserialize, Deserializer, Serialize};

use crate::AppState;
use crate::api::{ApiJson, ApiPath, ApiQuery, ApiResult, FaceIdsBody};
use crate::error::FaceError;
use crate::faces::cluster::{
    AssignResult, CreatedPerson, DeleteResult, DuplicateReport, MergeResult, PersonDetail, PossibleDuplicates,
};
use crate::faces::ingest::{self, IngestRequest, IngestResult};
use crate::faces::prototype::PrototypeSummary;
use crate::faces::search::{FaceSimilarResult, SelectionResult};
use crate::models::face::{Face, Person};

const DEFAULT_UNASSIGNED_PAGE: i64 = 100;
const MAX_UNASSIGNED_PAGE: i64 = 1000;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatedFaces {
    pub success: bool,
    pub updated: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletedFaces {
    pub deleted_faces: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedFaces {
    pub success: bool,
    pub removed: usize,
    pub face_count: i64,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Recounted {
    pub updated_persons: usize,
}

// --- search ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarFacesBody {
    #[serde(default)]
    pub face_ids: Vec<i64>,
    pub threshold: Option<f32>,
    pub limit: Option<usize>,
}

pub async fn similar_faces(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<SimilarFacesBody>,
) -> ApiResult<SelectionResult> {
    Ok(Json(state.search.similar_to_selection(body.face_ids, body.threshold, body.limit).await?))
}

#[derive(Deserialize)]
pub struct SimilarQuery {
    pub threshold: Option<f32>,
    pub limit: Option<usize>,
}

pub async fn face_similar(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<SimilarQuery>,
) -> ApiResult<FaceSimilarResult> {
    Ok(Json(state.search.similar_to_face(id, q.threshold, q.limit).await?))
}

// --- faces ---

pub async fn ingest_faces(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<IngestRequest>,
) -> ApiResult<IngestResult> {
    Ok(Json(ingest::ingest(&state.db, body).await?))
}

#[derive(Deserialize)]
pub struct PageQuery {
    pub offset: Option<i64>,
    pub limit: Option<i64>,
}

pub async fn unassigned_faces(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<PageQuery>,
) -> ApiResult<Vec<Face>> {
    let offset = q.offset.unwrap_or(0).max(0);
    let limit = q.limit.unwrap_or(DEFAULT_UNASSIGNED_PAGE).clamp(1, MAX_UNASSIGNED_PAGE);
    Ok(Json(state.cluster.list_unassigned(offset, limit).await?))
}

pub async fn ignore_faces(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<FaceIdsBody>,
) -> ApiResult<UpdatedFaces> {
    let updated = state.cluster.ignore_faces(&body.face_ids).await?;
    Ok(Json(UpdatedFaces { success: true, updated }))
}

pub async fn unignore_faces(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<FaceIdsBody>,
) -> ApiResult<UpdatedFaces> {
    let updated = state.cluster.unignore_faces(&body.face_ids).await?;
    Ok(Json(UpdatedFaces { success: true, updated }))
}

pub async fn delete_faces(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<FaceIdsBody>,
) -> ApiResult<DeletedFaces> {
    let deleted_faces = state.cluster.delete_faces(&body.face_ids).await?;
    Ok(Json(DeletedFaces { deleted_faces }))
}

// --- persons ---

pub async fn list_persons(State(state): State<Arc<AppState>>) -> ApiResult<Vec<Person>> {
    Ok(Json(state.cluster.list_persons().await?))
}

pub async fn get_person(State(state): State<Arc<AppState>>, ApiPath(id): ApiPath<i64>) -> ApiResult<PersonDetail> {
    Ok(Json(state.cluster.get_person(id).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePersonBody {
    pub name: Option<String>,
    #[serde(default)]
    pub face_ids: Vec<i64>,
}

pub async fn create_person(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<CreatePersonBody>,
) -> ApiResult<CreatedPerson> {
    Ok(Json(state.cluster.create_person_with_faces(body.name, &body.face_ids).await?))
}

/// Keeps `null` apart from an absent field so a name can be cleared.
fn present<'de, D>(de: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(de).map(Some)
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePersonBody {
    #[serde(default, deserialize_with = "present")]
    pub name: Option<Option<String>>,
    pub confirmed: Option<bool>,
}

pub async fn update_person(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<UpdatePersonBody>,
) -> ApiResult<Person> {
    Ok(Json(state.cluster.update_person(id, body.name, body.confirmed).await?))
}

pub async fn delete_person(State(state): State<Arc<AppState>>, ApiPath(id): ApiPath<i64>) -> ApiResult<DeleteResult> {
    Ok(Json(state.cluster.delete_person(id).await?))
}

pub async fn add_person_faces(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<FaceIdsBody>,
) -> ApiResult<AssignResult> {
    Ok(Json(state.cluster.add_faces_to_person(id, &body.face_ids).await?))
}

pub async fn remove_person_faces(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiJson(body): ApiJson<FaceIdsBody>,
) -> ApiResult<RemovedFaces> {
    let (removed, face_count) = state.cluster.remove_faces_from_person(id, &body.face_ids).await?;
    Ok(Json(RemovedFaces { success: true, removed, face_count }))
}

pub async fn recompute_prototype(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
) -> ApiResult<Option<PrototypeSummary>> {
    Ok(Json(state.cluster.recompute_prototype(id).await?))
}

pub async fn recount_persons(State(state): State<Arc<AppState>>) -> ApiResult<Recounted> {
    let updated_persons = state.cluster.recount_all().await?;
    Ok(Json(Recounted { updated_persons }))
}

// --- duplicates ---

#[derive(Deserialize)]
pub struct ThresholdQuery {
    pub threshold: Option<f32>,
}

pub async fn possible_duplicates(
    State(state): State<Arc<AppState>>,
    ApiPath(id): ApiPath<i64>,
    ApiQuery(q): ApiQuery<ThresholdQuery>,
) -> ApiResult<PossibleDuplicates> {
    Ok(Json(state.cluster.possible_duplicates(id, q.threshold).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateQuery {
    pub name_threshold: Option<f32>,
    pub face_threshold: Option<f32>,
}

pub async fn detect_duplicates(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<DuplicateQuery>,
) -> ApiResult<DuplicateReport> {
    Ok(Json(state.cluster.detect_duplicate_people(q.name_threshold, q.face_threshold).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeBody {
    pub target_person_id: Option<i64>,
    #[serde(default)]
    pub source_person_ids: Vec<i64>,
}

pub async fn merge_duplicates(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<MergeBody>,
) -> ApiResult<MergeResult> {
    let target = body
        .target_person_id
        .ok_or_else(|| FaceError::invalid("targetPersonId is required"))?;
    Ok(Json(state.cluster.merge_persons(target, &body.source_person_ids).await?))
}

pub async fn delete_all_people(State(state): State<Arc<AppState>>) -> ApiResult<DeleteResult> {
    Ok(Json(state.cluster.delete_all_people().await?))
}
