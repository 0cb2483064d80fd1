use std::sync::Arc;
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};

use crate::AppState;
use crate::api::{ApiJson, ApiResult};
use crate::db::query;
use crate::faces::settings::Thresholds;
use crate::stats::StatsSnapshot;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub status: &'static str,
    pub version: &'static str,
    pub search_backend: &'static str,
    pub uptime_secs: u64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<Health> {
    Json(Health {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        search_backend: state.store.strategy(),
        uptime_secs: state.started_at.elapsed().as_secs(),
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    pub persons: i64,
    pub assigned_faces: i64,
    pub unassigned_faces: i64,
}

pub async fn stats(State(state): State<Arc<AppState>>) -> ApiResult<StatsResponse> {
    let min_confidence = state.settings.confidence_threshold().await?;
    let (persons, assigned_faces, unassigned_faces) = state
        .db
        .run(move |conn| {
            Ok((
                query::count_persons(conn)?,
                query::count_assigned_faces(conn)?,
                query::count_unassigned_eligible(conn, min_confidence)?,
            ))
        })
        .await?;
    Ok(Json(StatsResponse { counters: state.stats.snapshot(), persons, assigned_faces, unassigned_faces }))
}

pub async fn get_face_settings(State(state): State<Arc<AppState>>) -> ApiResult<Thresholds> {
    Ok(Json(state.settings.thresholds().await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSettings {
    pub similarity_threshold: Option<f32>,
    pub confidence_threshold: Option<f32>,
}

pub async fn update_face_settings(
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<UpdateSettings>,
) -> ApiResult<Thresholds> {
    Ok(Json(state.settings.update(body.similarity_threshold, body.confidence_threshold).await?))
}
