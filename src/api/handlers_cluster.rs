use std::sync::Arc;
use axum::{body::Bytes, extract::State, Json};
use serde::Deserialize;

use crate::AppState;
use crate::api::{ApiQuery, ApiResult};
use crate::error::FaceError;
use crate::faces::batch::{JobSnapshot, StartRequest, StartResponse};
use crate::models::job::JobRecord;

const DEFAULT_JOB_LIST: i64 = 20;

pub async fn start_processing(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> ApiResult<StartResponse> {
    // An empty body starts a job with defaults; anything else must parse.
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        StartRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| FaceError::invalid(format!("invalid request body: {e}")))?
    };
    Ok(Json(state.batch.start(req).await?))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobQuery {
    pub job_id: Option<String>,
}

pub async fn processing_status(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<JobQuery>,
) -> ApiResult<JobSnapshot> {
    Ok(Json(state.batch.status(q.job_id).await?))
}

pub async fn cancel_processing(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<JobQuery>,
) -> ApiResult<JobSnapshot> {
    let job_id = q.job_id.ok_or_else(|| FaceError::invalid("jobId is required"))?;
    Ok(Json(state.batch.cancel(&job_id).await?))
}

#[derive(Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
}

pub async fn list_jobs(
    State(state): State<Arc<AppState>>,
    ApiQuery(q): ApiQuery<ListQuery>,
) -> ApiResult<Vec<JobRecord>> {
    let limit = q.limit.unwrap_or(DEFAULT_JOB_LIST).clamp(1, 200);
    Ok(Json(state.batch.list(limit).await?))
}
