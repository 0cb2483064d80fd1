pub mod handlers;
pub mod handlers_cluster;
pub mod handlers_face;
pub mod routes;

use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::json;

use crate::error::FaceError;

/// Wrapper that turns a `FaceError` into a JSON error response.
pub struct ApiError(pub FaceError);

impl From<FaceError> for ApiError {
    fn from(e: FaceError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.0.status_code();
        let status_code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status_code.is_server_error() {
            tracing::error!(error = %self.0, status, "server error");
        } else if status_code.is_client_error() {
            tracing::warn!(error = %self.0, status, "client error");
        }
        let body = json!({
            "error": self.0.to_string(),
            "kind": self.0.kind(),
        });
        (status_code, axum::Json(body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError(FaceError::invalid(format!("invalid request body: {}", rejection.body_text())))
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError(FaceError::invalid(format!("invalid query: {}", rejection.body_text())))
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError(FaceError::invalid(format!("invalid path: {}", rejection.body_text())))
    }
}

/// `axum::Json` extractor whose rejections carry the `{error, kind}` body.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Query), rejection(ApiError))]
pub struct ApiQuery<T>(pub T);

#[derive(FromRequestParts)]
#[from_request(via(axum::extract::Path), rejection(ApiError))]
pub struct ApiPath<T>(pub T);

pub type ApiResult<T> = std::result::Result<axum::Json<T>, ApiError>;

/// Body shared by every endpoint that takes a list of face ids.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceIdsBody {
    #[serde(default)]
    pub face_ids: Vec<i64>,
}
