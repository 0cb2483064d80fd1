use thiserror::Error;

#[derive(Error, Debug)]
pub enum FaceError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },

    #[error("face {face_id} has no usable embedding")]
    NoEmbeddingData { face_id: i64 },

    // Storage call failed; the caller decides whether to retry.
    #[error("store error: {0}")]
    Store(String),

    #[error("job not found: {job_id}")]
    JobNotFound { job_id: String },

    #[error("job already running: {job_id}")]
    JobAlreadyRunning { job_id: String },
}

impl FaceError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        FaceError::InvalidArgument(msg.into())
    }

    pub fn person_not_found(id: i64) -> Self {
        FaceError::NotFound { entity: "person", id }
    }

    pub fn face_not_found(id: i64) -> Self {
        FaceError::NotFound { entity: "face", id }
    }

    /// Machine-readable error kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            FaceError::InvalidArgument(_) => "invalid_argument",
            FaceError::NotFound { .. } => "not_found",
            FaceError::NoEmbeddingData { .. } => "no_embedding_data",
            FaceError::Store(_) => "transient_store_error",
            FaceError::JobNotFound { .. } => "job_not_found",
            FaceError::JobAlreadyRunning { .. } => "job_already_running",
        }
    }

    pub fn status_code(&self) -> u16 {
        match self {
            FaceError::InvalidArgument(_) => 400,
            FaceError::NotFound { .. } | FaceError::JobNotFound { .. } => 404,
            FaceError::JobAlreadyRunning { .. } => 409,
            FaceError::NoEmbeddingData { .. } => 422,
            FaceError::Store(_) => 503,
        }
    }
}

impl From<anyhow::Error> for FaceError {
    fn from(e: anyhow::Error) -> Self {
        // Domain errors raised inside a blocking closure travel through anyhow.
        match e.downcast::<FaceError>() {
            Ok(inner) => inner,
            Err(e) => FaceError::Store(format!("{e:#}")),
        }
    }
}

impl From<rusqlite::Error> for FaceError {
    fn from(e: rusqlite::Error) -> Self {
        FaceError::Store(e.to_string())
    }
}

impl From<r2d2::Error> for FaceError {
    fn from(e: r2d2::Error) -> Self {
        FaceError::Store(format!("connection pool: {e}"))
    }
}

impl From<tokio::task::JoinError> for FaceError {
    fn from(e: tokio::task::JoinError) -> Self {
        FaceError::Store(format!("blocking task failed: {e}"))
    }
}

pub type Result<T> = std::result::Result<T, FaceError>;
