use axum::{Router, routing::{get, post}};
use std::sync::Arc;
use tower_http::cors::{CorsLayer, AllowOrigin};
use axum::http::Method;
use crate::AppState;
use crate::api::handlers;
use crate::api::handlers_cluster;
use crate::api::handlers_face;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::any())
        .allow_methods(vec![Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(vec![axum::http::header::CONTENT_TYPE, axum::http::header::ACCEPT]);

    Router::new()
        .route("/health", get(handlers::health))
        .route("/stats", get(handlers::stats))
        .route("/faces/settings", get(handlers::get_face_settings).post(handlers::update_face_settings))
        // Faces
        .route("/faces/ingest", post(handlers_face::ingest_faces))
        .route("/faces/unassigned", get(handlers_face::unassigned_faces))
        .route("/faces/ignore", post(handlers_face::ignore_faces))
        .route("/faces/unignore", post(handlers_face::unignore_faces))
        .route("/faces", axum::routing::delete(handlers_face::delete_faces))
        .route("/similar-faces", post(handlers_face::similar_faces))
        .route("/face/:id/similar", get(handlers_face::face_similar))
        // Persons; static segments win over `:id`
        .route("/persons", get(handlers_face::list_persons).post(handlers_face::create_person))
        .route("/persons/recount", post(handlers_face::recount_persons))
        .route(
            "/persons/:id",
            get(handlers_face::get_person)
                .post(handlers_face::update_person)
                .delete(handlers_face::delete_person),
        )
        .route(
            "/persons/:id/faces",
            post(handlers_face::add_person_faces).delete(handlers_face::remove_person_faces),
        )
        .route("/persons/:id/prototype", post(handlers_face::recompute_prototype))
        .route("/persons/:id/possible-duplicates", get(handlers_face::possible_duplicates))
        .route("/person/:id/faces", post(handlers_face::add_person_faces))
        .route("/person/:id/possible-duplicates", get(handlers_face::possible_duplicates))
        .route(
            "/people/duplicates",
            get(handlers_face::detect_duplicates).post(handlers_face::merge_duplicates),
        )
        .route("/people", axum::routing::delete(handlers_face::delete_all_people))
        // Background clustering
        .route(
            "/process-unassigned",
            post(handlers_cluster::start_processing)
                .get(handlers_cluster::processing_status)
                .delete(handlers_cluster::cancel_processing),
        )
        .route("/process-unassigned/jobs", get(handlers_cluster::list_jobs))
        .layer(cors)
        .with_state(state)
}
