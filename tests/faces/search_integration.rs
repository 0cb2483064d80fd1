#[path = "../common/mod.rs"]
mod common;

use common::{at_angle, axis, seed_face, seed_faces, seed_photo, setup_state};
use nazr_people::error::FaceError;
use nazr_people::utils::config::SearchBackend;

const BACKENDS: [SearchBackend; 2] = [SearchBackend::Linear, SearchBackend::Indexed];

fn angle_for(similarity: f32) -> f32 {
    similarity.acos().to_degrees()
}

#[tokio::test]
async fn test_selection_threshold_separates_dissimilar_face() {
    for backend in BACKENDS {
        let (_tmp, state) = setup_state(backend);
        let e1 = at_angle(0.0, 4);
        let e2 = at_angle(angle_for(0.95), 4);
        let e3 = at_angle(angle_for(0.1), 4);
        let ids = seed_faces(&state.db, &[e1, e2, e3]).await;

        let created = state
            .cluster
            .create_person_with_faces(None, &ids[..2])
            .await
            .unwrap();
        assert_eq!(created.count, 2);
        let detail = state.cluster.get_person(created.person_id).await.unwrap();
        assert_eq!(detail.person.face_count, 2);

        let strict = state.search.similar_to_selection(ids[..2].to_vec(), Some(0.7), None).await.unwrap();
        assert!(strict.similar_faces.iter().all(|f| f.id != ids[2]), "{backend:?}");
        assert_eq!(strict.used_threshold, 0.7);

        let loose = state.search.similar_to_selection(ids[..2].to_vec(), Some(0.05), None).await.unwrap();
        let ids_found: Vec<i64> = loose.similar_faces.iter().map(|f| f.id).collect();
        assert_eq!(ids_found, vec![ids[2]], "{backend:?}");
    }
}

#[tokio::test]
async fn test_selection_records_best_similarity_over_queries() {
    for backend in BACKENDS {
        let (_tmp, state) = setup_state(backend);
        // C is 0.9 from A and 0.5 from B.
        let c_angle = angle_for(0.9);
        let a = at_angle(0.0, 3);
        let b = at_angle(c_angle + 60.0, 3);
        let c = at_angle(c_angle, 3);
        let ids = seed_faces(&state.db, &[a, b, c]).await;

        let res = state.search.similar_to_selection(ids[..2].to_vec(), Some(0.7), None).await.unwrap();
        assert_eq!(res.similar_faces.len(), 1, "{backend:?}");
        let hit = &res.similar_faces[0];
        assert_eq!(hit.id, ids[2]);
        assert!((hit.similarity - 0.9).abs() < 1e-3, "{backend:?}: {}", hit.similarity);
        assert!(hit.photo.is_some());
    }
}

#[tokio::test]
async fn test_selection_skips_ignored_assigned_and_low_confidence_faces() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let query = seed_faces(&state.db, &[axis(0, 3)]).await[0];
    let photo = seed_photo(&state.db, "group.jpg").await;
    let near = at_angle(5.0, 3);
    let visible = seed_face(&state.db, photo, Some(near.clone()), 0.9).await;
    let ignored = seed_face(&state.db, photo, Some(near.clone()), 0.9).await;
    let blurry = seed_face(&state.db, photo, Some(near.clone()), 0.2).await;
    let claimed = seed_face(&state.db, photo, Some(near), 0.9).await;

    state.cluster.ignore_faces(&[ignored]).await.unwrap();
    state.cluster.create_person_with_faces(Some("Ana".into()), &[claimed]).await.unwrap();

    let res = state.search.similar_to_selection(vec![query], Some(0.5), None).await.unwrap();
    let found: Vec<i64> = res.similar_faces.iter().map(|f| f.id).collect();
    assert_eq!(found, vec![visible]);
    assert!(!found.contains(&blurry));
}

#[tokio::test]
async fn test_selection_validation() {
    let (_tmp, state) = setup_state(SearchBackend::Linear);
    let err = state.search.similar_to_selection(vec![], None, None).await.unwrap_err();
    assert!(matches!(err, FaceError::InvalidArgument(_)));

    let ids = seed_faces(&state.db, &[axis(0, 3)]).await;
    let err = state.search.similar_to_selection(ids.clone(), Some(1.5), None).await.unwrap_err();
    assert!(matches!(err, FaceError::InvalidArgument(_)));

    // A selection without embeddings is a soft empty result.
    let photo = seed_photo(&state.db, "blank.jpg").await;
    let bare = seed_face(&state.db, photo, None, 0.9).await;
    let res = state.search.similar_to_selection(vec![bare], Some(0.1), None).await.unwrap();
    assert!(res.similar_faces.is_empty());
}

#[tokio::test]
async fn test_face_similar_includes_person_info_and_counts() {
    for backend in BACKENDS {
        let (_tmp, state) = setup_state(backend);
        let embeddings: Vec<Vec<f32>> = (0..6).map(|i| at_angle(i as f32 * 3.0, 8)).collect();
        let ids = seed_faces(&state.db, &embeddings).await;
        let person = state.cluster.create_person_with_faces(Some("Rami".into()), &[ids[1]]).await.unwrap();

        let res = state.search.similar_to_face(ids[0], Some(0.5), Some(3)).await.unwrap();
        assert_eq!(res.total_found, 5, "{backend:?}");
        assert_eq!(res.returned, 3);
        let found: Vec<i64> = res.similar_faces.iter().map(|f| f.id).collect();
        assert_eq!(found, vec![ids[1], ids[2], ids[3]]);
        let tagged = res.similar_faces[0].person.as_ref().expect("person info");
        assert_eq!(tagged.id, person.person_id);
        assert_eq!(tagged.name.as_deref(), Some("Rami"));
        assert!(res.similar_faces[1].person.is_none());
    }
}

#[tokio::test]
async fn test_face_similar_errors() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let err = state.search.similar_to_face(9999, None, None).await.unwrap_err();
    assert!(matches!(err, FaceError::NotFound { entity: "face", id: 9999 }));

    let photo = seed_photo(&state.db, "no_embedding.jpg").await;
    let bare = seed_face(&state.db, photo, None, 0.9).await;
    let err = state.search.similar_to_face(bare, None, None).await.unwrap_err();
    assert!(matches!(err, FaceError::NoEmbeddingData { face_id } if face_id == bare));
}

#[tokio::test]
async fn test_raising_threshold_never_grows_results() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let embeddings: Vec<Vec<f32>> = (0..24).map(|i| at_angle(i as f32 * 7.5, 6)).collect();
    let ids = seed_faces(&state.db, &embeddings).await;

    let mut previous = usize::MAX;
    for t in [0.0, 0.2, 0.4, 0.6, 0.8, 0.95] {
        let res = state.search.similar_to_face(ids[0], Some(t), Some(500)).await.unwrap();
        assert!(res.total_found <= previous, "threshold {t}");
        previous = res.total_found;
    }
}
