#[path = "../common/mod.rs"]
mod common;

use common::{at_angle, axis, seed_face, seed_faces, seed_person, seed_photo, setup_state};
use nazr_people::db::{query, writer};
use nazr_people::error::FaceError;
use nazr_people::faces::duplicates::ConfidenceTier;
use nazr_people::faces::vector::l2_norm;
use nazr_people::utils::config::SearchBackend;

fn angle_for(similarity: f32) -> f32 {
    similarity.acos().to_degrees()
}

async fn person_of(state: &nazr_people::AppState, face_id: i64) -> Option<i64> {
    state
        .db
        .run(move |conn| Ok(query::get_face(conn, face_id)?.and_then(|f| f.person_id)))
        .await
        .unwrap()
}

#[tokio::test]
async fn test_add_faces_twice_counts_once() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let ids = seed_faces(&state.db, &[axis(0, 4)]).await;
    let person = seed_person(&state.db, Some("Lena"), false).await;

    let first = state.cluster.add_faces_to_person(person, &ids).await.unwrap();
    let second = state.cluster.add_faces_to_person(person, &ids).await.unwrap();
    assert_eq!(first.count, 1);
    assert_eq!(second.count, 0);

    let detail = state.cluster.get_person(person).await.unwrap();
    assert_eq!(detail.person.face_count, 1);
    assert!(detail.person.has_prototype);
    assert_eq!(person_of(&state, ids[0]).await, Some(person));
}

#[tokio::test]
async fn test_add_faces_validates_before_mutating() {
    let (_tmp, state) = setup_state(SearchBackend::Linear);
    let ids = seed_faces(&state.db, &[axis(0, 4)]).await;
    let person = seed_person(&state.db, None, false).await;

    let err = state.cluster.add_faces_to_person(person, &[]).await.unwrap_err();
    assert!(matches!(err, FaceError::InvalidArgument(_)));

    let err = state.cluster.add_faces_to_person(4242, &ids).await.unwrap_err();
    assert!(matches!(err, FaceError::NotFound { entity: "person", id: 4242 }));

    let err = state.cluster.add_faces_to_person(person, &[ids[0], 777]).await.unwrap_err();
    assert!(matches!(err, FaceError::NotFound { entity: "face", id: 777 }));
    assert_eq!(person_of(&state, ids[0]).await, None);
}

#[tokio::test]
async fn test_ignored_face_is_assigned_but_not_counted() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let ids = seed_faces(&state.db, &[axis(0, 4), axis(1, 4)]).await;
    state.cluster.ignore_faces(&[ids[1]]).await.unwrap();
    let person = seed_person(&state.db, None, false).await;

    let res = state.cluster.add_faces_to_person(person, &ids).await.unwrap();
    assert_eq!(res.count, 2);
    let detail = state.cluster.get_person(person).await.unwrap();
    assert_eq!(detail.person.face_count, 1);

    // Unignoring recounts the person.
    state.cluster.unignore_faces(&[ids[1]]).await.unwrap();
    assert_eq!(state.cluster.get_person(person).await.unwrap().person.face_count, 2);
}

#[tokio::test]
async fn test_merge_moves_faces_and_removes_sources() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let ids = seed_faces(&state.db, &[axis(0, 4), at_angle(10.0, 4), at_angle(20.0, 4), at_angle(30.0, 4)]).await;
    let target = state.cluster.create_person_with_faces(Some("Ines".into()), &ids[..1]).await.unwrap().person_id;
    let s1 = state.cluster.create_person_with_faces(None, &ids[1..3]).await.unwrap().person_id;
    let s2 = state.cluster.create_person_with_faces(None, &ids[3..]).await.unwrap().person_id;

    let res = state.cluster.merge_persons(target, &[s1, s2, s1]).await.unwrap();
    assert_eq!(res.faces_moved, 3);
    assert_eq!(res.face_count, 4);
    assert_eq!(res.merged_person_ids, vec![s1.min(s2), s1.max(s2)]);

    for id in &ids {
        assert_eq!(person_of(&state, *id).await, Some(target));
    }
    for gone in [s1, s2] {
        let err = state.cluster.get_person(gone).await.unwrap_err();
        assert!(matches!(err, FaceError::NotFound { .. }));
    }
    let remaining = state.cluster.list_persons().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert!(remaining[0].has_prototype);
}

#[tokio::test]
async fn test_merge_into_missing_target_changes_nothing() {
    let (_tmp, state) = setup_state(SearchBackend::Linear);
    let ids = seed_faces(&state.db, &[axis(0, 4)]).await;
    let source = state.cluster.create_person_with_faces(None, &ids).await.unwrap().person_id;

    let err = state.cluster.merge_persons(9001, &[source]).await.unwrap_err();
    assert!(matches!(err, FaceError::NotFound { entity: "person", id: 9001 }));
    assert_eq!(person_of(&state, ids[0]).await, Some(source));
    assert_eq!(state.cluster.get_person(source).await.unwrap().person.face_count, 1);

    let err = state.cluster.merge_persons(source, &[]).await.unwrap_err();
    assert!(matches!(err, FaceError::InvalidArgument(_)));
    let err = state.cluster.merge_persons(source, &[source]).await.unwrap_err();
    assert!(matches!(err, FaceError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_delete_all_people_accounting() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let ids = seed_faces(&state.db, &[axis(0, 4), axis(1, 4), axis(2, 4), axis(3, 4)]).await;
    state.cluster.create_person_with_faces(None, &ids[..2]).await.unwrap();
    state.cluster.create_person_with_faces(None, &ids[2..3]).await.unwrap();
    seed_person(&state.db, Some("Empty"), true).await;

    let res = state.cluster.delete_all_people().await.unwrap();
    assert_eq!(res.deleted_people, 3);
    assert_eq!(res.unassigned_faces, 3);

    assert!(state.cluster.list_persons().await.unwrap().is_empty());
    let assigned = state.db.run(|conn| query::count_assigned_faces(conn)).await.unwrap();
    assert_eq!(assigned, 0);
}

#[tokio::test]
async fn test_delete_person_unassigns_faces() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let ids = seed_faces(&state.db, &[axis(0, 4), axis(1, 4)]).await;
    let person = state.cluster.create_person_with_faces(None, &ids).await.unwrap().person_id;

    let res = state.cluster.delete_person(person).await.unwrap();
    assert_eq!(res.deleted_people, 1);
    assert_eq!(res.unassigned_faces, 2);
    assert_eq!(person_of(&state, ids[0]).await, None);
    let err = state.cluster.delete_person(person).await.unwrap_err();
    assert!(matches!(err, FaceError::NotFound { .. }));
}

#[tokio::test]
async fn test_remove_and_delete_faces_recount() {
    let (_tmp, state) = setup_state(SearchBackend::Linear);
    let ids = seed_faces(&state.db, &[axis(0, 4), axis(1, 4), axis(2, 4)]).await;
    let person = state.cluster.create_person_with_faces(None, &ids).await.unwrap().person_id;

    let (removed, count) = state.cluster.remove_faces_from_person(person, &[ids[0]]).await.unwrap();
    assert_eq!((removed, count), (1, 2));
    assert_eq!(person_of(&state, ids[0]).await, None);

    let deleted = state.cluster.delete_faces(&[ids[1]]).await.unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(state.cluster.get_person(person).await.unwrap().person.face_count, 1);

    // Removing the last face clears the prototype.
    state.cluster.remove_faces_from_person(person, &[ids[2]]).await.unwrap();
    let detail = state.cluster.get_person(person).await.unwrap();
    assert_eq!(detail.person.face_count, 0);
    assert!(!detail.person.has_prototype);
}

#[tokio::test]
async fn test_prototype_recompute_is_deterministic_and_normalized() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let ids = seed_faces(&state.db, &[vec![3.0, 0.0, 0.0], vec![0.0, 4.0, 0.0], vec![1.0, 1.0, 1.0]]).await;
    let person = state.cluster.create_person_with_faces(None, &ids).await.unwrap().person_id;

    let first = state.cluster.recompute_prototype(person).await.unwrap().unwrap();
    let a = state.db.run(move |conn| query::get_person_prototype(conn, person)).await.unwrap().unwrap();
    let second = state.cluster.recompute_prototype(person).await.unwrap().unwrap();
    let b = state.db.run(move |conn| query::get_person_prototype(conn, person)).await.unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.sample_size, 3);
    assert_eq!(first.dimension, 3);
    assert_eq!(a, b);
    assert!((l2_norm(&a) - 1.0).abs() < 1e-5);

    let empty = seed_person(&state.db, None, false).await;
    assert_eq!(state.cluster.recompute_prototype(empty).await.unwrap(), None);
    let err = state.cluster.recompute_prototype(31337).await.unwrap_err();
    assert!(matches!(err, FaceError::NotFound { .. }));
}

#[tokio::test]
async fn test_update_person_and_recount_all() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let ids = seed_faces(&state.db, &[axis(0, 4), axis(1, 4)]).await;
    let person = state.cluster.create_person_with_faces(None, &ids).await.unwrap().person_id;

    let updated = state
        .cluster
        .update_person(person, Some(Some("  Maya ".into())), Some(true))
        .await
        .unwrap();
    assert_eq!(updated.name.as_deref(), Some("Maya"));
    assert!(updated.confirmed);
    let cleared = state.cluster.update_person(person, Some(None), None).await.unwrap();
    assert_eq!(cleared.name, None);
    assert!(cleared.confirmed);

    state
        .db
        .run(move |conn| {
            conn.execute("UPDATE persons SET face_count = 99 WHERE id = ?1", [person])?;
            Ok(())
        })
        .await
        .unwrap();
    assert_eq!(state.cluster.recount_all().await.unwrap(), 1);
    assert_eq!(state.cluster.get_person(person).await.unwrap().person.face_count, 2);
    assert_eq!(state.cluster.recount_all().await.unwrap(), 0);
}

#[tokio::test]
async fn test_possible_duplicates_uses_prototypes_and_fallback() {
    for backend in [SearchBackend::Linear, SearchBackend::Indexed] {
        let (_tmp, state) = setup_state(backend);
        let ids = seed_faces(
            &state.db,
            &[at_angle(0.0, 4), at_angle(5.0, 4), at_angle(10.0, 4), at_angle(90.0, 4)],
        )
        .await;
        let anchor = state.cluster.create_person_with_faces(Some("A".into()), &ids[..1]).await.unwrap().person_id;
        let with_proto = state.cluster.create_person_with_faces(None, &ids[1..2]).await.unwrap().person_id;
        let far = state.cluster.create_person_with_faces(None, &ids[3..]).await.unwrap().person_id;

        // Assigned straight through the writer, so no prototype exists yet.
        let fallback = seed_person(&state.db, None, false).await;
        let face = ids[2];
        state
            .db
            .run(move |conn| writer::assign_faces_to_person(conn, fallback, &[face]))
            .await
            .unwrap();

        let res = state.cluster.possible_duplicates(anchor, Some(0.9)).await.unwrap();
        let found: Vec<i64> = res.duplicates.iter().map(|d| d.id).collect();
        assert_eq!(found, vec![with_proto, fallback], "{backend:?}");
        assert!(!found.contains(&far));
        assert_eq!(res.duplicates[0].preview_face_id, Some(ids[1]));
        assert_eq!(res.duplicates[1].preview_face_id, Some(ids[2]));
        assert!(res.duplicates[0].best_similarity > res.duplicates[1].best_similarity);
    }
}

#[tokio::test]
async fn test_bulk_duplicates_flags_similar_names_and_faces_as_high() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let photo = seed_photo(&state.db, "reunion.jpg").await;
    let f1 = seed_face(&state.db, photo, Some(at_angle(0.0, 4)), 0.9).await;
    let f2 = seed_face(&state.db, photo, Some(at_angle(angle_for(0.92), 4)), 0.9).await;
    let f3 = seed_face(&state.db, photo, Some(at_angle(90.0, 4)), 0.9).await;

    let jon = state.cluster.create_person_with_faces(Some("Jon Smith".into()), &[f1]).await.unwrap().person_id;
    let john = state.cluster.create_person_with_faces(Some("John Smith".into()), &[f2]).await.unwrap().person_id;
    state.cluster.update_person(john, None, Some(true)).await.unwrap();
    state.cluster.create_person_with_faces(Some("Zed".into()), &[f3]).await.unwrap();

    let report = state.cluster.detect_duplicate_people(None, None).await.unwrap();
    assert_eq!(report.stats.total_persons, 3);
    assert_eq!(report.stats.pairs_compared, 3);
    assert_eq!(report.duplicate_groups.len(), 1);
    let group = &report.duplicate_groups[0];
    let pair: Vec<i64> = group.persons.iter().map(|p| p.id).collect();
    assert!(pair.contains(&jon) && pair.contains(&john));
    assert_eq!(group.confidence, ConfidenceTier::High);
    assert!((group.name_similarity.unwrap() - 0.9).abs() < 1e-4);
    assert!(group.face_similarity.unwrap() >= 0.9);
    assert_eq!(group.suggested_target_id, john);
    assert_eq!(report.stats.high, 1);
}
