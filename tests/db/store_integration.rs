#[path = "../common/mod.rs"]
mod common;

use common::{seed_face, seed_photo, setup_test_db};
use nazr_people::db::{query, writer, Db};
use nazr_people::faces::store::{build_store, EmbeddingStore, NearestQuery};
use nazr_people::faces::vector::normalize;
use nazr_people::utils::config::SearchBackend;

/// Deterministic xorshift so both strategies see the same corpus.
struct Rng(u64);

impl Rng {
    fn next_f32(&mut self) -> f32 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        (self.0 >> 40) as f32 / (1u64 << 24) as f32 * 2.0 - 1.0
    }

    fn vector(&mut self, dim: usize) -> Vec<f32> {
        normalize(&(0..dim).map(|_| self.next_f32()).collect::<Vec<_>>())
    }
}

async fn seed_corpus(db: &Db, n: usize, dim: usize) -> Vec<i64> {
    let mut rng = Rng(0x9E37_79B9_7F4A_7C15);
    let photo = seed_photo(db, "corpus.jpg").await;
    let mut ids = Vec::with_capacity(n);
    for i in 0..n {
        let confidence = if i % 7 == 0 { 0.3 } else { 0.9 };
        ids.push(seed_face(db, photo, Some(rng.vector(dim)), confidence).await);
    }
    ids
}

fn stores(db: &Db) -> [std::sync::Arc<dyn EmbeddingStore>; 2] {
    [build_store(SearchBackend::Linear, db.clone()), build_store(SearchBackend::Indexed, db.clone())]
}

#[tokio::test]
async fn test_strategies_return_identical_rankings() {
    let (_tmp, db) = setup_test_db();
    let ids = seed_corpus(&db, 120, 16).await;
    let assigned: Vec<i64> = ids.iter().copied().step_by(5).collect();
    let person = {
        let assigned = assigned.clone();
        db.run(move |conn| Ok(writer::create_person_with_faces(conn, None, &assigned)?.0)).await.unwrap()
    };
    assert!(person > 0);
    let ignored = vec![ids[1], ids[2]];
    db.run(move |conn| writer::set_faces_ignored(conn, &ignored, true)).await.unwrap();

    let (a_id, b_id) = (ids[3], ids[4]);
    let queries = db
        .run(move |conn| {
            let faces = query::get_faces(conn, &[a_id, b_id])?;
            Ok(faces.into_iter().filter_map(|f| f.embedding).collect::<Vec<_>>())
        })
        .await
        .unwrap();

    for unassigned_only in [false, true] {
        for threshold in [0.0, 0.1, 0.3, 0.5] {
            let make = || NearestQuery {
                queries: queries.clone(),
                threshold,
                limit: 25,
                exclude_ids: vec![a_id, b_id],
                min_confidence: 0.5,
                unassigned_only,
            };
            let [linear, indexed] = stores(&db);
            let l = linear.find_nearest(make()).await.unwrap();
            let i = indexed.find_nearest(make()).await.unwrap();
            assert_eq!(l, i, "threshold {threshold}, unassigned_only {unassigned_only}");
            assert!(l.len() <= 25);
            assert!(l.windows(2).all(|w| w[0].similarity >= w[1].similarity));
            assert!(l.iter().all(|n| n.similarity >= threshold && n.face_id != a_id && n.face_id != b_id));
            assert!(l.iter().all(|n| n.face_id != ids[1] && n.face_id != ids[2]));
            if unassigned_only {
                assert!(l.iter().all(|n| n.person_id.is_none()));
            }
        }
    }
}

#[tokio::test]
async fn test_prototype_search_matches_across_strategies() {
    let (_tmp, db) = setup_test_db();
    let mut rng = Rng(42);
    let mut persons = Vec::new();
    for _ in 0..12 {
        let prototype = rng.vector(8);
        let pid = db
            .run(move |conn| {
                let pid = writer::insert_person(conn, None, false)?;
                writer::upsert_prototype(conn, pid, &prototype, 1)?;
                Ok(pid)
            })
            .await
            .unwrap();
        persons.push(pid);
    }
    let target = db.run({
        let pid = persons[0];
        move |conn| query::get_person_prototype(conn, pid)
    })
    .await
    .unwrap()
    .unwrap();

    let [linear, indexed] = stores(&db);
    for threshold in [0.0, 0.2, 0.6] {
        let l = linear.find_nearest_prototypes(target.clone(), threshold, 5, Some(persons[0])).await.unwrap();
        let i = indexed.find_nearest_prototypes(target.clone(), threshold, 5, Some(persons[0])).await.unwrap();
        assert_eq!(l, i, "threshold {threshold}");
        assert!(l.iter().all(|m| m.person_id != persons[0]));
    }
    let with_self = indexed.find_nearest_prototypes(target, 0.99, 1, None).await.unwrap();
    assert_eq!(with_self.len(), 1);
    assert_eq!(with_self[0].person_id, persons[0]);
}

#[tokio::test]
async fn test_empty_queries_and_zero_limit() {
    let (_tmp, db) = setup_test_db();
    seed_corpus(&db, 10, 4).await;
    for store in stores(&db) {
        let empty = NearestQuery {
            queries: vec![vec![]],
            threshold: 0.0,
            limit: 10,
            exclude_ids: vec![],
            min_confidence: 0.0,
            unassigned_only: false,
        };
        assert!(store.find_nearest(empty).await.unwrap().is_empty());
        let hits = store.find_nearest_for_vector(vec![1.0, 0.0, 0.0, 0.0], 0.0, 0, None, 0.0).await.unwrap();
        assert!(hits.is_empty(), "{}", store.strategy());
    }
}
