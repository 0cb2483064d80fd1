#[path = "../common/mod.rs"]
mod common;

use common::{at_angle, seed_faces, setup_state, spawn_server};
use nazr_people::utils::config::SearchBackend;
use serde_json::{json, Value};

fn angle_for(similarity: f32) -> f32 {
    similarity.acos().to_degrees()
}

#[tokio::test]
async fn test_health_and_settings() {
    let (_tmp, state) = setup_state(SearchBackend::Linear);
    let client = spawn_server(state).await;

    let resp = client.get("/health").await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["searchBackend"], "linear");
    assert!(body["version"].is_string());

    let body: Value = client.get("/faces/settings").await.json().await.unwrap();
    assert!((body["similarity"].as_f64().unwrap() - 0.7).abs() < 1e-6);
    assert!((body["confidence"].as_f64().unwrap() - 0.5).abs() < 1e-6);

    let resp = client.post("/faces/settings", &json!({ "similarityThreshold": 0.6 })).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert!((body["similarity"].as_f64().unwrap() - 0.6).abs() < 1e-6);

    let resp = client.post("/faces/settings", &json!({ "confidenceThreshold": -0.1 })).await;
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "invalid_argument");
}

#[tokio::test]
async fn test_ingest_then_search_and_assign_over_http() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let client = spawn_server(state).await;

    let e1 = at_angle(0.0, 4);
    let e2 = at_angle(angle_for(0.95), 4);
    let e3 = at_angle(angle_for(0.1), 4);
    let resp = client
        .post(
            "/faces/ingest",
            &json!({
                "photo": { "filename": "party.jpg", "width": 800, "height": 600 },
                "faces": [
                    { "box": [10, 10, 60, 70], "score": 0.99, "embedding": e1 },
                    { "box": [100, 10, 160, 70], "score": 0.97, "embedding": e2 },
                    { "box": [200, 10, 260, 70], "score": 0.93, "embedding": e3 },
                    { "box": [300, 10, 320, 30], "score": 0.61 }
                ]
            }),
        )
        .await;
    assert_eq!(resp.status(), 200);
    let ingested: Value = resp.json().await.unwrap();
    let ids: Vec<i64> = ingested["faceIds"].as_array().unwrap().iter().map(|v| v.as_i64().unwrap()).collect();
    assert_eq!(ids.len(), 4);

    let unassigned: Value = client.get("/faces/unassigned?limit=10").await.json().await.unwrap();
    assert_eq!(unassigned.as_array().unwrap().len(), 4);

    let created: Value = client
        .post("/persons", &json!({ "name": "Noor", "faceIds": [ids[0], ids[1]] }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(created["count"], 2);
    let person_id = created["personId"].as_i64().unwrap();

    let strict: Value = client
        .post("/similar-faces", &json!({ "faceIds": [ids[0], ids[1]], "threshold": 0.7 }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(strict["similarFaces"].as_array().unwrap().len(), 0);

    let loose: Value = client
        .post("/similar-faces", &json!({ "faceIds": [ids[0], ids[1]], "threshold": 0.05 }))
        .await
        .json()
        .await
        .unwrap();
    let hits = loose["similarFaces"].as_array().unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0]["id"], ids[2]);
    assert_eq!(hits[0]["photo"]["filename"], "party.jpg");
    assert!((loose["usedThreshold"].as_f64().unwrap() - 0.05).abs() < 1e-6);

    let resp = client.post(&format!("/person/{person_id}/faces"), &json!({ "faceIds": [ids[2]] })).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "success": true, "count": 1 }));

    let detail: Value = client.get(&format!("/persons/{person_id}")).await.json().await.unwrap();
    assert_eq!(detail["name"], "Noor");
    assert_eq!(detail["faceCount"], 3);
    assert_eq!(detail["faces"].as_array().unwrap().len(), 3);

    let similar: Value = client.get(&format!("/face/{}/similar?threshold=0.9&limit=5", ids[0])).await.json().await.unwrap();
    assert_eq!(similar["totalFound"], 1);
    assert_eq!(similar["similarFaces"][0]["person"]["name"], "Noor");

    let resp = client.get(&format!("/face/{}/similar", ids[3])).await;
    assert_eq!(resp.status(), 422);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "no_embedding_data");
}

#[tokio::test]
async fn test_person_management_endpoints() {
    let (_tmp, state) = setup_state(SearchBackend::Linear);
    let ids = seed_faces(&state.db, &[at_angle(0.0, 4), at_angle(3.0, 4), at_angle(6.0, 4)]).await;
    let client = spawn_server(state).await;

    let p: Value = client.post("/persons", &json!({ "faceIds": [ids[0], ids[1]] })).await.json().await.unwrap();
    let pid = p["personId"].as_i64().unwrap();

    let updated: Value = client
        .post(&format!("/persons/{pid}"), &json!({ "name": "Omar", "confirmed": true }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(updated["name"], "Omar");
    assert_eq!(updated["confirmed"], true);

    let proto: Value = client.post(&format!("/persons/{pid}/prototype"), &json!({})).await.json().await.unwrap();
    assert_eq!(proto["personId"], pid);
    assert_eq!(proto["sampleSize"], 2);
    assert_eq!(proto["dimension"], 4);

    let removed: Value = client
        .delete_json(&format!("/persons/{pid}/faces"), &json!({ "faceIds": [ids[1]] }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(removed["removed"], 1);
    assert_eq!(removed["faceCount"], 1);

    let ignored: Value = client.post("/faces/ignore", &json!({ "faceIds": [ids[0]] })).await.json().await.unwrap();
    assert_eq!(ignored["updated"], 1);
    let persons: Value = client.get("/persons").await.json().await.unwrap();
    assert_eq!(persons[0]["faceCount"], 0);
    client.post("/faces/unignore", &json!({ "faceIds": [ids[0]] })).await;

    let deleted: Value = client.delete_json("/faces", &json!({ "faceIds": [ids[2]] })).await.json().await.unwrap();
    assert_eq!(deleted["deletedFaces"], 1);

    let recount: Value = client.post("/persons/recount", &json!({})).await.json().await.unwrap();
    assert_eq!(recount["updatedPersons"], 0);

    let resp = client.delete(&format!("/persons/{pid}")).await;
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body, json!({ "deletedPeople": 1, "unassignedFaces": 1 }));

    let resp = client.get(&format!("/persons/{pid}")).await;
    assert_eq!(resp.status(), 404);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["kind"], "not_found");
}

#[tokio::test]
async fn test_duplicates_and_merge_endpoints() {
    let (_tmp, state) = setup_state(SearchBackend::Indexed);
    let ids = seed_faces(&state.db, &[at_angle(0.0, 4), at_angle(angle_for(0.92), 4), at_angle(90.0, 4)]).await;
    let client = spawn_server(state).await;

    let jon: Value = client.post("/persons", &json!({ "name": "Jon Smith", "faceIds": [ids[0]] })).await.json().await.unwrap();
    let john: Value = client.post("/persons", &json!({ "name": "John Smith", "faceIds": [ids[1]] })).await.json().await.unwrap();
    let other: Value = client.post("/persons", &json!({ "faceIds": [ids[2]] })).await.json().await.unwrap();
    let (jon, john, other) = (
        jon["personId"].as_i64().unwrap(),
        john["personId"].as_i64().unwrap(),
        other["personId"].as_i64().unwrap(),
    );

    let possible: Value = client
        .get(&format!("/person/{jon}/possible-duplicates?threshold=0.8"))
        .await
        .json()
        .await
        .unwrap();
    let dups = possible["duplicates"].as_array().unwrap();
    assert_eq!(dups.len(), 1);
    assert_eq!(dups[0]["id"], john);
    assert_eq!(dups[0]["previewFaceId"], ids[1]);

    let report: Value = client.get("/people/duplicates").await.json().await.unwrap();
    let groups = report["duplicateGroups"].as_array().unwrap();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0]["confidence"], "high");
    assert_eq!(report["stats"]["totalPersons"], 3);

    let resp = client.post("/people/duplicates", &json!({ "targetPersonId": 999, "sourcePersonIds": [jon] })).await;
    assert_eq!(resp.status(), 404);

    let merged: Value = client
        .post("/people/duplicates", &json!({ "targetPersonId": john, "sourcePersonIds": [jon] }))
        .await
        .json()
        .await
        .unwrap();
    assert_eq!(merged["success"], true);
    assert_eq!(merged["faceCount"], 2);
    assert_eq!(merged["mergedPersonIds"], json!([jon]));

    let resp = client.post("/people/duplicates", &json!({ "sourcePersonIds": [other] })).await;
    assert_eq!(resp.status(), 400);

    let wiped: Value = client.delete("/people").await.json().await.unwrap();
    assert_eq!(wiped, json!({ "deletedPeople": 2, "unassignedFaces": 3 }));
    let stats: Value = client.get("/stats").await.json().await.unwrap();
    assert_eq!(stats["persons"], 0);
    assert_eq!(stats["personsMerged"], 1);
    assert_eq!(stats["unassignedFaces"], 3);
}

#[tokio::test]
async fn test_malformed_requests_get_structured_errors() {
    let (_tmp, state) = setup_state(SearchBackend::Linear);
    let ids = seed_faces(&state.db, &[at_angle(0.0, 4)]).await;
    let client = spawn_server(state).await;

    let bad_query = client.get(&format!("/face/{}/similar?threshold=abc", ids[0])).await;
    let bad_body = client.post("/similar-faces", &json!({ "faceIds": "x" })).await;
    let bad_path = client.get("/persons/abc").await;
    for resp in [bad_query, bad_body, bad_path] {
        assert_eq!(resp.status(), 400);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["kind"], "invalid_argument");
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    }
}
