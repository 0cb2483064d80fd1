use serde::{Deserialize, Serialize};

use crate::db::{query, writer, Db};
use crate::error::{FaceError, Result};
use crate::models::face::{BoundingBox, NewFace, NewPhoto};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestPhoto {
    pub id: Option<i64>,
    pub filename: String,
    pub path: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// One detection as emitted by the detector helper: corners, score, embedding.
#[derive(Debug, Clone, Deserialize)]
pub struct DetectedFace {
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
    pub score: f32,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub photo: IngestPhoto,
    #[serde(default)]
    pub faces: Vec<DetectedFace>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestResult {
    pub photo_id: i64,
    pub face_ids: Vec<i64>,
}

fn validate(req: &IngestRequest) -> Result<Option<usize>> {
    if req.photo.filename.trim().is_empty() {
        return Err(FaceError::invalid("photo.filename must not be empty"));
    }
    let mut dim: Option<usize> = None;
    for (i, face) in req.faces.iter().enumerate() {
        if !(0.0..=1.0).contains(&face.score) {
            return Err(FaceError::invalid(format!("faces[{i}].score must be within [0, 1]")));
        }
        if face.bbox.iter().any(|v| !v.is_finite()) || face.embedding.iter().any(|v| !v.is_finite()) {
            return Err(FaceError::invalid(format!("faces[{i}] contains a non-finite value")));
        }
        if face.embedding.is_empty() {
            continue;
        }
        match dim {
            None => dim = Some(face.embedding.len()),
            Some(d) if d != face.embedding.len() => {
                return Err(FaceError::invalid(format!(
                    "faces[{i}].embedding has length {}, expected {d}",
                    face.embedding.len()
                )));
            }
            Some(_) => {}
        }
    }
    Ok(dim)
}

/// Stores one photo's detections as unassigned faces.
pub async fn ingest(db: &Db, req: IngestRequest) -> Result<IngestResult> {
    let dim = validate(&req)?;
    let result = db
        .run(move |conn| {
            if let (Some(d), Some(stored)) = (dim, query::embedding_dimension(conn)?) {
                if d != stored {
                    return Err(FaceError::invalid(format!(
                        "embedding length {d} does not match stored dimension {stored}"
                    ))
                    .into());
                }
            }
            let tx = conn.transaction()?;
            let photo_id = writer::ensure_photo(
                &tx,
                &NewPhoto {
                    id: req.photo.id,
                    filename: req.photo.filename,
                    path: req.photo.path,
                    width: req.photo.width,
                    height: req.photo.height,
                },
            )?;
            let mut face_ids = Vec::with_capacity(req.faces.len());
            for face in req.faces {
                let embedding = (!face.embedding.is_empty()).then_some(face.embedding);
                face_ids.push(writer::insert_face(
                    &tx,
                    &NewFace {
                        photo_id,
                        bounding_box: BoundingBox::from_corners(face.bbox),
                        confidence: face.score,
                        embedding,
                    },
                )?);
            }
            tx.commit()?;
            Ok(IngestResult { photo_id, face_ids })
        })
        .await?;
    tracing::debug!(photo_id = result.photo_id, faces = result.face_ids.len(), "Detections ingested");
    Ok(result)
}
