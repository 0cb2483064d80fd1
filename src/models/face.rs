use serde::{Deserialize, Serialize};

/// Display-only box in source image pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Builds a box from detector corner coordinates `[x1, y1, x2, y2]`.
    pub fn from_corners(corners: [f32; 4]) -> Self {
        let [x1, y1, x2, y2] = corners;
        Self {
            x: x1.min(x2),
            y: y1.min(y2),
            width: (x2 - x1).abs(),
            height: (y2 - y1).abs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Face {
    pub id: i64,
    pub photo_id: i64,
    pub person_id: Option<i64>,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub ignored: bool,
    pub has_embedding: bool,
    #[serde(skip)]
    pub embedding: Option<Vec<f32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    pub id: i64,
    pub name: Option<String>,
    pub confirmed: bool,
    pub face_count: i64,
    pub has_prototype: bool,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PersonRef {
    pub id: i64,
    pub name: Option<String>,
    pub confirmed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PhotoRef {
    pub id: i64,
    pub filename: String,
    pub path: Option<String>,
    pub thumbnail_url: String,
}

impl PhotoRef {
    pub fn thumbnail_url_for(photo_id: i64) -> String {
        format!("/thumb/{photo_id}")
    }
}

/// A search hit decorated for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarFace {
    pub id: i64,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub ignored: bool,
    pub photo: Option<PhotoRef>,
    pub person: Option<PersonRef>,
    pub similarity: f32,
}

#[derive(Debug, Clone)]
pub struct NewPhoto {
    pub id: Option<i64>,
    pub filename: String,
    pub path: Option<String>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct NewFace {
    pub photo_id: i64,
    pub bounding_box: BoundingBox,
    pub confidence: f32,
    pub embedding: Option<Vec<f32>>,
}
