use serde::{Deserialize, Serialize};

use crate::db::{query, writer, Db};
use crate::error::Result;
use crate::faces::vector::validate_threshold;
use crate::utils::config::ClusterSettings;

pub const SIMILARITY_KEY: &str = "faceRecognitionSimilarityThreshold";
pub const CONFIDENCE_KEY: &str = "faceRecognitionConfidenceThreshold";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thresholds {
    pub similarity: f32,
    pub confidence: f32,
}

/// Read-mostly thresholds kept in `face_settings`, falling back to configured defaults.
#[derive(Clone)]
pub struct SettingsStore {
    db: Db,
    defaults: Thresholds,
}

impl SettingsStore {
    pub fn new(db: Db, cluster: &ClusterSettings) -> Self {
        Self {
            db,
            defaults: Thresholds { similarity: cluster.default_similarity, confidence: cluster.default_confidence },
        }
    }

    pub async fn get_float_setting(&self, key: &'static str, default: f32) -> Result<f32> {
        self.db.run(move |conn| query::get_float_setting(conn, key, default)).await
    }

    pub async fn similarity_threshold(&self) -> Result<f32> {
        self.get_float_setting(SIMILARITY_KEY, self.defaults.similarity).await
    }

    pub async fn confidence_threshold(&self) -> Result<f32> {
        self.get_float_setting(CONFIDENCE_KEY, self.defaults.confidence).await
    }

    pub async fn thresholds(&self) -> Result<Thresholds> {
        let defaults = self.defaults;
        self.db
            .run(move |conn| {
                Ok(Thresholds {
                    similarity: query::get_float_setting(conn, SIMILARITY_KEY, defaults.similarity)?,
                    confidence: query::get_float_setting(conn, CONFIDENCE_KEY, defaults.confidence)?,
                })
            })
            .await
    }

    /// Per-call override wins over the stored value; either way it must lie in [0, 1].
    pub async fn resolve_similarity(&self, requested: Option<f32>) -> Result<f32> {
        match requested {
            Some(t) => validate_threshold("threshold", t),
            None => self.similarity_threshold().await,
        }
    }

    pub async fn update(&self, similarity: Option<f32>, confidence: Option<f32>) -> Result<Thresholds> {
        let similarity = similarity.map(|v| validate_threshold(SIMILARITY_KEY, v)).transpose()?;
        let confidence = confidence.map(|v| validate_threshold(CONFIDENCE_KEY, v)).transpose()?;
        self.db
            .run(move |conn| {
                if let Some(v) = similarity {
                    writer::set_face_setting(conn, SIMILARITY_KEY, &v.to_string())?;
                }
                if let Some(v) = confidence {
                    writer::set_face_setting(conn, CONFIDENCE_KEY, &v.to_string())?;
                }
                Ok(())
            })
            .await?;
        if similarity.is_some() || confidence.is_some() {
            tracing::info!(?similarity, ?confidence, "Face recognition thresholds updated");
        }
        self.thresholds().await
    }
}
