//! Pure vector helpers shared by the store, prototype and search layers.

use crate::error::{FaceError, Result};

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

/// Cosine similarity in [-1, 1].
///
/// Mismatched lengths, empty input and zero-norm vectors all score 0 so a
/// degenerate embedding never matches anything and never yields NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 || !norm_a.is_finite() || !norm_b.is_finite() {
        return 0.0;
    }
    (dot(a, b) / (norm_a * norm_b)).clamp(-1.0, 1.0)
}

/// Element-wise arithmetic mean.
pub fn mean_vector(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let first = vectors
        .first()
        .ok_or_else(|| FaceError::invalid("cannot average an empty vector list"))?;
    let dim = first.len();
    let mut acc = vec![0f32; dim];
    for v in vectors {
        if v.len() != dim {
            return Err(FaceError::invalid(format!(
                "vector length mismatch: expected {dim}, got {}",
                v.len()
            )));
        }
        for (slot, value) in acc.iter_mut().zip(v.iter()) {
            *slot += value;
        }
    }
    let inv = 1.0f32 / vectors.len() as f32;
    for value in acc.iter_mut() {
        *value *= inv;
    }
    Ok(acc)
}

/// Scales to unit length; the zero vector is returned unchanged.
pub fn normalize(v: &[f32]) -> Vec<f32> {
    let norm = l2_norm(v);
    if norm == 0.0 || !norm.is_finite() {
        return v.to_vec();
    }
    v.iter().map(|x| x / norm).collect()
}

pub fn similarity_to_distance(s: f32) -> f32 {
    1.0 - s
}

pub fn distance_to_similarity(d: f32) -> f32 {
    1.0 - d
}

/// Thresholds are similarities and must lie in [0, 1].
pub fn validate_threshold(name: &str, value: f32) -> Result<f32> {
    if !(0.0..=1.0).contains(&value) || value.is_nan() {
        return Err(FaceError::invalid(format!("{name} must be within [0, 1], got {value}")));
    }
    Ok(value)
}
