//! Two-signal scoring for bulk duplicate-person detection.

use serde::Serialize;

use crate::faces::vector::cosine_similarity;
use crate::utils::config::ConfidenceBands;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceTier {
    High,
    Medium,
    Low,
}

pub fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut cur = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        cur[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            cur[j + 1] = (prev[j + 1] + 1).min(cur[j] + 1).min(prev[j] + cost);
        }
        std::mem::swap(&mut prev, &mut cur);
    }
    prev[b.len()]
}

/// Case-insensitive name similarity; `None` unless both names are present.
pub fn name_similarity(a: Option<&str>, b: Option<&str>) -> Option<f32> {
    let a = a.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())?;
    let b = b.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())?;
    if a == b {
        return Some(1.0);
    }
    if a.contains(&b) || b.contains(&a) {
        return Some(0.8);
    }
    let max_len = a.chars().count().max(b.chars().count());
    Some(1.0 - levenshtein(&a, &b) as f32 / max_len as f32)
}

/// Max pairwise cosine similarity between two face samples.
pub fn face_similarity(a: &[Vec<f32>], b: &[Vec<f32>]) -> Option<f32> {
    if a.is_empty() || b.is_empty() {
        return None;
    }
    let best = a
        .iter()
        .flat_map(|x| b.iter().map(move |y| cosine_similarity(x, y)))
        .fold(f32::NEG_INFINITY, f32::max);
    Some(best)
}

/// Missing signals count as zero.
pub fn classify(name: Option<f32>, face: Option<f32>, bands: &ConfidenceBands) -> ConfidenceTier {
    let n = name.unwrap_or(0.0);
    let f = face.unwrap_or(0.0);
    let best = n.max(f);
    if best >= bands.high_single || (n >= bands.high_both && f >= bands.high_both) {
        ConfidenceTier::High
    } else if best >= bands.medium_single || (n >= bands.medium_both && f >= bands.medium_both) {
        ConfidenceTier::Medium
    } else {
        ConfidenceTier::Low
    }
}

pub fn is_candidate(name: Option<f32>, face: Option<f32>, name_threshold: f32, face_threshold: f32) -> bool {
    name.is_some_and(|n| n >= name_threshold) || face.is_some_and(|f| f >= face_threshold)
}

pub fn combined_score(name: Option<f32>, face: Option<f32>) -> f32 {
    name.unwrap_or(0.0).max(face.unwrap_or(0.0))
}

/// Which of two persons a merge should keep: confirmed first, then more faces, then lower id.
pub fn suggested_target(a: (i64, bool, i64), b: (i64, bool, i64)) -> i64 {
    let key = |(id, confirmed, faces): (i64, bool, i64)| (std::cmp::Reverse(confirmed), std::cmp::Reverse(faces), id);
    if key(a) <= key(b) {
        a.0
    } else {
        b.0
    }
}
