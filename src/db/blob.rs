//! The only place embeddings cross between `Vec<f32>` and their stored form
//! (little-endian `f32` BLOB).

use anyhow::Result;

pub fn encode_embedding(embedding: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        out.extend_from_slice(&value.to_le_bytes());
    }
    out
}

pub fn decode_embedding_blob(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        anyhow::bail!("Embedding blob length {} is not a multiple of 4", blob.len());
    }
    Ok(blob
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect())
}

/// Decodes an optional column, logging and dropping malformed blobs.
pub fn decode_optional(blob: Option<Vec<u8>>, owner: &str, id: i64) -> Option<Vec<f32>> {
    let blob = blob?;
    if blob.is_empty() {
        return None;
    }
    match decode_embedding_blob(&blob) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!(owner, id, error = %e, "Failed to decode embedding");
            None
        }
    }
}
