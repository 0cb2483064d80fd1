use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use std::collections::{HashMap, HashSet};

use crate::db::blob::decode_optional;
use crate::db::{placeholders, ID_CHUNK};
use crate::models::face::{BoundingBox, Face, Person, PersonRef, PhotoRef};
use crate::models::job::JobRecord;

// Type aliases for complex query result types
pub type ScoredCandidate = (i64, Option<i64>, Vec<f32>);
pub type SampledFace = (i64, Vec<f32>);

const FACE_COLUMNS: &str =
    "id, photo_id, person_id, x, y, width, height, confidence, ignored, embedding_blob";

fn row_to_face(row: &Row<'_>) -> rusqlite::Result<Face> {
    let id: i64 = row.get("id")?;
    let blob: Option<Vec<u8>> = row.get("embedding_blob")?;
    let has_embedding = blob.as_ref().map(|b| !b.is_empty()).unwrap_or(false);
    Ok(Face {
        id,
        photo_id: row.get("photo_id")?,
        person_id: row.get("person_id")?,
        bounding_box: BoundingBox {
            x: row.get::<_, f64>("x")? as f32,
            y: row.get::<_, f64>("y")? as f32,
            width: row.get::<_, f64>("width")? as f32,
            height: row.get::<_, f64>("height")? as f32,
        },
        confidence: row.get::<_, f64>("confidence")? as f32,
        ignored: row.get::<_, i64>("ignored")? != 0,
        has_embedding,
        embedding: decode_optional(blob, "face", id),
    })
}

fn row_to_person(row: &Row<'_>) -> rusqlite::Result<Person> {
    Ok(Person {
        id: row.get("id")?,
        name: row.get("name")?,
        confirmed: row.get::<_, i64>("confirmed")? != 0,
        face_count: row.get("face_count")?,
        has_prototype: row.get::<_, i64>("has_prototype")? != 0,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

const PERSON_SELECT: &str = "SELECT p.id, p.name, p.confirmed, p.face_count, p.created_at, p.updated_at,
        EXISTS(SELECT 1 FROM person_prototypes pp WHERE pp.person_id = p.id) AS has_prototype
    FROM persons p";

// Faces

pub fn get_face(conn: &Connection, face_id: i64) -> Result<Option<Face>> {
    let sql = format!("SELECT {FACE_COLUMNS} FROM faces WHERE id = ?");
    let face = conn.query_row(&sql, params![face_id], row_to_face).optional()?;
    Ok(face)
}

/// Faces for the given ids, in no particular order; unknown ids are absent.
pub fn get_faces(conn: &Connection, face_ids: &[i64]) -> Result<Vec<Face>> {
    let mut out = Vec::with_capacity(face_ids.len());
    for chunk in face_ids.chunks(ID_CHUNK) {
        let sql = format!("SELECT {FACE_COLUMNS} FROM faces WHERE id IN ({})", placeholders(chunk.len()));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), row_to_face)?;
        for r in rows {
            out.push(r?);
        }
    }
    Ok(out)
}

pub fn existing_face_ids(conn: &Connection, face_ids: &[i64]) -> Result<HashSet<i64>> {
    let mut out = HashSet::with_capacity(face_ids.len());
    for chunk in face_ids.chunks(ID_CHUNK) {
        let sql = format!("SELECT id FROM faces WHERE id IN ({})", placeholders(chunk.len()));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, i64>(0))?;
        for r in rows {
            out.insert(r?);
        }
    }
    Ok(out)
}

/// Distinct persons currently holding any of the given faces.
pub fn persons_of_faces(conn: &Connection, face_ids: &[i64]) -> Result<Vec<i64>> {
    let mut out = HashSet::new();
    for chunk in face_ids.chunks(ID_CHUNK) {
        let sql = format!(
            "SELECT DISTINCT person_id FROM faces WHERE person_id IS NOT NULL AND id IN ({})",
            placeholders(chunk.len())
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, i64>(0))?;
        for r in rows {
            out.insert(r?);
        }
    }
    let mut ids: Vec<i64> = out.into_iter().collect();
    ids.sort_unstable();
    Ok(ids)
}

pub fn list_unassigned_faces(conn: &Connection, offset: i64, limit: i64) -> Result<Vec<Face>> {
    let sql = format!(
        "SELECT {FACE_COLUMNS} FROM faces WHERE person_id IS NULL AND ignored = 0 ORDER BY confidence DESC, id ASC LIMIT ? OFFSET ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let faces = stmt
        .query_map(params![limit, offset.max(0)], row_to_face)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(faces)
}

pub fn list_person_faces(conn: &Connection, person_id: i64, limit: i64) -> Result<Vec<Face>> {
    let sql = format!(
        "SELECT {FACE_COLUMNS} FROM faces WHERE person_id = ? ORDER BY ignored ASC, confidence DESC, id ASC LIMIT ?"
    );
    let mut stmt = conn.prepare(&sql)?;
    let faces = stmt
        .query_map(params![person_id, limit], row_to_face)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(faces)
}

/// Unassigned, non-ignored faces with an embedding at or above `min_confidence`.
pub fn count_unassigned_eligible(conn: &Connection, min_confidence: f32) -> Result<i64> {
    let n = conn.query_row(
        "SELECT COUNT(*) FROM faces WHERE person_id IS NULL AND ignored = 0 AND embedding_blob IS NOT NULL AND confidence >= ?1",
        params![min_confidence as f64],
        |r| r.get(0),
    )?;
    Ok(n)
}

/// Next slice of clustering work, keyed by ascending face id after `after_id`.
pub fn next_unassigned_batch(conn: &Connection, after_id: i64, min_confidence: f32, limit: i64) -> Result<Vec<SampledFace>> {
    let mut stmt = conn.prepare(
        "SELECT id, embedding_blob FROM faces
         WHERE person_id IS NULL AND ignored = 0 AND embedding_blob IS NOT NULL AND confidence >= ?1 AND id > ?2
         ORDER BY id ASC LIMIT ?3",
    )?;
    let rows = stmt.query_map(params![min_confidence as f64, after_id, limit], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, Option<Vec<u8>>>(1)?))
    })?;
    let mut out = Vec::new();
    for r in rows {
        let (id, blob) = r?;
        if let Some(embedding) = decode_optional(blob, "face", id) {
            out.push((id, embedding));
        }
    }
    Ok(out)
}

pub fn count_assigned_faces(conn: &Connection) -> Result<i64> {
    let n = conn.query_row("SELECT COUNT(*) FROM faces WHERE person_id IS NOT NULL", [], |r| r.get(0))?;
    Ok(n)
}

/// Dimensionality of stored embeddings, taken from any face that has one.
pub fn embedding_dimension(conn: &Connection) -> Result<Option<usize>> {
    let len: Option<i64> = conn
        .query_row(
            "SELECT length(embedding_blob) FROM faces WHERE embedding_blob IS NOT NULL AND length(embedding_blob) > 0 LIMIT 1",
            [],
            |r| r.get(0),
        )
        .optional()?;
    Ok(len.map(|l| (l / 4) as usize))
}

/// Candidate rows for in-process scoring.
pub struct CandidateFilter {
    pub min_confidence: f32,
    pub unassigned_only: bool,
}

pub fn scan_candidates(conn: &Connection, filter: &CandidateFilter) -> Result<Vec<ScoredCandidate>> {
    let sql = if filter.unassigned_only {
        "SELECT id, person_id, embedding_blob FROM faces
         WHERE ignored = 0 AND embedding_blob IS NOT NULL AND confidence >= ?1 AND person_id IS NULL"
    } else {
        "SELECT id, person_id, embedding_blob FROM faces
         WHERE ignored = 0 AND embedding_blob IS NOT NULL AND confidence >= ?1"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![filter.min_confidence as f64], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, Option<i64>>(1)?,
            row.get::<_, Option<Vec<u8>>>(2)?,
        ))
    })?;
    let mut out = Vec::new();
    for r in rows {
        let (id, person_id, blob) = r?;
        if let Some(embedding) = decode_optional(blob, "face", id) {
            out.push((id, person_id, embedding));
        }
    }
    Ok(out)
}

// Persons

pub fn get_person(conn: &Connection, person_id: i64) -> Result<Option<Person>> {
    let sql = format!("{PERSON_SELECT} WHERE p.id = ?");
    let person = conn.query_row(&sql, params![person_id], row_to_person).optional()?;
    Ok(person)
}

pub fn list_persons(conn: &Connection) -> Result<Vec<Person>> {
    let sql = format!("{PERSON_SELECT} ORDER BY p.face_count DESC, p.id ASC");
    let mut stmt = conn.prepare(&sql)?;
    let persons = stmt.query_map([], row_to_person)?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(persons)
}

pub fn count_persons(conn: &Connection) -> Result<i64> {
    let n = conn.query_row("SELECT COUNT(*) FROM persons", [], |r| r.get(0))?;
    Ok(n)
}

/// Ids from `person_ids` with no matching row, in input order.
pub fn missing_person_ids(conn: &Connection, person_ids: &[i64]) -> Result<Vec<i64>> {
    let mut found = HashSet::new();
    for chunk in person_ids.chunks(ID_CHUNK) {
        let sql = format!("SELECT id FROM persons WHERE id IN ({})", placeholders(chunk.len()));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| row.get::<_, i64>(0))?;
        for r in rows {
            found.insert(r?);
        }
    }
    Ok(person_ids.iter().copied().filter(|id| !found.contains(id)).collect())
}

pub fn person_refs(conn: &Connection, person_ids: &[i64]) -> Result<HashMap<i64, PersonRef>> {
    let mut out = HashMap::new();
    for chunk in person_ids.chunks(ID_CHUNK) {
        let sql = format!("SELECT id, name, confirmed FROM persons WHERE id IN ({})", placeholders(chunk.len()));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            Ok(PersonRef {
                id: row.get(0)?,
                name: row.get(1)?,
                confirmed: row.get::<_, i64>(2)? != 0,
            })
        })?;
        for r in rows {
            let p = r?;
            out.insert(p.id, p);
        }
    }
    Ok(out)
}

/// Up to `limit` of the person's eligible faces, highest confidence first.
pub fn get_person_sample_embeddings(conn: &Connection, person_id: i64, limit: usize) -> Result<Vec<SampledFace>> {
    let mut stmt = conn.prepare(
        "SELECT id, embedding_blob FROM faces
         WHERE person_id = ?1 AND ignored = 0 AND embedding_blob IS NOT NULL
         ORDER BY confidence DESC, id ASC LIMIT ?2",
    )?;
    let rows = stmt.query_map(params![person_id, limit as i64], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, Option<Vec<u8>>>(1)?))
    })?;
    let mut out = Vec::new();
    for r in rows {
        let (id, blob) = r?;
        if let Some(embedding) = decode_optional(blob, "face", id) {
            out.push((id, embedding));
        }
    }
    Ok(out)
}

pub fn get_person_prototype(conn: &Connection, person_id: i64) -> Result<Option<Vec<f32>>> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT prototype_blob FROM person_prototypes WHERE person_id = ?",
            params![person_id],
            |row| row.get(0),
        )
        .optional()?;
    Ok(decode_optional(blob, "prototype", person_id))
}

pub fn list_prototypes(conn: &Connection, exclude_person: Option<i64>) -> Result<Vec<SampledFace>> {
    let mut stmt = conn.prepare("SELECT person_id, prototype_blob FROM person_prototypes WHERE person_id != ?1")?;
    let rows = stmt.query_map(params![exclude_person.unwrap_or(-1)], |row| {
        Ok((row.get::<_, i64>(0)?, row.get::<_, Option<Vec<u8>>>(1)?))
    })?;
    let mut out = Vec::new();
    for r in rows {
        let (id, blob) = r?;
        if let Some(v) = decode_optional(blob, "prototype", id) {
            out.push((id, v));
        }
    }
    Ok(out)
}

/// Persons with at least one eligible face but no stored prototype.
pub fn persons_without_prototype(conn: &Connection, exclude_person: Option<i64>) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT p.id FROM persons p
         WHERE p.id != ?1
           AND NOT EXISTS(SELECT 1 FROM person_prototypes pp WHERE pp.person_id = p.id)
           AND EXISTS(SELECT 1 FROM faces f WHERE f.person_id = p.id AND f.ignored = 0 AND f.embedding_blob IS NOT NULL)
         ORDER BY p.id",
    )?;
    let ids = stmt
        .query_map(params![exclude_person.unwrap_or(-1)], |row| row.get::<_, i64>(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

// Photos

pub fn photo_refs(conn: &Connection, photo_ids: &[i64]) -> Result<HashMap<i64, PhotoRef>> {
    let mut out = HashMap::new();
    for chunk in photo_ids.chunks(ID_CHUNK) {
        let sql = format!("SELECT id, filename, path FROM photos WHERE id IN ({})", placeholders(chunk.len()));
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(chunk.iter()), |row| {
            let id: i64 = row.get(0)?;
            Ok(PhotoRef {
                id,
                filename: row.get(1)?,
                path: row.get(2)?,
                thumbnail_url: PhotoRef::thumbnail_url_for(id),
            })
        })?;
        for r in rows {
            let p = r?;
            out.insert(p.id, p);
        }
    }
    Ok(out)
}

pub fn photo_exists(conn: &Connection, photo_id: i64) -> Result<bool> {
    let exists = conn.query_row("SELECT EXISTS(SELECT 1 FROM photos WHERE id = ?)", params![photo_id], |r| r.get(0))?;
    Ok(exists)
}

// Settings

pub fn get_face_setting(conn: &Connection, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row("SELECT value FROM face_settings WHERE key = ?1", params![key], |row| row.get::<_, String>(0))
        .optional()?;
    Ok(value)
}

/// Numeric setting with a fallback for missing or unparsable values.
pub fn get_float_setting(conn: &Connection, key: &str, default: f32) -> Result<f32> {
    let value = get_face_setting(conn, key)?;
    Ok(value.and_then(|v| v.trim().parse::<f32>().ok()).unwrap_or(default))
}

// Jobs

const JOB_COLUMNS: &str = "id, status, mode, similarity_threshold, batch_size, continuous, initial_count, target_count,
    processed, assigned, persons_created, batch_index, total_batches, face_cursor, errors_json, started_at, updated_at, finished_at";

fn row_to_job(row: &Row<'_>) -> rusqlite::Result<JobRecord> {
    let status: String = row.get("status")?;
    let mode: String = row.get("mode")?;
    let errors_json: String = row.get("errors_json")?;
    let bad = |col: usize, msg: String| {
        rusqlite::Error::FromSqlConversionFailure(col, rusqlite::types::Type::Text, msg.into())
    };
    Ok(JobRecord {
        id: row.get("id")?,
        status: status.parse().map_err(|e| bad(1, e))?,
        mode: mode.parse().map_err(|e| bad(2, e))?,
        similarity_threshold: row.get::<_, f64>("similarity_threshold")? as f32,
        batch_size: row.get("batch_size")?,
        continuous: row.get::<_, i64>("continuous")? != 0,
        initial_count: row.get("initial_count")?,
        target_count: row.get("target_count")?,
        processed: row.get("processed")?,
        assigned: row.get("assigned")?,
        persons_created: row.get("persons_created")?,
        batch_index: row.get("batch_index")?,
        total_batches: row.get("total_batches")?,
        cursor: row.get("face_cursor")?,
        errors: serde_json::from_str(&errors_json).unwrap_or_default(),
        started_at: row.get("started_at")?,
        updated_at: row.get("updated_at")?,
        finished_at: row.get("finished_at")?,
    })
}

pub fn get_job(conn: &Connection, job_id: &str) -> Result<Option<JobRecord>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM cluster_jobs WHERE id = ?");
    let job = conn.query_row(&sql, params![job_id], row_to_job).optional()?;
    Ok(job)
}

pub fn list_jobs(conn: &Connection, limit: i64) -> Result<Vec<JobRecord>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM cluster_jobs ORDER BY started_at DESC, rowid DESC LIMIT ?");
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt.query_map(params![limit], row_to_job)?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}

pub fn active_jobs(conn: &Connection) -> Result<Vec<JobRecord>> {
    let sql = format!("SELECT {JOB_COLUMNS} FROM cluster_jobs WHERE status IN ('starting', 'running') ORDER BY started_at DESC");
    let mut stmt = conn.prepare(&sql)?;
    let jobs = stmt.query_map([], row_to_job)?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(jobs)
}
