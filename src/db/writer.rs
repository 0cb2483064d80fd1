use anyhow::Result;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::db::blob::encode_embedding;
use crate::db::{placeholders, ID_CHUNK};
use crate::models::face::{NewFace, NewPhoto};
use crate::models::job::{JobRecord, JobStatus};

pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}

// Photos and faces (ingestion boundary)

/// Inserts the photo, or returns the existing row id when `photo.id` is already stored.
pub fn ensure_photo(conn: &Connection, photo: &NewPhoto) -> Result<i64> {
    if let Some(id) = photo.id {
        let exists: bool = conn.query_row("SELECT EXISTS(SELECT 1 FROM photos WHERE id = ?)", params![id], |r| r.get(0))?;
        if exists {
            return Ok(id);
        }
    }
    conn.execute(
        "INSERT INTO photos(id, filename, path, width, height, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![photo.id, photo.filename, photo.path, photo.width, photo.height, now_ts()],
    )?;
    Ok(conn.last_insert_rowid())
}

pub fn insert_face(conn: &Connection, face: &NewFace) -> Result<i64> {
    let blob = face
        .embedding
        .as_ref()
        .filter(|e| !e.is_empty())
        .map(|e| encode_embedding(e));
    let b = face.bounding_box;
    conn.execute(
        "INSERT INTO faces(photo_id, person_id, x, y, width, height, confidence, embedding_blob, ignored, created_at)
         VALUES (?1, NULL, ?2, ?3, ?4, ?5, ?6, ?7, 0, ?8)",
        params![
            face.photo_id,
            b.x as f64,
            b.y as f64,
            b.width as f64,
            b.height as f64,
            face.confidence as f64,
            blob,
            now_ts()
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

// Persons

pub fn insert_person(conn: &Connection, name: Option<&str>, confirmed: bool) -> Result<i64> {
    let now = now_ts();
    conn.execute(
        "INSERT INTO persons(name, confirmed, face_count, created_at, updated_at) VALUES (?1, ?2, 0, ?3, ?3)",
        params![name, confirmed as i64, now],
    )?;
    Ok(conn.last_insert_rowid())
}

/// `name: Some(None)` clears the name; `None` leaves it untouched.
pub fn update_person(conn: &Connection, person_id: i64, name: Option<Option<&str>>, confirmed: Option<bool>) -> Result<bool> {
    let now = now_ts();
    let mut changed = 0;
    if let Some(name) = name {
        let name = name.map(str::trim).filter(|n| !n.is_empty());
        changed += conn.execute(
            "UPDATE persons SET name = ?1, updated_at = ?2 WHERE id = ?3",
            params![name, now, person_id],
        )?;
    }
    if let Some(confirmed) = confirmed {
        changed += conn.execute(
            "UPDATE persons SET confirmed = ?1, updated_at = ?2 WHERE id = ?3",
            params![confirmed as i64, now, person_id],
        )?;
    }
    if name.is_none() && confirmed.is_none() {
        let exists: bool = conn.query_row("SELECT EXISTS(SELECT 1 FROM persons WHERE id = ?)", params![person_id], |r| r.get(0))?;
        return Ok(exists);
    }
    Ok(changed > 0)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AssignOutcome {
    /// Faces whose `person_id` moved from NULL to the person.
    pub assigned: Vec<i64>,
    /// How many of those count toward `face_count` (not ignored).
    pub counted: i64,
}

fn assign_in_tx(tx: &Connection, person_id: i64, face_ids: &[i64]) -> Result<AssignOutcome> {
    let mut outcome = AssignOutcome::default();
    {
        let mut stmt = tx.prepare(
            "UPDATE faces SET person_id = ?1 WHERE id = ?2 AND person_id IS NULL RETURNING ignored",
        )?;
        for &face_id in face_ids {
            let ignored: Option<i64> = stmt.query_row(params![person_id, face_id], |r| r.get(0)).optional()?;
            if let Some(ignored) = ignored {
                outcome.assigned.push(face_id);
                if ignored == 0 {
                    outcome.counted += 1;
                }
            }
        }
    }
    if !outcome.assigned.is_empty() {
        tx.execute(
            "UPDATE persons SET face_count = face_count + ?1, updated_at = ?2 WHERE id = ?3",
            params![outcome.counted, now_ts(), person_id],
        )?;
    }
    Ok(outcome)
}

/// Claims each still-unassigned face for the person. Already-assigned faces are skipped.
pub fn assign_faces_to_person(conn: &Connection, person_id: i64, face_ids: &[i64]) -> Result<AssignOutcome> {
    let tx = conn.unchecked_transaction()?;
    let outcome = assign_in_tx(&tx, person_id, face_ids)?;
    tx.commit()?;
    Ok(outcome)
}

/// Creates a person and seeds it with the given faces in one transaction.
pub fn create_person_with_faces(conn: &Connection, name: Option<&str>, face_ids: &[i64]) -> Result<(i64, AssignOutcome)> {
    let tx = conn.unchecked_transaction()?;
    let now = now_ts();
    tx.execute(
        "INSERT INTO persons(name, confirmed, face_count, created_at, updated_at) VALUES (?1, 0, 0, ?2, ?2)",
        params![name, now],
    )?;
    let person_id = tx.last_insert_rowid();
    let outcome = assign_in_tx(&tx, person_id, face_ids)?;
    tx.commit()?;
    Ok((person_id, outcome))
}

pub fn recount_person(conn: &Connection, person_id: i64) -> Result<i64> {
    conn.execute(
        "UPDATE persons SET face_count = (SELECT COUNT(*) FROM faces WHERE person_id = ?1 AND ignored = 0), updated_at = ?2 WHERE id = ?1",
        params![person_id, now_ts()],
    )?;
    let count = conn
        .query_row("SELECT face_count FROM persons WHERE id = ?", params![person_id], |r| r.get(0))
        .optional()?;
    Ok(count.unwrap_or(0))
}

pub fn recount_persons(conn: &Connection, person_ids: &[i64]) -> Result<()> {
    for &id in person_ids {
        recount_person(conn, id)?;
    }
    Ok(())
}

/// Recomputes every person's `face_count`; returns how many rows changed.
pub fn recount_all(conn: &Connection) -> Result<usize> {
    let changed = conn.execute(
        "UPDATE persons SET face_count = c.n, updated_at = ?1
         FROM (SELECT p.id AS pid, (SELECT COUNT(*) FROM faces f WHERE f.person_id = p.id AND f.ignored = 0) AS n FROM persons p) AS c
         WHERE persons.id = c.pid AND persons.face_count != c.n",
        params![now_ts()],
    )?;
    Ok(changed)
}

/// Unassigns the given faces if they currently belong to `person_id`.
pub fn unassign_faces_from_person(conn: &Connection, person_id: i64, face_ids: &[i64]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut total = 0;
    for chunk in face_ids.chunks(ID_CHUNK) {
        let sql = format!(
            "UPDATE faces SET person_id = NULL WHERE person_id = ? AND id IN ({})",
            placeholders(chunk.len())
        );
        let mut values: Vec<i64> = Vec::with_capacity(chunk.len() + 1);
        values.push(person_id);
        values.extend_from_slice(chunk);
        total += tx.execute(&sql, params_from_iter(values.iter()))?;
    }
    recount_person(&tx, person_id)?;
    tx.commit()?;
    Ok(total)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeOutcome {
    pub faces_moved: usize,
    pub persons_removed: usize,
    pub face_count: i64,
}

/// Moves every face of `sources` to `target`, deletes the sources and recounts the target.
pub fn merge_persons(conn: &Connection, target: i64, sources: &[i64]) -> Result<MergeOutcome> {
    let tx = conn.unchecked_transaction()?;
    let mut outcome = MergeOutcome::default();
    for &source in sources {
        outcome.faces_moved += tx.execute(
            "UPDATE faces SET person_id = ?1 WHERE person_id = ?2",
            params![target, source],
        )?;
        tx.execute("DELETE FROM person_prototypes WHERE person_id = ?1", params![source])?;
        outcome.persons_removed += tx.execute("DELETE FROM persons WHERE id = ?1", params![source])?;
    }
    outcome.face_count = recount_person(&tx, target)?;
    tx.commit()?;
    Ok(outcome)
}

/// Unassigns the person's faces, then removes the person. Returns faces unassigned.
pub fn delete_person(conn: &Connection, person_id: i64) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let unassigned = tx.execute("UPDATE faces SET person_id = NULL WHERE person_id = ?1", params![person_id])?;
    tx.execute("DELETE FROM person_prototypes WHERE person_id = ?1", params![person_id])?;
    tx.execute("DELETE FROM persons WHERE id = ?1", params![person_id])?;
    tx.commit()?;
    Ok(unassigned)
}

/// Returns `(deleted_people, unassigned_faces)`.
pub fn delete_all_people(conn: &Connection) -> Result<(usize, usize)> {
    let tx = conn.unchecked_transaction()?;
    let unassigned = tx.execute("UPDATE faces SET person_id = NULL WHERE person_id IS NOT NULL", [])?;
    tx.execute("DELETE FROM person_prototypes", [])?;
    let deleted = tx.execute("DELETE FROM persons", [])?;
    tx.commit()?;
    Ok((deleted, unassigned))
}

pub fn set_faces_ignored(conn: &Connection, face_ids: &[i64], ignored: bool) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut total = 0;
    for chunk in face_ids.chunks(ID_CHUNK) {
        let sql = format!(
            "UPDATE faces SET ignored = ? WHERE ignored != ? AND id IN ({})",
            placeholders(chunk.len())
        );
        let flag = ignored as i64;
        let mut values: Vec<i64> = vec![flag, flag];
        values.extend_from_slice(chunk);
        total += tx.execute(&sql, params_from_iter(values.iter()))?;
    }
    tx.commit()?;
    Ok(total)
}

pub fn delete_faces(conn: &Connection, face_ids: &[i64]) -> Result<usize> {
    let tx = conn.unchecked_transaction()?;
    let mut total = 0;
    for chunk in face_ids.chunks(ID_CHUNK) {
        let sql = format!("DELETE FROM faces WHERE id IN ({})", placeholders(chunk.len()));
        total += tx.execute(&sql, params_from_iter(chunk.iter()))?;
    }
    tx.commit()?;
    Ok(total)
}

// Prototypes

pub fn upsert_prototype(conn: &Connection, person_id: i64, prototype: &[f32], sample_size: usize) -> Result<()> {
    conn.execute(
        "INSERT INTO person_prototypes(person_id, prototype_blob, sample_size, updated_at) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(person_id) DO UPDATE SET prototype_blob = excluded.prototype_blob,
           sample_size = excluded.sample_size, updated_at = excluded.updated_at",
        params![person_id, encode_embedding(prototype), sample_size as i64, now_ts()],
    )?;
    Ok(())
}

pub fn clear_prototype(conn: &Connection, person_id: i64) -> Result<bool> {
    let n = conn.execute("DELETE FROM person_prototypes WHERE person_id = ?1", params![person_id])?;
    Ok(n > 0)
}

// Settings

pub fn set_face_setting(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO face_settings(key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, now_ts()],
    )?;
    Ok(())
}

// Jobs

/// Upserts the record. A job that already reached a terminal status keeps it.
pub fn save_job(conn: &Connection, job: &JobRecord) -> Result<()> {
    let errors_json = serde_json::to_string(&job.errors)?;
    conn.execute(
        "INSERT INTO cluster_jobs(id, status, mode, similarity_threshold, batch_size, continuous, initial_count, target_count,
            processed, assigned, persons_created, batch_index, total_batches, face_cursor, errors_json, started_at, updated_at, finished_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18)
         ON CONFLICT(id) DO UPDATE SET
            status = CASE WHEN cluster_jobs.status IN ('starting', 'running') THEN excluded.status ELSE cluster_jobs.status END,
            processed = excluded.processed,
            assigned = excluded.assigned, persons_created = excluded.persons_created,
            batch_index = excluded.batch_index, total_batches = excluded.total_batches,
            face_cursor = excluded.face_cursor,
            errors_json = excluded.errors_json, updated_at = excluded.updated_at,
            finished_at = COALESCE(cluster_jobs.finished_at, excluded.finished_at)",
        params![
            job.id,
            job.status.as_str(),
            job.mode.as_str(),
            job.similarity_threshold as f64,
            job.batch_size,
            job.continuous as i64,
            job.initial_count,
            job.target_count,
            job.processed,
            job.assigned,
            job.persons_created,
            job.batch_index,
            job.total_batches,
            job.cursor,
            errors_json,
            job.started_at,
            job.updated_at,
            job.finished_at
        ],
    )?;
    Ok(())
}

/// Moves an active job to a terminal status, appending `error` when given.
/// Returns false when the job is missing or already finished.
pub fn finish_job(conn: &Connection, job_id: &str, status: JobStatus, error: Option<&str>) -> Result<bool> {
    let now = now_ts();
    let errors_json: Option<String> = conn
        .query_row(
            "SELECT errors_json FROM cluster_jobs WHERE id = ?1 AND status IN ('starting', 'running')",
            params![job_id],
            |r| r.get(0),
        )
        .optional()?;
    let Some(errors_json) = errors_json else {
        return Ok(false);
    };
    let mut errors: Vec<String> = serde_json::from_str(&errors_json).unwrap_or_default();
    if let Some(error) = error {
        errors.push(error.to_string());
    }
    conn.execute(
        "UPDATE cluster_jobs SET status = ?1, errors_json = ?2, updated_at = ?3, finished_at = ?3 WHERE id = ?4",
        params![status.as_str(), serde_json::to_string(&errors)?, now, job_id],
    )?;
    Ok(true)
}
