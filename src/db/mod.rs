pub mod blob;
pub mod schema;
pub mod writer;
pub mod query;

use anyhow::{Context, Result};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::functions::FunctionFlags;
use rusqlite::Connection;
use std::path::Path;

use crate::error::FaceError;
use crate::faces::vector;

pub type DbPool = r2d2::Pool<SqliteConnectionManager>;

/// Name of the SQL scalar the indexed search strategy scores with.
pub const COSINE_DISTANCE_FN: &str = "vec_cosine_distance";

pub fn open_or_create<P: AsRef<Path>>(db_path: P) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    schema::apply_pragmas(&conn)?;
    register_vector_functions(&conn)?;
    schema::apply_schema(&conn)?;
    Ok(conn)
}

/// `vec_cosine_distance(a, b)` returns `1 - cosine_similarity` computed in f64,
/// or NULL when either side is NULL or not a valid embedding blob.
pub fn register_vector_functions(conn: &Connection) -> rusqlite::Result<()> {
    conn.create_scalar_function(
        COSINE_DISTANCE_FN,
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        |ctx| {
            let a: Option<Vec<u8>> = ctx.get(0)?;
            let b: Option<Vec<u8>> = ctx.get(1)?;
            let (Some(a), Some(b)) = (a, b) else {
                return Ok(None);
            };
            let (Ok(a), Ok(b)) = (blob::decode_embedding_blob(&a), blob::decode_embedding_blob(&b)) else {
                return Ok(None);
            };
            let similarity = vector::cosine_similarity(&a, &b) as f64;
            Ok(Some(1.0f64 - similarity))
        },
    )
}

pub fn create_pool<P: AsRef<Path>>(db_path: P, size: u32) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(db_path.as_ref()).with_init(|conn| {
        schema::apply_pragmas(conn)?;
        register_vector_functions(conn)
    });
    let pool = r2d2::Pool::builder()
        .max_size(size)
        .build(manager)
        .context("Failed to build SQLite connection pool")?;
    {
        let conn = pool.get()?;
        schema::apply_schema(&conn)?;
    }
    Ok(pool)
}

/// Async handle over the pool. Every call hops onto the blocking pool so
/// storage access is a suspension point rather than a stalled worker.
#[derive(Clone)]
pub struct Db {
    pool: DbPool,
}

impl Db {
    pub fn open<P: AsRef<Path>>(db_path: P, size: u32) -> Result<Self> {
        Ok(Self { pool: create_pool(db_path, size)? })
    }

    pub fn from_pool(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub async fn run<T, F>(&self, f: F) -> crate::error::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> crate::error::Result<T> {
            let mut conn = pool.get()?;
            f(&mut *conn).map_err(FaceError::from)
        })
        .await?
    }
}

/// `?,?,?` for an IN list of `n` values.
pub(crate) fn placeholders(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

/// SQLite caps bound parameters per statement; id lists are processed in chunks.
pub(crate) const ID_CHUNK: usize = 500;
