//! Persisted index: chunk metadata, embedding matrix and provenance in one SQLite file.
use rusqlite::{Connection, OpenFlags, params};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

pub mod models;

pub use models::{Chunk, EmbeddingMatrix, Index, IndexMeta, Location};

/// Bumped whenever the table layout changes.
pub const FORMAT_VERSION: u32 = 1;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS index_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS chunks (
    ordinal INTEGER PRIMARY KEY,
    id TEXT NOT NULL UNIQUE,
    source_name TEXT NOT NULL,
    location TEXT NOT NULL,
    text TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunk_source ON chunks(source_name);

CREATE TABLE IF NOT EXISTS embeddings (
    ordinal INTEGER PRIMARY KEY,
    vector BLOB NOT NULL
);
"#;

/// Errors raised while saving or loading an index.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("index not found at {0}; run a build first")]
    IndexNotFound(PathBuf),

    #[error("corrupt index at {path}: {reason}")]
    CorruptIndex { path: PathBuf, reason: String },

    #[error("refusing to save index: {0}")]
    InvalidInput(String),

    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    fn corrupt(path: &Path, reason: impl Into<String>) -> Self {
        StoreError::CorruptIndex {
            path: path.to_path_buf(),
            reason: reason.into(),
        }
    }
}

/// Serialize a float32 vector into little-endian bytes.
pub fn serialize_vector(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Inverse of [`serialize_vector`]. `None` if the byte length is not a multiple of 4.
pub fn deserialize_vector(bytes: &[u8]) -> Option<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    Some(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect(),
    )
}

fn validate(index: &Index) -> Result<(), StoreError> {
    let rows = index.embeddings.rows();
    if index.chunks.len() != rows {
        return Err(StoreError::InvalidInput(format!(
            "{} chunks but {} embedding rows",
            index.chunks.len(),
            rows
        )));
    }
    if index.meta.dimensions != index.embeddings.dim() {
        return Err(StoreError::InvalidInput(format!(
            "metadata says {} dimensions, matrix has {}",
            index.meta.dimensions,
            index.embeddings.dim()
        )));
    }

    let mut seen = HashSet::with_capacity(index.chunks.len());
    for chunk in &index.chunks {
        if !seen.insert(chunk.id.as_str()) {
            return Err(StoreError::InvalidInput(format!(
                "duplicate chunk id: {}",
                chunk.id
            )));
        }
    }
    Ok(())
}

fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "index.db".to_string());
    dest.with_file_name(format!("{name}.tmp"))
}

fn write_index(path: &Path, index: &Index) -> Result<(), StoreError> {
    let mut conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA_SQL)?;

    let tx = conn.transaction()?;
    {
        let meta = &index.meta;
        let mut stmt = tx.prepare("INSERT INTO index_meta (key, value) VALUES (?, ?)")?;
        for (key, value) in [
            ("model_name", meta.model_name.clone()),
            ("dimensions", meta.dimensions.to_string()),
            ("source", meta.source.clone()),
            ("chunk_policy", meta.chunk_policy.clone()),
            ("built_at", meta.built_at.clone()),
            ("format_version", meta.format_version.to_string()),
        ] {
            stmt.execute(params![key, value])?;
        }

        let mut chunk_stmt = tx.prepare(
            "INSERT INTO chunks (ordinal, id, source_name, location, text) VALUES (?, ?, ?, ?, ?)",
        )?;
        let mut vec_stmt = tx.prepare("INSERT INTO embeddings (ordinal, vector) VALUES (?, ?)")?;

        for (i, (chunk, row)) in index
            .chunks
            .iter()
            .zip(index.embeddings.iter_rows())
            .enumerate()
        {
            let location = serde_json::to_string(&chunk.location)
                .map_err(|e| StoreError::InvalidInput(format!("location encoding: {e}")))?;
            chunk_stmt.execute(params![
                i as i64,
                chunk.id,
                chunk.source_name,
                location,
                chunk.text
            ])?;
            vec_stmt.execute(params![i as i64, serialize_vector(row)])?;
        }
    }
    tx.commit()?;

    conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
    Ok(())
}

/// Persist an index at `dest`.
///
/// The file is written next to `dest` under a temporary name and renamed into
/// place, so readers see either the previous index or the new one.
pub fn save(index: &Index, dest: &Path) -> Result<(), StoreError> {
    validate(index)?;

    if let Some(parent) = dest.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let tmp = temp_path(dest);
    if tmp.exists() {
        fs::remove_file(&tmp)?;
    }

    if let Err(e) = write_index(&tmp, index) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    if let Err(e) = fs::rename(&tmp, dest) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    info!(
        "Saved index to {} ({} chunks, {}-dim)",
        dest.display(),
        index.chunks.len(),
        index.embeddings.dim()
    );
    Ok(())
}

fn open_read_only(path: &Path) -> Result<Connection, StoreError> {
    if !path.is_file() {
        return Err(StoreError::IndexNotFound(path.to_path_buf()));
    }
    Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
        .map_err(|e| StoreError::corrupt(path, format!("cannot open: {e}")))
}

fn read_meta_from(conn: &Connection, path: &Path) -> Result<IndexMeta, StoreError> {
    let sql_err = |e: rusqlite::Error| StoreError::corrupt(path, format!("metadata: {e}"));

    let mut stmt = conn
        .prepare("SELECT key, value FROM index_meta")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
        .map_err(sql_err)?;

    let mut map = HashMap::new();
    for row in rows {
        let (key, value) = row.map_err(sql_err)?;
        map.insert(key, value);
    }

    let mut take = |key: &str| {
        map.remove(key)
            .ok_or_else(|| StoreError::corrupt(path, format!("missing metadata key `{key}`")))
    };

    let model_name = take("model_name")?;
    let dimensions = take("dimensions")?
        .parse::<usize>()
        .map_err(|e| StoreError::corrupt(path, format!("dimensions: {e}")))?;
    let source = take("source")?;
    let chunk_policy = take("chunk_policy")?;
    let built_at = take("built_at")?;
    let format_version = take("format_version")?
        .parse::<u32>()
        .map_err(|e| StoreError::corrupt(path, format!("format_version: {e}")))?;

    if format_version != FORMAT_VERSION {
        return Err(StoreError::corrupt(
            path,
            format!("unsupported format version {format_version} (expected {FORMAT_VERSION})"),
        ));
    }

    Ok(IndexMeta {
        model_name,
        dimensions,
        source,
        chunk_policy,
        built_at,
        format_version,
    })
}

fn read_chunks(conn: &Connection, path: &Path) -> Result<Vec<Chunk>, StoreError> {
    let sql_err = |e: rusqlite::Error| StoreError::corrupt(path, format!("chunks: {e}"));

    let mut stmt = conn
        .prepare("SELECT ordinal, id, source_name, location, text FROM chunks ORDER BY ordinal")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })
        .map_err(sql_err)?;

    let mut chunks = Vec::new();
    for (expected, row) in rows.enumerate() {
        let (ordinal, id, source_name, location, text) = row.map_err(sql_err)?;
        if ordinal != expected as i64 {
            return Err(StoreError::corrupt(
                path,
                format!("chunk ordinal {ordinal} out of sequence (expected {expected})"),
            ));
        }
        let location: Location = serde_json::from_str(&location)
            .map_err(|e| StoreError::corrupt(path, format!("chunk {id} location: {e}")))?;
        chunks.push(Chunk {
            id,
            source_name,
            location,
            text,
        });
    }
    Ok(chunks)
}

fn read_embeddings(
    conn: &Connection,
    path: &Path,
    dim: usize,
) -> Result<EmbeddingMatrix, StoreError> {
    let sql_err = |e: rusqlite::Error| StoreError::corrupt(path, format!("embeddings: {e}"));

    let mut stmt = conn
        .prepare("SELECT ordinal, vector FROM embeddings ORDER BY ordinal")
        .map_err(sql_err)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)))
        .map_err(sql_err)?;

    let mut matrix = EmbeddingMatrix::empty(dim);
    for (expected, row) in rows.enumerate() {
        let (ordinal, blob) = row.map_err(sql_err)?;
        if ordinal != expected as i64 {
            return Err(StoreError::corrupt(
                path,
                format!("embedding ordinal {ordinal} out of sequence (expected {expected})"),
            ));
        }
        let vector = deserialize_vector(&blob)
            .filter(|v| v.len() == dim)
            .ok_or_else(|| {
                StoreError::corrupt(
                    path,
                    format!(
                        "embedding row {ordinal} has {} bytes, expected {}",
                        blob.len(),
                        dim * 4
                    ),
                )
            })?;
        matrix.push_row(&vector);
    }
    Ok(matrix)
}

fn count(conn: &Connection, path: &Path, table: &str) -> Result<usize, StoreError> {
    let n: i64 = conn
        .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))
        .map_err(|e| StoreError::corrupt(path, format!("{table}: {e}")))?;
    Ok(n as usize)
}

/// Read only the provenance of a persisted index.
pub fn read_meta(path: &Path) -> Result<IndexMeta, StoreError> {
    let conn = open_read_only(path)?;
    read_meta_from(&conn, path)
}

/// Load a persisted index.
///
/// Chunk records and embedding rows are checked against each other before
/// anything is returned: a count or shape mismatch is a [`StoreError::CorruptIndex`].
pub fn load(path: &Path) -> Result<Index, StoreError> {
    let conn = open_read_only(path)?;
    let meta = read_meta_from(&conn, path)?;

    let chunk_count = count(&conn, path, "chunks")?;
    let row_count = count(&conn, path, "embeddings")?;
    if chunk_count != row_count {
        return Err(StoreError::corrupt(
            path,
            format!("{chunk_count} chunk records but {row_count} embedding rows"),
        ));
    }

    let chunks = read_chunks(&conn, path)?;
    let embeddings = read_embeddings(&conn, path, meta.dimensions)?;

    if chunks.len() != embeddings.rows() {
        return Err(StoreError::corrupt(
            path,
            format!(
                "{} chunk records but {} embedding rows",
                chunks.len(),
                embeddings.rows()
            ),
        ));
    }

    info!(
        "Loaded index from {} ({} chunks, model {})",
        path.display(),
        chunks.len(),
        meta.model_name
    );
    debug!("Index built at {} from {}", meta.built_at, meta.source);

    Ok(Index {
        meta,
        chunks,
        embeddings,
    })
}

/// [`load`], warning when the index was built with a different embedding model.
pub fn load_checked(path: &Path, expected_model: &str) -> Result<Index, StoreError> {
    let index = load(path)?;
    if index.meta.model_name != expected_model {
        warn!(
            "Index was built with model `{}` but `{}` is configured; similarity scores may be meaningless",
            index.meta.model_name, expected_model
        );
    }
    Ok(index)
}
