//! DuckDB-backed document store.
//!
//! Every revision of a document replaces its single row in `documents`.
//! `body` holds the full JSON document (envelope members included), so
//! the store never needs to understand encrypted payloads. `rev` and
//! `deleted` are duplicated into columns for filtering.

use crate::error::{StorageError, StorageResult};
use crate::feed::{ChangeFeed, StoreChange};
use crate::revision::{resolve_write, WriteOp};
use crate::store::{DocumentStore, IdRange};
use async_trait::async_trait;
use docseal_types::{Document, DocumentExt};
use duckdb::{params, params_from_iter, Connection};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::warn;

const MEMORY_LIMIT: &str = "256MB";
const THREADS: u32 = 2;

/// Document store backed by a DuckDB database.
#[derive(Clone)]
pub struct DuckDbStore {
    conn: Arc<Mutex<Connection>>,
    feed: Arc<ChangeFeed>,
}

impl DuckDbStore {
    /// Opens or creates a store at the given path.
    ///
    /// An unclean shutdown can leave a write-ahead log that DuckDB refuses
    /// to replay. If the first open fails while such a log exists, the log
    /// is dropped and the open retried once.
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = match Connection::open(path) {
            Ok(conn) => conn,
            Err(err) => {
                let wal = wal_path(path);
                if !wal.exists() {
                    return Err(err.into());
                }
                warn!("Store at {} failed to open ({}), discarding {}", path.display(), err, wal.display());
                std::fs::remove_file(&wal).map_err(|_| StorageError::from(err))?;
                Connection::open(path)?
            }
        };
        conn.execute_batch(&format!(
            "PRAGMA memory_limit='{MEMORY_LIMIT}'; PRAGMA threads={THREADS};"
        ))?;
        initialize_document_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Opens an in-memory store (for testing).
    pub fn open_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        initialize_document_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
            feed: Arc::new(ChangeFeed::new()),
        }
    }

    fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self, doc: Document, op: WriteOp) -> StorageResult<Document> {
        let change = {
            let conn = self.connection();
            let id = doc.id().unwrap_or_default().to_string();
            let existing = load_row(&conn, &id)?;
            let (stored, kind) = resolve_write(existing.as_ref(), doc, op)?;
            save_row(&conn, &id, &stored)?;
            StoreChange { kind, doc: stored }
        };
        self.feed.emit(&change);
        Ok(change.doc)
    }
}

/// `store.db` keeps its log in `store.db.wal`.
fn wal_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".wal");
    PathBuf::from(name)
}

fn load_row(conn: &Connection, id: &str) -> StorageResult<Option<Document>> {
    let result = conn.query_row(
        "SELECT body FROM documents WHERE id = ?",
        params![id],
        |row| row.get::<_, String>(0),
    );
    match result {
        Ok(body) => Ok(Some(parse_body(&body)?)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn save_row(conn: &Connection, id: &str, doc: &Document) -> StorageResult<()> {
    let body = serde_json::to_string(doc)?;
    conn.execute(
        "INSERT OR REPLACE INTO documents (id, rev, deleted, body) VALUES (?, ?, ?, ?)",
        params![id, doc.rev().unwrap_or_default(), doc.is_deleted(), body],
    )?;
    Ok(())
}

fn parse_body(body: &str) -> StorageResult<Document> {
    match serde_json::from_str(body)? {
        serde_json::Value::Object(map) => Ok(map),
        _ => Err(StorageError::InvalidDocument(
            "stored body is not an object".to_string(),
        )),
    }
}

#[async_trait]
impl DocumentStore for DuckDbStore {
    async fn find(&self, id: &str) -> StorageResult<Document> {
        let conn = self.connection();
        match load_row(&conn, id)? {
            Some(doc) if !doc.is_deleted() => Ok(doc),
            _ => Err(StorageError::NotFound(id.to_string())),
        }
    }

    async fn find_all(&self, range: &IdRange) -> StorageResult<Vec<Document>> {
        let mut sql = String::from("SELECT body FROM documents WHERE deleted = FALSE");
        let mut bounds = Vec::new();
        if let Some(start) = &range.start {
            sql.push_str(" AND id >= ?");
            bounds.push(start.clone());
        }
        if let Some(end) = &range.end {
            sql.push_str(" AND id < ?");
            bounds.push(end.clone());
        }
        sql.push_str(" ORDER BY id");

        let conn = self.connection();
        let mut stmt = conn.prepare(&sql)?;
        let bodies: Vec<String> = stmt
            .query_map(params_from_iter(bounds), |row| row.get::<_, String>(0))?
            .collect::<Result<_, _>>()?;
        bodies.iter().map(|body| parse_body(body)).collect()
    }

    async fn add(&self, doc: Document) -> StorageResult<Document> {
        self.write(doc, WriteOp::Add)
    }

    async fn update(&self, doc: Document) -> StorageResult<Document> {
        self.write(doc, WriteOp::Update)
    }

    async fn remove(&self, doc: Document) -> StorageResult<Document> {
        self.write(doc, WriteOp::Remove)
    }

    async fn bulk_write(&self, docs: Vec<Document>) -> StorageResult<Vec<StorageResult<Document>>> {
        Ok(docs
            .into_iter()
            .map(|doc| {
                let op = WriteOp::classify(&doc);
                self.write(doc, op)
            })
            .collect())
    }

    fn changes(&self) -> &ChangeFeed {
        &self.feed
    }
}

fn initialize_document_schema(conn: &Connection) -> StorageResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id VARCHAR PRIMARY KEY,
            rev VARCHAR NOT NULL,
            deleted BOOLEAN NOT NULL DEFAULT FALSE,
            body TEXT NOT NULL
        );
        "#,
    )?;
    Ok(())
}
