//! Turso/libSQL implementation of the document store.
//!
//! Each logical collection maps to a table of `(id, doc)` rows, where `doc`
//! is the JSON document. It can connect to:
//! - Remote Turso database (cloud)
//! - Local embedded SQLite file
//!
//! Filters and compare-and-set guards are evaluated in SQL with
//! `json_extract`, so guarded updates are atomic at the document level.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use libsql::{Builder, Connection, Database};
use serde_json::Value;
use tracing::instrument;

use crate::error::{Result, StoreError};
use crate::traits::{CasGuard, Collection, DocumentStore, Filter};

/// Turso-backed document store.
#[derive(Clone)]
pub struct TursoStore {
    db: Arc<Database>,
}

impl TursoStore {
    /// Create a store backed by a local embedded database file.
    pub async fn new_local(path: &Path) -> Result<Self> {
        let db = Builder::new_local(path).build().await.map_err(map_libsql)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create a store connected to a remote Turso database.
    pub async fn new_remote(url: &str, token: &str) -> Result<Self> {
        let db = Builder::new_remote(url.to_string(), token.to_string())
            .build()
            .await
            .map_err(map_libsql)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Create an in-memory store (for testing).
    pub async fn new_memory() -> Result<Self> {
        let db = Builder::new_local(":memory:")
            .build()
            .await
            .map_err(map_libsql)?;
        let store = Self { db: Arc::new(db) };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Get a database connection.
    async fn conn(&self) -> Result<Connection> {
        self.db.connect().map_err(map_libsql)
    }

    /// Create collection tables if they do not exist.
    async fn ensure_schema(&self) -> Result<()> {
        let conn = self.conn().await?;
        for collection in Collection::ALL {
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} (id TEXT PRIMARY KEY, doc TEXT NOT NULL)",
                collection.as_str()
            );
            conn.execute(&sql, ()).await.map_err(map_libsql)?;
        }
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for TursoStore {
    #[instrument(skip(self), level = "debug")]
    async fn find_one(&self, collection: Collection, id: &str) -> Result<Option<Value>> {
        let conn = self.conn().await?;
        let sql = format!("SELECT doc FROM {} WHERE id = ?", collection.as_str());
        let mut rows = conn.query(&sql, [id]).await.map_err(map_libsql)?;

        if let Some(row) = rows.next().await.map_err(map_libsql)? {
            let doc: String = row.get(0).map_err(map_libsql)?;
            Ok(Some(parse_doc(&doc)?))
        } else {
            Ok(None)
        }
    }

    #[instrument(skip(self, filter), level = "debug")]
    async fn find_many(&self, collection: Collection, filter: &Filter) -> Result<Vec<Value>> {
        let conn = self.conn().await?;
        let mut sql = format!("SELECT doc FROM {}", collection.as_str());
        let mut params: Vec<libsql::Value> = Vec::new();
        for (i, (field, expected)) in filter.clauses().iter().enumerate() {
            sql.push_str(if i == 0 { " WHERE " } else { " AND " });
            sql.push_str(&format!("json_extract(doc, '$.{field}') = ?"));
            params.push(to_sql(expected));
        }
        sql.push_str(" ORDER BY id");

        let mut rows = conn.query(&sql, params).await.map_err(map_libsql)?;
        let mut docs = Vec::new();
        while let Some(row) = rows.next().await.map_err(map_libsql)? {
            let doc: String = row.get(0).map_err(map_libsql)?;
            docs.push(parse_doc(&doc)?);
        }
        Ok(docs)
    }

    #[instrument(skip(self, doc), level = "debug")]
    async fn insert_one(&self, collection: Collection, id: &str, doc: Value) -> Result<()> {
        let conn = self.conn().await?;
        let sql = format!(
            "INSERT INTO {} (id, doc) VALUES (?, ?)",
            collection.as_str()
        );
        let doc_json = serde_json::to_string(&doc)
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        conn.execute(&sql, [id.to_string(), doc_json])
            .await
            .map_err(map_libsql)?;
        Ok(())
    }

    #[instrument(skip(self, doc, guard), level = "debug")]
    async fn update_one(
        &self,
        collection: Collection,
        id: &str,
        doc: Value,
        guard: Option<&CasGuard>,
    ) -> Result<bool> {
        let conn = self.conn().await?;
        let doc_json = serde_json::to_string(&doc)
            .map_err(|e| StoreError::Validation(e.to_string()))?;
        let mut sql = format!("UPDATE {} SET doc = ? WHERE id = ?", collection.as_str());
        let mut params: Vec<libsql::Value> = vec![
            libsql::Value::Text(doc_json),
            libsql::Value::Text(id.to_string()),
        ];
        if let Some(guard) = guard {
            sql.push_str(&format!(" AND json_extract(doc, '$.{}') = ?", guard.field));
            params.push(to_sql(&guard.expected));
        }

        let affected = conn.execute(&sql, params).await.map_err(map_libsql)?;
        Ok(affected > 0)
    }

    #[instrument(skip(self), level = "debug")]
    async fn delete_one(&self, collection: Collection, id: &str) -> Result<bool> {
        let conn = self.conn().await?;
        let sql = format!("DELETE FROM {} WHERE id = ?", collection.as_str());
        let affected = conn.execute(&sql, [id]).await.map_err(map_libsql)?;
        Ok(affected > 0)
    }
}

/// Classify a libsql error into the store taxonomy.
///
/// Primary-key violations surface as conflicts; everything else from the
/// driver is treated as a connectivity failure.
fn map_libsql(err: libsql::Error) -> StoreError {
    let msg = err.to_string();
    if msg.contains("UNIQUE constraint failed") {
        StoreError::Conflict(msg)
    } else {
        StoreError::Connection(msg)
    }
}

fn parse_doc(raw: &str) -> Result<Value> {
    serde_json::from_str(raw).map_err(|e| StoreError::Validation(format!("invalid document: {e}")))
}

/// Convert a JSON value into a SQL parameter for filter/guard comparisons.
fn to_sql(value: &Value) -> libsql::Value {
    match value {
        Value::Null => libsql::Value::Null,
        Value::Bool(b) => libsql::Value::Integer(i64::from(*b)),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                libsql::Value::Integer(i)
            } else {
                libsql::Value::Real(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => libsql::Value::Text(s.clone()),
        other => libsql::Value::Text(other.to_string()),
    }
}
