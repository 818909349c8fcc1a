//! SQLite parent store backend.
//!
//! Provides [`SqliteParentStore`] which implements [`ParentStore`] using
//! [sqlx](https://docs.rs/sqlx). Each store owns one table:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS "<table>" (content TEXT NOT NULL, id TEXT NOT NULL)
//! ```
//!
//! with a non-unique index on `id`. Table names are quoted in every statement,
//! so sanitized names that are SQL keywords or start with a digit still work.
//!
//! # Example
//!
//! ```rust,ignore
//! use litrag::SqliteParentStore;
//!
//! let store = SqliteParentStore::open("data/parents.db", "parent_documents").await?;
//! store.put_many(&documents).await?;
//! let found = store.get_many(&["doc-1", "doc-2"]).await?;
//! ```

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;

use async_trait::async_trait;
use futures::stream::BoxStream;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::debug;

use super::{
    ParentStore, SCAN_PAGE_SIZE, decode_document, encode_document, paginate, sanitize_table_name,
};
use crate::document::ParentDocument;
use crate::error::{Result, RetrievalError};

const BACKEND: &str = "sqlite";

/// A [`ParentStore`] backed by a SQLite table.
///
/// The pool is shared and internally synchronized, so one store can serve
/// concurrent retrieval requests.
#[derive(Debug, Clone)]
pub struct SqliteParentStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteParentStore {
    /// Open (or create) the database file at `path`.
    pub async fn open(path: impl AsRef<Path>, table: &str) -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(map_err)?;
        Self::from_pool(pool, table)
    }

    /// Connect using a `sqlite:` URL.
    pub async fn connect(url: &str, table: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url).map_err(map_err)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(map_err)?;
        Self::from_pool(pool, table)
    }

    /// A private in-memory database.
    ///
    /// The pool holds a single connection that never expires, since every
    /// SQLite memory connection is its own database.
    pub async fn in_memory(table: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(map_err)?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(map_err)?;
        Self::from_pool(pool, table)
    }

    /// Wrap an existing pool. The table name is sanitized.
    pub fn from_pool(pool: SqlitePool, table: &str) -> Result<Self> {
        Ok(Self { pool, table: sanitize_table_name(BACKEND, table)? })
    }

    async fn table_exists(&self) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?",
        )
        .bind(&self.table)
        .fetch_one(&self.pool)
        .await
        .map_err(map_err)?;
        Ok(count > 0)
    }

    async fn ensure_table(&self) -> Result<()> {
        let table = &self.table;
        let create_sql = format!(
            r#"CREATE TABLE IF NOT EXISTS "{table}" (content TEXT NOT NULL, id TEXT NOT NULL)"#
        );
        sqlx::query(&create_sql).execute(&self.pool).await.map_err(map_err)?;

        let index_sql = format!(r#"CREATE INDEX IF NOT EXISTS "{table}_id_idx" ON "{table}" (id)"#);
        sqlx::query(&index_sql).execute(&self.pool).await.map_err(map_err)?;
        Ok(())
    }

    async fn page(&self, prefix: Option<&str>, offset: usize) -> Result<Vec<String>> {
        if !self.table_exists().await? {
            return Ok(Vec::new());
        }

        let table = &self.table;
        let limit = SCAN_PAGE_SIZE as i64;
        let offset = offset as i64;
        let rows = match prefix {
            Some(prefix) => {
                let sql = format!(
                    "SELECT id FROM \"{table}\" WHERE id LIKE ? ESCAPE '\\' \
                     ORDER BY rowid LIMIT ? OFFSET ?"
                );
                sqlx::query(&sql)
                    .bind(like_prefix(prefix))
                    .bind(limit)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await
            }
            None => {
                let sql = format!(r#"SELECT id FROM "{table}" ORDER BY rowid LIMIT ? OFFSET ?"#);
                sqlx::query(&sql).bind(limit).bind(offset).fetch_all(&self.pool).await
            }
        }
        .map_err(map_err)?;

        rows.iter().map(|row| row.try_get::<String, _>("id").map_err(map_err)).collect()
    }
}

#[async_trait]
impl ParentStore for SqliteParentStore {
    fn table_name(&self) -> &str {
        &self.table
    }

    async fn put_many(&self, documents: &[ParentDocument]) -> Result<()> {
        self.ensure_table().await?;
        if documents.is_empty() {
            return Ok(());
        }

        let insert_sql = format!(r#"INSERT INTO "{}" (content, id) VALUES (?, ?)"#, self.table);
        let mut tx = self.pool.begin().await.map_err(map_err)?;
        for document in documents {
            let content = encode_document(document)?;
            sqlx::query(&insert_sql)
                .bind(content)
                .bind(&document.id)
                .execute(&mut *tx)
                .await
                .map_err(map_err)?;
        }
        tx.commit().await.map_err(map_err)?;

        debug!(table = %self.table, inserted = documents.len(), "appended parent documents");
        Ok(())
    }

    async fn get_many(&self, ids: &[&str]) -> Result<Vec<Option<ParentDocument>>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        if !self.table_exists().await? {
            return Ok(vec![None; ids.len()]);
        }

        let mut seen = HashSet::with_capacity(ids.len());
        let unique: Vec<&str> = ids.iter().copied().filter(|id| seen.insert(*id)).collect();

        let mut query: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!(r#"SELECT id, content FROM "{}" WHERE id IN ("#, self.table));
        let mut separated = query.separated(", ");
        for id in &unique {
            separated.push_bind(*id);
        }
        separated.push_unseparated(") ORDER BY rowid");

        let rows = query.build().fetch_all(&self.pool).await.map_err(map_err)?;
        let mut found: HashMap<String, String> = HashMap::with_capacity(unique.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(map_err)?;
            let content: String = row.try_get("content").map_err(map_err)?;
            found.entry(id).or_insert(content);
        }

        debug!(
            table = %self.table,
            requested = ids.len(),
            found = found.len(),
            "looked up parent documents"
        );
        ids.iter()
            .map(|id| found.get(*id).map(|content| decode_document(id, content)).transpose())
            .collect()
    }

    async fn delete_many(&self, ids: &[&str]) -> Result<()> {
        if !self.table_exists().await? {
            return Err(RetrievalError::StoreNotInitialized { table: self.table.clone() });
        }
        if ids.is_empty() {
            return Ok(());
        }

        let mut query: QueryBuilder<'_, Sqlite> =
            QueryBuilder::new(format!(r#"DELETE FROM "{}" WHERE id IN ("#, self.table));
        let mut separated = query.separated(", ");
        for id in ids {
            separated.push_bind(*id);
        }
        separated.push_unseparated(")");

        let result = query.build().execute(&self.pool).await.map_err(map_err)?;
        debug!(table = %self.table, deleted = result.rows_affected(), "deleted parent documents");
        Ok(())
    }

    fn scan<'a>(&'a self, prefix: Option<&'a str>) -> BoxStream<'a, Result<String>> {
        paginate(move |offset| self.page(prefix, offset))
    }
}

fn map_err(e: sqlx::Error) -> RetrievalError {
    RetrievalError::Store { backend: BACKEND.to_string(), message: e.to_string() }
}

/// Escape `LIKE` wildcards in `prefix` and append `%`.
fn like_prefix(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}
