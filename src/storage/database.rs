//! SQLite fragment store with migrations
//!
//! Holds memory fragments and their embeddings for the retrieval ranker

use super::codec::{decode_embedding, encode_embedding};
use crate::error::{MnemoError, Result};
use crate::retrieval::{FragmentEmbeddings, MemoryFragment};
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, params_from_iter, Row};
use std::path::Path;

/// Database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

const FRAGMENT_COLUMNS: &str = "id, category, content, dimension, combined_embedding, \
     category_embedding, content_embedding, created_at";

/// Fragment repository with migration support
#[derive(Clone)]
pub struct FragmentStore {
    pool: DbPool,
}

/// Row as stored, before blobs are decoded
struct FragmentRow {
    id: i64,
    category: String,
    content: String,
    dimension: Option<i64>,
    combined: Option<Vec<u8>>,
    category_embedding: Option<Vec<u8>>,
    content_embedding: Option<Vec<u8>>,
    created_at: i64,
}

impl FragmentRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            category: row.get(1)?,
            content: row.get(2)?,
            dimension: row.get(3)?,
            combined: row.get(4)?,
            category_embedding: row.get(5)?,
            content_embedding: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_fragment(self) -> Result<MemoryFragment> {
        let dimension = self.dimension.unwrap_or(0) as usize;
        let decode = |blob: Option<Vec<u8>>| -> Result<Option<Vec<f32>>> {
            blob.map(|bytes| decode_embedding(&bytes, dimension))
                .transpose()
        };

        Ok(MemoryFragment {
            id: self.id,
            category: self.category,
            content: self.content,
            embeddings: FragmentEmbeddings {
                combined: decode(self.combined)?,
                category: decode(self.category_embedding)?,
                content: decode(self.content_embedding)?,
            },
            created_at: DateTime::from_timestamp(self.created_at, 0).unwrap_or_default(),
        })
    }
}

impl FragmentStore {
    /// Open (or create) the store at `db_path`
    pub fn open(db_path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MnemoError::Io {
                source: e,
                context: format!("Failed to create database directory: {:?}", parent),
            })?;
        }

        let manager = SqliteConnectionManager::file(db_path);
        Self::with_manager(manager, 16)
    }

    /// In-memory store, one connection so every caller sees the same data
    pub fn in_memory() -> Result<Self> {
        Self::with_manager(SqliteConnectionManager::memory(), 1)
    }

    fn with_manager(manager: SqliteConnectionManager, max_size: u32) -> Result<Self> {
        let pool = Pool::builder()
            .max_size(max_size)
            .build(manager)
            .map_err(|e| MnemoError::Config(format!("Failed to create connection pool: {}", e)))?;

        {
            let conn = pool
                .get()
                .map_err(|e| MnemoError::Config(format!("Failed to get connection: {}", e)))?;

            // WAL for concurrent readers while a writer is active
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = NORMAL;
                PRAGMA foreign_keys = ON;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
        }

        let store = Self { pool };
        store.migrate()?;
        Ok(store)
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<r2d2::PooledConnection<SqliteConnectionManager>> {
        self.pool
            .get()
            .map_err(|e| MnemoError::Config(format!("Failed to get connection: {}", e)))
    }

    /// Run database migrations
    fn migrate(&self) -> Result<()> {
        let conn = self.get_conn()?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL
            )",
            [],
        )?;

        let current_version: i32 = conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM _migrations",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0);

        for (version, migration) in MIGRATIONS.iter().enumerate() {
            let version = version as i32 + 1;

            if version > current_version {
                tracing::info!("Applying migration {}", version);
                conn.execute_batch(migration)?;
                conn.execute(
                    "INSERT INTO _migrations (version, applied_at) VALUES (?1, datetime('now'))",
                    params![version],
                )?;
            }
        }

        Ok(())
    }

    /// Store a fragment; all present embeddings must share one dimension
    pub fn insert(
        &self,
        category: &str,
        content: &str,
        embeddings: &FragmentEmbeddings,
    ) -> Result<i64> {
        let dimension = embeddings
            .dimension()
            .map_err(|(expected, actual)| MnemoError::DimensionMismatch { expected, actual })?;

        let encode = |vector: &Option<Vec<f32>>| vector.as_deref().map(encode_embedding);

        let conn = self.get_conn()?;
        conn.execute(
            "INSERT INTO fragments (category, content, dimension, combined_embedding,
                                    category_embedding, content_embedding, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                category,
                content,
                dimension.map(|d| d as i64),
                encode(&embeddings.combined),
                encode(&embeddings.category),
                encode(&embeddings.content),
                Utc::now().timestamp(),
            ],
        )?;

        let id = conn.last_insert_rowid();
        tracing::debug!("Stored fragment {} in category {:?}", id, category);
        Ok(id)
    }

    pub fn get(&self, id: i64) -> Result<MemoryFragment> {
        let conn = self.get_conn()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM fragments WHERE id = ?1", FRAGMENT_COLUMNS),
                params![id],
                FragmentRow::from_row,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => MnemoError::FragmentNotFound { id },
                other => other.into(),
            })?;
        row.into_fragment()
    }

    /// All fragments, optionally restricted to a category allow-list
    ///
    /// Category matching ignores case.
    pub fn list(&self, categories: Option<&[String]>) -> Result<Vec<MemoryFragment>> {
        self.query_fragments(categories, false)
    }

    /// Fragments that carry a combined embedding
    pub fn list_searchable(&self, categories: Option<&[String]>) -> Result<Vec<MemoryFragment>> {
        self.query_fragments(categories, true)
    }

    fn query_fragments(
        &self,
        categories: Option<&[String]>,
        searchable_only: bool,
    ) -> Result<Vec<MemoryFragment>> {
        let mut sql = format!("SELECT {} FROM fragments WHERE 1 = 1", FRAGMENT_COLUMNS);
        if searchable_only {
            sql.push_str(" AND combined_embedding IS NOT NULL");
        }

        let filter: Vec<String> = categories
            .unwrap_or_default()
            .iter()
            .map(|c| c.to_lowercase())
            .collect();
        if categories.is_some() {
            if filter.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders = vec!["?"; filter.len()].join(", ");
            sql.push_str(&format!(" AND lower(category) IN ({})", placeholders));
        }
        sql.push_str(" ORDER BY id");

        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(filter.iter()), FragmentRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        rows.into_iter().map(FragmentRow::into_fragment).collect()
    }

    pub fn count(&self) -> Result<usize> {
        let conn = self.get_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn delete(&self, id: i64) -> Result<()> {
        let conn = self.get_conn()?;
        let deleted = conn.execute("DELETE FROM fragments WHERE id = ?1", params![id])?;
        if deleted == 0 {
            return Err(MnemoError::FragmentNotFound { id });
        }
        Ok(())
    }

    /// Categories with their fragment counts, most populated first
    pub fn categories(&self) -> Result<Vec<(String, usize)>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            "SELECT category, COUNT(*) FROM fragments
             GROUP BY category ORDER BY COUNT(*) DESC, category",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.get_conn()?;

        let fragment_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM fragments", [], |row| row.get(0))?;

        let searchable_count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM fragments WHERE combined_embedding IS NOT NULL",
            [],
            |row| row.get(0),
        )?;

        let category_count: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT category) FROM fragments",
            [],
            |row| row.get(0),
        )?;

        let mut stmt = conn.prepare(
            "SELECT DISTINCT dimension FROM fragments WHERE dimension IS NOT NULL ORDER BY dimension",
        )?;
        let dimensions = stmt
            .query_map([], |row| row.get::<_, i64>(0))?
            .map(|d| d.map(|d| d as usize))
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(StoreStats {
            fragment_count: fragment_count as usize,
            searchable_count: searchable_count as usize,
            category_count: category_count as usize,
            dimensions,
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct StoreStats {
    pub fragment_count: usize,
    /// Fragments with a combined embedding
    pub searchable_count: usize,
    pub category_count: usize,
    /// Distinct embedding dimensions present; more than one means mixed models
    pub dimensions: Vec<usize>,
}

/// Database migrations (each string is one migration)
const MIGRATIONS: &[&str] = &[
    // Migration 1: Initial schema
    r#"
    CREATE TABLE fragments (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category TEXT NOT NULL,
        content TEXT NOT NULL,
        dimension INTEGER,
        combined_embedding BLOB,
        category_embedding BLOB,
        content_embedding BLOB,
        created_at INTEGER NOT NULL
    );

    CREATE INDEX idx_fragments_category ON fragments(category);
    "#,
    // Migration 2: case-insensitive category filtering
    r#"
    CREATE INDEX idx_fragments_category_lower ON fragments(lower(category));
    "#,
];
