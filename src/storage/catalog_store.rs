//! SQLite Catalog Store
//!
//! Persists root evidence items and the files derived from them by
//! extraction. Reconciliation looks items up by parent path and writes
//! through caller-owned transactions.
//!
//! ## Database Schema
//!
//! - `content_items`: one row per root item or derived file; `parent_path`
//!   always ends with `/` and `parent_path || name` is unique

use crate::config::CatalogConfig;
use crate::error::{Result, UnpackError};
use crate::models::ContentItem;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

const ITEM_COLUMNS: &str = "id, root_id, parent_id, name, parent_path, local_path, size, \
     created, accessed, modified, is_file, is_allocated, mime_type, name_encoding";

/// SQLite catalog of content items
#[derive(Debug, Clone)]
pub struct CatalogStore {
    pool: SqlitePool,
}

impl CatalogStore {
    /// Open (or create) the catalog database at `db_path`
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - Failed to create the parent directory
    /// - Failed to connect to database
    /// - Failed to create tables
    pub async fn open(db_path: &Path, config: &CatalogConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                UnpackError::database_error(format!(
                    "Failed to create catalog directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        info!(path = %db_path.display(), "Opening catalog store");

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_millis(config.busy_timeout_ms));

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(options)
            .await
            .map_err(|e| UnpackError::database_error(format!("Failed to connect to catalog: {}", e)))?;

        Self::init_schema(&pool).await?;
        Ok(Self { pool })
    }

    async fn init_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS content_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                root_id INTEGER,
                parent_id INTEGER,
                name TEXT NOT NULL,
                parent_path TEXT NOT NULL,
                local_path TEXT NOT NULL,
                size INTEGER NOT NULL DEFAULT 0,
                created INTEGER,
                accessed INTEGER,
                modified INTEGER,
                is_file INTEGER NOT NULL DEFAULT 1,
                is_allocated INTEGER NOT NULL DEFAULT 1,
                mime_type TEXT,
                name_encoding TEXT,
                UNIQUE (parent_path, name),
                FOREIGN KEY (parent_id) REFERENCES content_items(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await
        .map_err(|e| {
            UnpackError::database_error(format!("Failed to create content_items table: {}", e))
        })?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_items_parent_id ON content_items(parent_id)")
            .execute(pool)
            .await
            .map_err(|e| UnpackError::database_error(format!("Failed to create index: {}", e)))?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_items_parent_path ON content_items(parent_path)",
        )
        .execute(pool)
        .await
        .map_err(|e| UnpackError::database_error(format!("Failed to create index: {}", e)))?;

        Ok(())
    }

    /// Register a root evidence item; its `root_id` becomes its own id
    pub async fn add_root_item(&self, item: &ContentItem) -> Result<ContentItem> {
        let mut tx = self.begin_transaction().await?;
        let id = Self::insert_item(&mut tx, item).await?;
        sqlx::query("UPDATE content_items SET root_id = ? WHERE id = ?")
            .bind(id)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(|e| UnpackError::database_error(format!("Failed to set root id: {}", e)))?;
        tx.commit()
            .await
            .map_err(|e| UnpackError::database_error(format!("Failed to commit root item: {}", e)))?;

        info!(item_id = id, name = %item.name, "Registered root item");
        Ok(ContentItem {
            id,
            root_id: id,
            parent_id: None,
            ..item.clone()
        })
    }

    pub async fn get_item(&self, id: i64) -> Result<Option<ContentItem>> {
        let row = sqlx::query(&format!("SELECT {ITEM_COLUMNS} FROM content_items WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| UnpackError::database_error(format!("Failed to fetch item: {}", e)))?;
        Ok(row.as_ref().map(row_to_item))
    }

    /// Every item whose parent path starts with `parent_path`
    ///
    /// Passing an archive's child parent path returns all of its
    /// descendants, however deep.
    pub async fn find_children_by_parent_path(&self, parent_path: &str) -> Result<Vec<ContentItem>> {
        let rows = sqlx::query(&format!(
            "SELECT {ITEM_COLUMNS} FROM content_items \
             WHERE substr(parent_path, 1, length(?)) = ? ORDER BY id"
        ))
        .bind(parent_path)
        .bind(parent_path)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| UnpackError::database_error(format!("Failed to query children: {}", e)))?;

        debug!(parent_path, count = rows.len(), "Loaded cataloged children");
        Ok(rows.iter().map(row_to_item).collect())
    }

    pub async fn has_children(&self, item_id: i64) -> Result<bool> {
        let (exists,) = sqlx::query_as::<_, (bool,)>(
            "SELECT EXISTS(SELECT 1 FROM content_items WHERE parent_id = ?)",
        )
        .bind(item_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| UnpackError::database_error(format!("Failed to check children: {}", e)))?;
        Ok(exists)
    }

    pub async fn count_items(&self) -> Result<i64> {
        let (count,) = sqlx::query_as::<_, (i64,)>("SELECT COUNT(*) FROM content_items")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| UnpackError::database_error(format!("Failed to count items: {}", e)))?;
        Ok(count)
    }

    /// Begin a transaction for a batch of derived-file writes
    pub async fn begin_transaction(&self) -> Result<Transaction<'_, Sqlite>> {
        self.pool
            .begin()
            .await
            .map_err(|e| UnpackError::database_error(format!("Failed to begin transaction: {}", e)))
    }

    /// Insert a derived file; returns the new row id
    pub async fn add_derived_file_tx(
        tx: &mut Transaction<'_, Sqlite>,
        item: &ContentItem,
    ) -> Result<i64> {
        let id = Self::insert_item(tx, item).await?;
        debug!(
            id,
            parent_id = ?item.parent_id,
            path = %item.unique_path(),
            "Added derived file"
        );
        Ok(id)
    }

    /// Overwrite the extracted attributes of an existing derived file
    pub async fn update_derived_file_tx(
        tx: &mut Transaction<'_, Sqlite>,
        item: &ContentItem,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE content_items
            SET local_path = ?, size = ?, created = ?, accessed = ?, modified = ?,
                is_file = ?, mime_type = ?, name_encoding = ?
            WHERE id = ?
            "#,
        )
        .bind(path_to_text(&item.local_path))
        .bind(item.size as i64)
        .bind(item.created)
        .bind(item.accessed)
        .bind(item.modified)
        .bind(item.is_file)
        .bind(&item.mime_type)
        .bind(&item.name_encoding)
        .bind(item.id)
        .execute(&mut **tx)
        .await
        .map_err(|e| UnpackError::database_error(format!("Failed to update derived file: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(UnpackError::database_error(format!(
                "Derived file {} does not exist",
                item.id
            )));
        }
        debug!(id = item.id, size = item.size, "Updated derived file");
        Ok(())
    }

    async fn insert_item(tx: &mut Transaction<'_, Sqlite>, item: &ContentItem) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO content_items (
                root_id, parent_id, name, parent_path, local_path, size,
                created, accessed, modified, is_file, is_allocated, mime_type, name_encoding
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(item.root_id)
        .bind(item.parent_id)
        .bind(&item.name)
        .bind(&item.parent_path)
        .bind(path_to_text(&item.local_path))
        .bind(item.size as i64)
        .bind(item.created)
        .bind(item.accessed)
        .bind(item.modified)
        .bind(item.is_file)
        .bind(item.is_allocated)
        .bind(&item.mime_type)
        .bind(&item.name_encoding)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            UnpackError::database_error(format!(
                "Failed to insert {}: {}",
                item.unique_path(),
                e
            ))
        })?;
        Ok(result.last_insert_rowid())
    }
}

fn path_to_text(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn row_to_item(row: &SqliteRow) -> ContentItem {
    let size: i64 = row.get("size");
    let local_path: String = row.get("local_path");
    ContentItem {
        id: row.get("id"),
        root_id: row.get::<Option<i64>, _>("root_id").unwrap_or_default(),
        parent_id: row.get("parent_id"),
        name: row.get("name"),
        parent_path: row.get("parent_path"),
        local_path: PathBuf::from(local_path),
        size: size.max(0) as u64,
        created: row.get("created"),
        accessed: row.get("accessed"),
        modified: row.get("modified"),
        is_file: row.get("is_file"),
        is_allocated: row.get("is_allocated"),
        mime_type: row.get("mime_type"),
        name_encoding: row.get("name_encoding"),
    }
}
