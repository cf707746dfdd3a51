use async_trait::async_trait;
use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, Transaction};

use crate::db::Database;
use crate::models::{FileTypePolicy, NewStoredFile, StoredFile};
use crate::store::{ClaimTransaction, MetadataStore, StoreError, StoreErrorKind, StoreResult};

/// SQLite-backed metadata store
#[derive(Clone)]
pub struct SqliteMetadataStore {
    db: Database,
}

impl SqliteMetadataStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    async fn get_file_type(&self, type_id: &str) -> StoreResult<FileTypePolicy> {
        sqlx::query_as("SELECT * FROM file_types WHERE id = ?")
            .bind(type_id)
            .fetch_optional(self.db.pool())
            .await?
            .ok_or_else(|| {
                StoreError::new(StoreErrorKind::NotFound, format!("File type {} not found", type_id))
            })
    }
}

async fn load_tags(conn: &mut SqliteConnection, file_id: &str) -> StoreResult<Vec<String>> {
    let tags: Vec<String> =
        sqlx::query_scalar("SELECT tag FROM file_tags WHERE file_id = ? ORDER BY tag")
            .bind(file_id)
            .fetch_all(conn)
            .await?;
    Ok(tags)
}

#[async_trait]
impl MetadataStore for SqliteMetadataStore {
    async fn register_file_type(
        &self,
        type_id: &str,
        default_allowed_size: i64,
    ) -> StoreResult<FileTypePolicy> {
        let now = Utc::now().to_rfc3339();
        let inserted = sqlx::query(
            r#"
            INSERT OR IGNORE INTO file_types (id, allowed_size, is_banned, created_at, updated_at)
            VALUES (?, ?, 0, ?, ?)
            "#,
        )
        .bind(type_id)
        .bind(default_allowed_size)
        .bind(&now)
        .bind(&now)
        .execute(self.db.pool())
        .await?;

        if inserted.rows_affected() > 0 {
            tracing::info!(file_type = %type_id, allowed_size = default_allowed_size, "Registered new file type");
        }

        self.get_file_type(type_id).await
    }

    async fn list_file_types(&self) -> StoreResult<Vec<FileTypePolicy>> {
        let types = sqlx::query_as("SELECT * FROM file_types ORDER BY id ASC")
            .fetch_all(self.db.pool())
            .await?;
        Ok(types)
    }

    async fn update_file_type(
        &self,
        type_id: &str,
        allowed_size: Option<i64>,
        is_banned: Option<bool>,
    ) -> StoreResult<FileTypePolicy> {
        let current = self.get_file_type(type_id).await?;
        let now = Utc::now().to_rfc3339();

        sqlx::query("UPDATE file_types SET allowed_size = ?, is_banned = ?, updated_at = ? WHERE id = ?")
            .bind(allowed_size.unwrap_or(current.allowed_size))
            .bind(is_banned.unwrap_or(current.is_banned))
            .bind(&now)
            .bind(type_id)
            .execute(self.db.pool())
            .await?;

        self.get_file_type(type_id).await
    }

    async fn aggregate_size(&self) -> StoreResult<i64> {
        let total: i64 = sqlx::query_scalar("SELECT COALESCE(SUM(size), 0) FROM files")
            .fetch_one(self.db.pool())
            .await?;
        Ok(total)
    }

    async fn insert_file(&self, file: &NewStoredFile) -> StoreResult<StoredFile> {
        let mut tx = self.db.pool().begin().await?;

        for tag in &file.tags {
            sqlx::query("INSERT OR IGNORE INTO tags (name, created_at) VALUES (?, ?)")
                .bind(tag)
                .bind(&file.created_at)
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(
            r#"
            INSERT INTO files (id, name, owner_id, file_type, size, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&file.id)
        .bind(&file.name)
        .bind(file.owner_id)
        .bind(&file.file_type)
        .bind(file.size)
        .bind(&file.created_at)
        .execute(&mut *tx)
        .await?;

        for tag in &file.tags {
            sqlx::query("INSERT OR IGNORE INTO file_tags (file_id, tag) VALUES (?, ?)")
                .bind(&file.id)
                .bind(tag)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(file.clone().into_stored())
    }

    async fn list_files(&self) -> StoreResult<Vec<StoredFile>> {
        let mut conn = self.db.pool().acquire().await?;
        let mut files: Vec<StoredFile> =
            sqlx::query_as("SELECT * FROM files ORDER BY created_at ASC, id ASC")
                .fetch_all(&mut *conn)
                .await?;
        for file in &mut files {
            file.tags = load_tags(&mut conn, &file.id).await?;
        }
        Ok(files)
    }

    async fn begin_claim(&self) -> StoreResult<Box<dyn ClaimTransaction>> {
        // SQLite transactions are serializable: a writer whose snapshot went stale
        // gets SQLITE_BUSY(_SNAPSHOT), which surfaces as a serialization conflict.
        let tx = self.db.pool().begin().await?;
        Ok(Box::new(SqliteClaimTransaction { tx: Some(tx) }))
    }
}

pub struct SqliteClaimTransaction {
    tx: Option<Transaction<'static, Sqlite>>,
}

impl SqliteClaimTransaction {
    fn tx(&mut self) -> StoreResult<&mut Transaction<'static, Sqlite>> {
        self.tx
            .as_mut()
            .ok_or_else(|| StoreError::new(StoreErrorKind::Other, "claim transaction already finished"))
    }
}

#[async_trait]
impl ClaimTransaction for SqliteClaimTransaction {
    async fn take_one(
        &mut self,
        names: &[String],
        tags: &[String],
    ) -> StoreResult<Option<StoredFile>> {
        let tx = self.tx()?;

        let mut query: QueryBuilder<Sqlite> = QueryBuilder::new("SELECT f.* FROM files f WHERE 1 = 1");
        if !tags.is_empty() {
            query.push(" AND EXISTS (SELECT 1 FROM file_tags ft WHERE ft.file_id = f.id AND ft.tag IN (");
            let mut separated = query.separated(", ");
            for tag in tags {
                separated.push_bind(tag.clone());
            }
            separated.push_unseparated("))");
        }
        if !names.is_empty() {
            query.push(" AND f.name IN (");
            let mut separated = query.separated(", ");
            for name in names {
                separated.push_bind(name.clone());
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY f.created_at ASC, f.id ASC LIMIT 1");

        let mut candidate: Option<StoredFile> = query
            .build_query_as()
            .fetch_optional(&mut **tx)
            .await?;

        if candidate.is_none() {
            candidate = sqlx::query_as("SELECT * FROM files ORDER BY created_at ASC, id ASC LIMIT 1")
                .fetch_optional(&mut **tx)
                .await?;
        }

        let Some(mut file) = candidate else {
            return Ok(None);
        };

        file.tags = load_tags(&mut **tx, &file.id).await?;

        sqlx::query("DELETE FROM file_tags WHERE file_id = ?")
            .bind(&file.id)
            .execute(&mut **tx)
            .await?;
        let deleted = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(&file.id)
            .execute(&mut **tx)
            .await?;

        if deleted.rows_affected() == 0 {
            return Err(StoreError::conflict(format!(
                "file {} was removed by a concurrent claim",
                file.id
            )));
        }

        Ok(Some(file))
    }

    async fn commit(&mut self) -> StoreResult<()> {
        let tx = self
            .tx
            .take()
            .ok_or_else(|| StoreError::new(StoreErrorKind::Other, "claim transaction already finished"))?;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&mut self) -> StoreResult<()> {
        if let Some(tx) = self.tx.take() {
            tx.rollback().await?;
        }
        Ok(())
    }
}
