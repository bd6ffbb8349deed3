//! DiskStore: metadata in SQLite, payloads on local disk sharded beneath
//! `base_path/{shard}/{shard}/{id}-{file_name}`.

use super::{
    Backend, FileBody, FileStore, NewUpload, StorageError, StorageResult, sanitize_file_name,
};
use crate::models::upload_file::{StoredFile, UploadFile};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use sqlx::SqlitePool;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const SELECT_UPLOAD_FILE: &str = "SELECT id, user_id, file_name, content_type, size_bytes, etag, \
     path, uploaded_on FROM upload_files";

#[derive(Clone)]
pub struct DiskStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where payloads are stored.
    pub base_path: PathBuf,
}

impl DiskStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Two-level shard directories for a file: the first two bytes of
    /// MD5(owner/id) as lowercase hex.
    fn shards(owner: i64, id: i64) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", owner, id));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn relative_path(owner: i64, id: i64, file_name: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(owner, id);
        let mut path = PathBuf::from(shard_a);
        path.push(shard_b);
        path.push(format!("{}-{}", id, file_name));
        path
    }

    /// Fetch a metadata row by id.
    pub async fn fetch_row(&self, id: i64) -> StorageResult<UploadFile> {
        sqlx::query_as::<_, UploadFile>(&format!("{} WHERE id = ?", SELECT_UPLOAD_FILE))
            .bind(id)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StorageError::FileNotFound(id.to_string()),
                other => StorageError::Sqlx(other),
            })
    }

    /// Absolute payload path of a stored row.
    pub fn payload_path(&self, row: &UploadFile) -> PathBuf {
        self.base_path.join(&row.path)
    }

    /// Write the payload to a temp file next to its final location.
    async fn write_temp(&self, dir: &Path, data: &[u8]) -> StorageResult<PayloadGuard> {
        fs::create_dir_all(dir).await?;
        let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
        let guard = PayloadGuard::new(tmp_path.clone());

        let mut file = File::create(&tmp_path).await?;
        file.write_all(data).await?;
        file.flush().await?;
        file.sync_all().await?;

        Ok(guard)
    }

    async fn remove_payload(&self, row: &UploadFile) -> StorageResult<()> {
        let file_path = self.payload_path(row);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed payload {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("payload {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent, &self.base_path).await;
        }
        Ok(())
    }

    /// Remove empty shard directories up to the storage root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => {
                    if let Some(parent) = current.parent() {
                        current = parent.to_path_buf();
                    } else {
                        break;
                    }
                }
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl FileStore for DiskStore {
    type Id = i64;

    const BACKEND: Backend = Backend::Db;

    fn parse_id(&self, raw: &str) -> StorageResult<i64> {
        raw.trim()
            .parse::<i64>()
            .map_err(|_| StorageError::InvalidFileId("File_id must be an integer."))
    }

    /// The payload is written to a temp file first; the row is inserted and
    /// the file renamed into place inside one transaction. If the future is
    /// dropped midway the transaction rolls back and the guard removes the
    /// payload.
    async fn save(&self, upload: NewUpload) -> StorageResult<i64> {
        let file_name = sanitize_file_name(&upload.file_name)?;
        let staging_dir = self.base_path.join(".staging");
        let mut guard = self.write_temp(&staging_dir, &upload.data).await?;

        let etag = format!("{:x}", md5::compute(&upload.data));
        let size_bytes = upload.data.len() as i64;

        let mut tx = self.db.begin().await?;
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO upload_files (
                user_id, file_name, content_type, size_bytes, etag, path, uploaded_on
            ) VALUES (?, ?, ?, ?, ?, '', ?)
            RETURNING id
            "#,
        )
        .bind(upload.owner)
        .bind(&file_name)
        .bind(upload.content_type.as_deref())
        .bind(size_bytes)
        .bind(&etag)
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await?;

        let relative = Self::relative_path(upload.owner, id, &file_name);
        let file_path = self.base_path.join(&relative);
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::rename(guard.path(), &file_path).await?;
        guard.retarget(file_path);

        sqlx::query("UPDATE upload_files SET path = ? WHERE id = ?")
            .bind(relative.to_string_lossy().into_owned())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        guard.disarm();

        debug!(file_id = id, owner = upload.owner, size_bytes, "stored payload on disk");
        Ok(id)
    }

    async fn find(&self, id: &i64) -> StorageResult<StoredFile<i64>> {
        Ok(self.fetch_row(*id).await?.into())
    }

    async fn open(&self, id: &i64) -> StorageResult<FileBody> {
        let row = self.fetch_row(*id).await?;
        let file = File::open(self.payload_path(&row))
            .await
            .map_err(|err| {
                if err.kind() == io::ErrorKind::NotFound {
                    StorageError::FileNotFound(id.to_string())
                } else {
                    StorageError::Io(err)
                }
            })?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn delete(&self, id: &i64) -> StorageResult<u64> {
        let row = self.fetch_row(*id).await?;
        let result = sqlx::query("DELETE FROM upload_files WHERE id = ?")
            .bind(row.id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StorageError::FileNotFound(id.to_string()));
        }
        self.remove_payload(&row).await?;
        Ok(result.rows_affected())
    }

    async fn delete_owned_by(&self, owner: i64) -> StorageResult<u64> {
        let rows =
            sqlx::query_as::<_, UploadFile>(&format!("{} WHERE user_id = ?", SELECT_UPLOAD_FILE))
                .bind(owner)
                .fetch_all(&*self.db)
                .await?;

        let result = sqlx::query("DELETE FROM upload_files WHERE user_id = ?")
            .bind(owner)
            .execute(&*self.db)
            .await?;

        for row in &rows {
            self.remove_payload(row).await?;
        }
        Ok(result.rows_affected())
    }
}

/// Removes a payload file on drop unless disarmed.
struct PayloadGuard {
    path: PathBuf,
    armed: bool,
}

impl PayloadGuard {
    fn new(path: PathBuf) -> Self {
        Self { path, armed: true }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn retarget(&mut self, path: PathBuf) {
        self.path = path;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for PayloadGuard {
    fn drop(&mut self) {
        if self.armed {
            match std::fs::remove_file(&self.path) {
                Ok(_) => debug!("discarded unfinished payload {}", self.path.display()),
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => debug!("could not discard {}: {}", self.path.display(), err),
            }
        }
    }
}
