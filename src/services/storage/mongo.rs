//! MongoStore: files kept in a GridFS bucket; the owner and content type
//! ride along in the GridFS `metadata` document.

use super::{
    Backend, FileBody, FileStore, NewUpload, StorageError, StorageResult, sanitize_file_name,
};
use crate::models::upload_file::StoredFile;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{AsyncWriteExt, StreamExt, TryStreamExt};
use mongodb::{
    Client, Database,
    bson::{Bson, doc, oid::ObjectId},
    gridfs::{FilesCollectionDocument, GridFsBucket},
    options::GridFsBucketOptions,
};
use serde::{Serialize, Serializer};
use std::fmt;
use tokio_util::{compat::FuturesAsyncReadCompatExt, io::ReaderStream};
use tracing::{debug, warn};

const BUCKET_NAME: &str = "upload_file_mongo";

/// GridFS file id. Displayed and serialized as 24-character hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GridFsId(pub ObjectId);

impl fmt::Display for GridFsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.to_hex())
    }
}

impl Serialize for GridFsId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_hex())
    }
}

#[derive(Clone)]
pub struct MongoStore {
    database: Database,
    bucket: GridFsBucket,
}

impl MongoStore {
    /// Connect and verify the server answers before accepting uploads.
    pub async fn connect(url: &str, database: &str) -> StorageResult<Self> {
        let client = Client::with_uri_str(url).await?;
        let store = Self::new(&client.database(database));
        store.ping().await?;
        Ok(store)
    }

    pub fn new(db: &Database) -> Self {
        let mut options = GridFsBucketOptions::default();
        options.bucket_name = Some(BUCKET_NAME.to_string());
        Self {
            database: db.clone(),
            bucket: db.gridfs_bucket(options),
        }
    }

    pub async fn ping(&self) -> StorageResult<()> {
        self.database.run_command(doc! { "ping": 1 }).await?;
        Ok(())
    }

    async fn find_document(&self, id: &ObjectId) -> StorageResult<FilesCollectionDocument> {
        let mut cursor = self.bucket.find(doc! { "_id": *id }).await?;
        cursor
            .try_next()
            .await?
            .ok_or_else(|| StorageError::FileNotFound(id.to_hex()))
    }
}

fn stored_file(file: FilesCollectionDocument, id: GridFsId) -> StoredFile<GridFsId> {
    let metadata = file.metadata.unwrap_or_default();
    StoredFile {
        id,
        owner: metadata.get_i64("user").unwrap_or_default(),
        file_name: file.filename.unwrap_or_else(|| id.to_string()),
        content_type: metadata.get_str("content_type").ok().map(str::to_string),
        size_bytes: file.length as i64,
        uploaded_on: DateTime::<Utc>::from_timestamp_millis(file.upload_date.timestamp_millis())
            .unwrap_or_else(Utc::now),
    }
}

#[async_trait]
impl FileStore for MongoStore {
    type Id = GridFsId;

    const BACKEND: Backend = Backend::Mongo;

    fn parse_id(&self, raw: &str) -> StorageResult<GridFsId> {
        ObjectId::parse_str(raw.trim())
            .map(GridFsId)
            .map_err(|_| {
                StorageError::InvalidFileId(
                    "File_id must be a 12-byte input or a 24-character hex string.",
                )
            })
    }

    /// GridFS writes the files document only when the upload stream is
    /// closed; the cleanup guard removes any chunks left by a dropped save.
    async fn save(&self, upload: NewUpload) -> StorageResult<GridFsId> {
        let file_name = sanitize_file_name(&upload.file_name)?;
        let id = ObjectId::new();

        let mut metadata = doc! { "user": upload.owner };
        if let Some(content_type) = &upload.content_type {
            metadata.insert("content_type", content_type.clone());
        }

        let mut guard = GridFsCleanup::new(self.bucket.clone(), id);
        let mut stream = self
            .bucket
            .open_upload_stream(&file_name)
            .id(Bson::ObjectId(id))
            .metadata(metadata)
            .await?;
        stream.write_all(&upload.data).await?;
        stream.close().await?;
        guard.disarm();

        debug!(file_id = %id, owner = upload.owner, "stored payload in GridFS");
        Ok(GridFsId(id))
    }

    async fn find(&self, id: &GridFsId) -> StorageResult<StoredFile<GridFsId>> {
        let file = self.find_document(&id.0).await?;
        Ok(stored_file(file, *id))
    }

    async fn open(&self, id: &GridFsId) -> StorageResult<FileBody> {
        self.find_document(&id.0).await?;
        let stream = self
            .bucket
            .open_download_stream(Bson::ObjectId(id.0))
            .await?;
        Ok(ReaderStream::new(stream.compat()).boxed())
    }

    async fn delete(&self, id: &GridFsId) -> StorageResult<u64> {
        self.find_document(&id.0).await?;
        self.bucket.delete(Bson::ObjectId(id.0)).await?;
        Ok(1)
    }

    async fn delete_owned_by(&self, owner: i64) -> StorageResult<u64> {
        let files: Vec<FilesCollectionDocument> = self
            .bucket
            .find(doc! { "metadata.user": owner })
            .await?
            .try_collect()
            .await?;

        let mut deleted = 0;
        for file in files {
            self.bucket.delete(file.id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }
}

/// Deletes a partially written GridFS file when dropped while armed.
struct GridFsCleanup {
    bucket: GridFsBucket,
    id: ObjectId,
    armed: bool,
}

impl GridFsCleanup {
    fn new(bucket: GridFsBucket, id: ObjectId) -> Self {
        Self {
            bucket,
            id,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for GridFsCleanup {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(file_id = %self.id, "no runtime to discard unfinished GridFS upload");
            return;
        };
        let bucket = self.bucket.clone();
        let id = self.id;
        runtime.spawn(async move {
            // chunks are removed even when no files document was written
            if let Err(err) = bucket.delete(Bson::ObjectId(id)).await {
                debug!(file_id = %id, "discarding unfinished GridFS upload: {}", err);
            }
        });
    }
}
