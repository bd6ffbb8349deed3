//! File storage backends.
//!
//! Both backends implement [`FileStore`], so the upload supervisor, the
//! ownership checks and the processing job are written once and shared.

pub mod disk;
pub mod mongo;

use crate::models::upload_file::StoredFile;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::{fmt, io};
use thiserror::Error;

pub use disk::DiskStore;
pub use mongo::{GridFsId, MongoStore};

/// Streaming payload of a stored file.
pub type FileBody = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("file `{0}` not found")]
    FileNotFound(String),
    /// A `file_id` that cannot name a file in this backend.
    #[error("{0}")]
    InvalidFileId(&'static str),
    #[error("invalid file name")]
    InvalidFileName,
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Which backend a file lives in. Carried by processing jobs.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Db,
    Mongo,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::Db => f.write_str("db"),
            Backend::Mongo => f.write_str("mongo"),
        }
    }
}

/// An upload waiting to be written.
#[derive(Clone, Debug)]
pub struct NewUpload {
    pub owner: i64,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[async_trait]
pub trait FileStore: Send + Sync + 'static {
    /// Identifier of a stored file, serialized as-is into responses.
    type Id: Clone + fmt::Display + fmt::Debug + Serialize + Send + Sync + 'static;

    const BACKEND: Backend;

    /// Parse a client-supplied id.
    fn parse_id(&self, raw: &str) -> StorageResult<Self::Id>;

    /// Persist the payload and its metadata, returning the new id.
    ///
    /// Dropping the returned future before it resolves must leave nothing
    /// behind in the store.
    async fn save(&self, upload: NewUpload) -> StorageResult<Self::Id>;

    async fn find(&self, id: &Self::Id) -> StorageResult<StoredFile<Self::Id>>;

    /// Open the payload for streaming.
    async fn open(&self, id: &Self::Id) -> StorageResult<FileBody>;

    /// Delete a file, returning how many records were removed.
    async fn delete(&self, id: &Self::Id) -> StorageResult<u64>;

    /// Delete every file owned by `owner`.
    async fn delete_owned_by(&self, owner: i64) -> StorageResult<u64>;
}

/// Reduce a client filename to its last path component.
pub(crate) fn sanitize_file_name(raw: &str) -> StorageResult<String> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim()
        .to_string();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.bytes().any(|b| b.is_ascii_control())
    {
        return Err(StorageError::InvalidFileName);
    }
    Ok(name)
}
