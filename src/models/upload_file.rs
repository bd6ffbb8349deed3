//! A file uploaded by a user, as stored by either backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Metadata row of a file held by the disk backend.
///
/// The payload itself lives under the storage directory at `path`.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
pub struct UploadFile {
    pub id: i64,

    /// Owning user id.
    pub user_id: i64,

    /// Original filename as sent by the client.
    pub file_name: String,

    pub content_type: Option<String>,

    pub size_bytes: i64,

    /// MD5 of the payload, lowercase hex.
    pub etag: String,

    /// Payload path relative to the storage directory.
    pub path: String,

    pub uploaded_on: DateTime<Utc>,
}

/// Backend-neutral description of a stored file.
#[derive(Serialize, Clone, Debug)]
pub struct StoredFile<Id> {
    pub id: Id,
    pub owner: i64,
    pub file_name: String,
    pub content_type: Option<String>,
    pub size_bytes: i64,
    pub uploaded_on: DateTime<Utc>,
}

impl From<UploadFile> for StoredFile<i64> {
    fn from(row: UploadFile) -> Self {
        Self {
            id: row.id,
            owner: row.user_id,
            file_name: row.file_name,
            content_type: row.content_type,
            size_bytes: row.size_bytes,
            uploaded_on: row.uploaded_on,
        }
    }
}
