//! Supervised uploads.
//!
//! An asynchronous upload runs as its own task. The supervisor wakes on a
//! fixed interval and, once the deadline passes, aborts the task. Aborting
//! drops the save future, which rolls back whatever the store had started.

use crate::services::storage::{FileStore, NewUpload, StorageError};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    task::JoinError,
    time::{self, Instant, MissedTickBehavior},
};
use tracing::{debug, info, warn};

/// Error string reported to clients when an upload exceeds its deadline.
pub const UPLOAD_TIMED_OUT: &str = "UPLOAD_TIMED_OUT";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("upload task failed: {0}")]
    Join(#[from] JoinError),
}

#[derive(Clone, Copy, Debug)]
pub struct UploadLimits {
    /// Total time an upload may take before it is cancelled.
    pub max_duration: Duration,
    /// How often the supervisor checks the deadline.
    pub poll_interval: Duration,
}

#[derive(Debug, PartialEq, Eq)]
pub enum UploadOutcome<Id> {
    Saved(Id),
    TimedOut,
}

/// Save inline, without a deadline (`sync_mode`).
pub async fn save_now<S: FileStore>(
    store: &S,
    upload: NewUpload,
) -> Result<S::Id, UploadError> {
    Ok(store.save(upload).await?)
}

/// Run `store.save(upload)` as a separate task bounded by `limits`.
///
/// Completion is reported as soon as the task finishes; the interval only
/// paces the deadline checks. A store error is returned as an error, never
/// as a timeout.
pub async fn bounded_save<S: FileStore>(
    store: Arc<S>,
    upload: NewUpload,
    limits: UploadLimits,
) -> Result<UploadOutcome<S::Id>, UploadError> {
    let owner = upload.owner;
    let size = upload.data.len();
    let started = Instant::now();
    let deadline = started + limits.max_duration;

    let mut handle = tokio::spawn(async move { store.save(upload).await });

    let mut ticker = time::interval(limits.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            joined = &mut handle => {
                let id = joined??;
                info!(
                    backend = %S::BACKEND,
                    owner,
                    size,
                    file_id = %id,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "upload saved"
                );
                return Ok(UploadOutcome::Saved(id));
            }
            _ = ticker.tick() => {
                if Instant::now() >= deadline {
                    handle.abort();
                    // wait for the abort so the store's drop guards have run
                    if let Err(err) = (&mut handle).await {
                        if !err.is_cancelled() {
                            return Err(UploadError::Join(err));
                        }
                    }
                    warn!(
                        backend = %S::BACKEND,
                        owner,
                        size,
                        limit_secs = limits.max_duration.as_secs(),
                        "upload timed out and was cancelled"
                    );
                    return Ok(UploadOutcome::TimedOut);
                }
                debug!(
                    backend = %S::BACKEND,
                    owner,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "upload still in flight"
                );
            }
        }
    }
}
