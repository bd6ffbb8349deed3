//! Shared application state handed to every handler and resolver.

use crate::{
    config::AppConfig,
    errors::AppError,
    models::user::User,
    services::{
        auth_service::AuthService,
        cache::TokenCache,
        jobs::JobRunner,
        mailer::Mailer,
        storage::{DiskStore, FileStore, MongoStore},
        task_queue::TaskQueue,
        upload_service::UploadLimits,
    },
};
use axum::http::StatusCode;
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub db: Arc<SqlitePool>,
    pub auth: AuthService,
    pub tasks: TaskQueue,
    pub disk: Arc<DiskStore>,
    /// GridFS backend; `None` when no MongoDB URL is configured.
    pub mongo: Option<Arc<MongoStore>>,
}

impl AppState {
    /// Wire services together and start the task workers.
    pub fn new(
        config: AppConfig,
        db: SqlitePool,
        mongo: Option<MongoStore>,
    ) -> (Self, Vec<JoinHandle<()>>) {
        let db = Arc::new(db);
        let disk = Arc::new(DiskStore::new(db.clone(), config.storage_dir.clone()));
        let mongo = mongo.map(Arc::new);

        let runner = JobRunner::new(Mailer::new(db.clone()), disk.clone(), mongo.clone());
        let (tasks, workers) = TaskQueue::start(db.clone(), config.task_workers, Arc::new(runner));

        let cache = TokenCache::new(Duration::from_secs(config.cache_ttl_secs));
        let auth = AuthService::new(db.clone(), cache, tasks.clone());

        let state = Self {
            config: Arc::new(config),
            db,
            auth,
            tasks,
            disk,
            mongo,
        };
        (state, workers)
    }

    pub fn upload_limits(&self) -> UploadLimits {
        UploadLimits {
            max_duration: self.config.max_upload_duration(),
            poll_interval: self.config.upload_poll_interval(),
        }
    }

    /// Delete the account along with its files in every configured store.
    pub async fn delete_account(&self, user: &User) -> Result<(), AppError> {
        let mut deleted = self.disk.delete_owned_by(user.id).await?;
        if let Some(mongo) = &self.mongo {
            deleted += mongo.delete_owned_by(user.id).await?;
        }
        self.auth.delete_user(user).await?;
        info!(user_id = user.id, files_deleted = deleted, "account removed");
        Ok(())
    }
}

/// Picks a file store out of the application state.
pub trait SelectStore: FileStore + Sized {
    fn select(state: &AppState) -> Result<Arc<Self>, AppError>;
}

impl SelectStore for DiskStore {
    fn select(state: &AppState) -> Result<Arc<Self>, AppError> {
        Ok(state.disk.clone())
    }
}

impl SelectStore for MongoStore {
    fn select(state: &AppState) -> Result<Arc<Self>, AppError> {
        state.mongo.clone().ok_or_else(|| {
            AppError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "Mongo storage is not configured",
            )
        })
    }
}
