//! File upload and processing service: token-authenticated accounts, a disk
//! and a GridFS file store, supervised uploads and a background task queue,
//! exposed over REST and GraphQL.

pub mod config;
pub mod db;
pub mod errors;
pub mod graphql;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
pub mod state;

use anyhow::{Context, Result};
use config::AppConfig;
use services::storage::MongoStore;
use state::AppState;
use std::path::Path;
use tokio::task::JoinHandle;

/// Open the stores described by `config`, migrate the database, start the
/// task workers and settle tasks left over from a previous run.
pub async fn bootstrap(config: AppConfig) -> Result<(AppState, Vec<JoinHandle<()>>)> {
    if !Path::new(&config.storage_dir).exists() {
        tokio::fs::create_dir_all(&config.storage_dir)
            .await
            .with_context(|| format!("creating storage directory {}", config.storage_dir))?;
        tracing::info!("Created storage directory at {}", config.storage_dir);
    }

    let pool = db::connect(&config.database_url, 5)
        .await
        .with_context(|| format!("connecting to {}", config.database_url))?;
    db::run_migrations(&pool).await?;

    let mongo = match &config.mongo_url {
        Some(url) => {
            let store = MongoStore::connect(url, &config.mongo_database)
                .await
                .context("connecting to MongoDB")?;
            tracing::info!("GridFS storage enabled (database {})", config.mongo_database);
            Some(store)
        }
        None => {
            tracing::info!("No MongoDB URL configured; GridFS storage disabled");
            None
        }
    };

    let (state, workers) = AppState::new(config, pool, mongo);
    state.tasks.recover().await?;
    Ok((state, workers))
}
