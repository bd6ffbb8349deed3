//! Outgoing email. Messages are written to the `email_outbox` table, from
//! which a relay (or an operator reading the logs) delivers them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{FromRow, SqlitePool};
use std::sync::Arc;
use tracing::info;

#[derive(Serialize, Clone, FromRow, Debug)]
pub struct OutboxEmail {
    pub id: i64,
    pub task_id: Option<String>,
    pub recipient: String,
    pub subject: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct Mailer {
    db: Arc<SqlitePool>,
}

impl Mailer {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub async fn send(
        &self,
        task_id: Option<&str>,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<i64, sqlx::Error> {
        let id: i64 = sqlx::query_scalar(
            "INSERT INTO email_outbox (task_id, recipient, subject, body, sent_at)
             VALUES (?, ?, ?, ?, ?) RETURNING id",
        )
        .bind(task_id)
        .bind(recipient)
        .bind(subject)
        .bind(body)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        info!(outbox_id = id, recipient, subject, "email queued for delivery");
        Ok(id)
    }

    /// Messages sent to `recipient`, oldest first.
    pub async fn sent_to(&self, recipient: &str) -> Result<Vec<OutboxEmail>, sqlx::Error> {
        sqlx::query_as::<_, OutboxEmail>(
            "SELECT id, task_id, recipient, subject, body, sent_at
             FROM email_outbox WHERE recipient = ? ORDER BY id",
        )
        .bind(recipient)
        .fetch_all(&*self.db)
        .await
    }
}
