//! Token → user cache backed by moka.
//!
//! Every key carries the application prefix so that invalidation can clear
//! this application's entries without touching anyone else's.

use crate::models::user::User;
use moka::future::Cache;
use std::time::Duration;
use tracing::debug;

/// Prefix applied to all cache keys.
const PREFIX: &str = "uploader";

fn token_key(token: &str) -> String {
    format!("{PREFIX}:user:token:{token}")
}

#[derive(Clone)]
pub struct TokenCache {
    cache: Cache<String, User>,
}

impl TokenCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ttl)
                .build(),
        }
    }

    pub async fn get(&self, token: &str) -> Option<User> {
        self.cache.get(&token_key(token)).await
    }

    pub async fn insert(&self, token: &str, user: User) {
        self.cache.insert(token_key(token), user).await;
    }

    /// Remove every key under the application prefix. Returns true when
    /// nothing with the prefix is left.
    pub async fn clear(&self) -> bool {
        let prefix = format!("{PREFIX}:");
        let keys: Vec<String> = self
            .cache
            .iter()
            .filter(|entry| entry.0.starts_with(&prefix))
            .map(|entry| entry.0.to_string())
            .collect();

        let count = keys.len();
        for key in keys {
            self.cache.remove(&key).await;
        }
        debug!(count, "cleared cached users");

        !self.cache.iter().any(|entry| entry.0.starts_with(&prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn user(id: i64) -> User {
        User {
            id,
            email: format!("u{}@example.com", id),
            first_name: String::new(),
            last_name: String::new(),
            password_hash: String::new(),
            is_active: true,
            date_joined: Utc::now(),
        }
    }

    #[tokio::test]
    async fn clear_drops_all_cached_users() {
        let cache = TokenCache::new(Duration::from_secs(60));
        cache.insert("a", user(1)).await;
        cache.insert("b", user(2)).await;
        assert_eq!(cache.get("a").await.map(|u| u.id), Some(1));

        assert!(cache.clear().await);
        assert!(cache.get("a").await.is_none());
        assert!(cache.get("b").await.is_none());
    }
}
