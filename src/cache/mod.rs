pub mod keys;

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::AppError;

/// Component C: the snapshot cache (spec 4.4). A thin, cheaply-cloneable
/// wrapper over a Redis `ConnectionManager` (auto-reconnecting, safe to
/// clone per request/task). Values are JSON-encoded strings; TTLs are
/// supplied by the caller (the refresh loop), never hardcoded here.
#[derive(Clone)]
pub struct SnapshotCache {
    conn: ConnectionManager,
}

impl SnapshotCache {
    pub async fn connect(redis_url: &str) -> Result<Self, AppError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| AppError::Fatal(format!("invalid Redis URL: {e}")))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| AppError::Fatal(format!("cannot connect to Redis: {e}")))?;
        Ok(Self { conn })
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, AppError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn
            .get(key)
            .await
            .map_err(|_| AppError::TransientCacheError)?;
        match raw {
            Some(s) => serde_json::from_str(&s)
                .map(Some)
                .map_err(|_| AppError::TransientCacheError),
            None => Ok(None),
        }
    }

    pub async fn set<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(value).map_err(|_| AppError::TransientCacheError)?;
        let _: () = conn
            .set_ex(key, raw, ttl.as_secs().max(1))
            .await
            .map_err(|_| AppError::TransientCacheError)?;
        Ok(())
    }

    /// The monotonic marker has no TTL — it is effectively infinite relative
    /// to the refresh cadence (spec 6).
    pub async fn set_persistent<T: Serialize>(&self, key: &str, value: &T) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(value).map_err(|_| AppError::TransientCacheError)?;
        let _: () = conn
            .set(key, raw)
            .await
            .map_err(|_| AppError::TransientCacheError)?;
        Ok(())
    }

    pub async fn publish<T: Serialize>(&self, channel: &str, message: &T) -> Result<(), AppError> {
        let mut conn = self.conn.clone();
        let raw = serde_json::to_string(message).map_err(|_| AppError::TransientCacheError)?;
        let _: () = conn
            .publish(channel, raw)
            .await
            .map_err(|_| AppError::TransientCacheError)?;
        Ok(())
    }
}
