use std::time::Duration;

use async_trait::async_trait;

use microsight_shared::clients::redis::RedisClient;

use super::{StateStore, StoreError};

const KEY_PREFIX: &str = "oauth:state:";

impl From<redis::RedisError> for StoreError {
    fn from(err: redis::RedisError) -> Self {
        StoreError::Backend(format!("redis: {err}"))
    }
}

/// OAuth state in Redis. Consumption is a single `DEL`; only the caller
/// whose command removed the key wins.
#[derive(Clone)]
pub struct RedisStateStore {
    client: RedisClient,
    timeout: Duration,
}

impl RedisStateStore {
    pub fn new(client: RedisClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    fn key(state: &str) -> String {
        format!("{KEY_PREFIX}{state}")
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn put(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let secs = ttl.as_secs().max(1);
        tokio::time::timeout(self.timeout, self.client.set(&Self::key(key), "1", secs))
            .await
            .map_err(|_| StoreError::Timeout("oauth state put"))??;
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<bool, StoreError> {
        let removed = tokio::time::timeout(self.timeout, self.client.del(&Self::key(key)))
            .await
            .map_err(|_| StoreError::Timeout("oauth state take"))??;
        Ok(removed)
    }
}
