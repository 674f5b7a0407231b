use super::LockStore;
use async_trait::async_trait;
use eventpull_error::StoreError;
use eventpull_redis::RedisClient;
use std::time::Duration;

/// `SET key value NX PX ttl` / `DEL key` over Redis
#[derive(Clone)]
pub struct RedisLockStore {
    client: RedisClient,
}

impl RedisLockStore {
    pub fn new(client: RedisClient) -> Self {
        Self { client }
    }

    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = RedisClient::connect(url).await?;
        Ok(Self::new(client))
    }
}

#[async_trait]
impl LockStore for RedisLockStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        Ok(self.client.set_nx_px(key, value, ttl).await?)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.client.del(key).await?;
        Ok(())
    }
}
