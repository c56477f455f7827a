//! Production [`Store`] over Redis, with reconnect-with-backoff hidden
//! behind the trait (§4.1: "connection concerns are a responsibility of the
//! adapter and not visible to callers").

use std::time::Duration;

use async_trait::async_trait;
use idg_core::StoreError;
use rand::Rng;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::batch::{Batch, BatchOp};
use crate::Store;

/// Redis-backed store. Wraps a [`ConnectionManager`], which already retries
/// individual commands across transient disconnects; this adapter adds the
/// initial-connect backoff loop and batch atomicity via pipelining.
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect with exponential backoff and jitter, escalating from `warn`
    /// to `error` once we've failed long enough that an operator should
    /// start paying attention.
    pub async fn connect(
        url: &str,
        min_backoff: Duration,
        max_backoff: Duration,
    ) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)
            .map_err(|e| StoreError::Transport(format!("invalid redis url: {e}")))?;

        let mut backoff = min_backoff;
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match client.get_connection_manager().await {
                Ok(conn) => {
                    if attempt > 1 {
                        tracing::info!(attempt, "connected to redis after retrying");
                    }
                    return Ok(Self { conn });
                }
                Err(e) => {
                    if attempt >= 5 {
                        tracing::error!(attempt, error = %e, "still unable to connect to redis");
                    } else {
                        tracing::warn!(attempt, error = %e, "failed to connect to redis, retrying");
                    }
                    let jitter_ms = rand::thread_rng().gen_range(0..=100);
                    tokio::time::sleep(backoff + Duration::from_millis(jitter_ms)).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }
    }
}

fn transport_err(e: redis::RedisError) -> StoreError {
    StoreError::Transport(e.to_string())
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(transport_err)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.set(key, value).await.map_err(transport_err)
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.del(key).await.map_err(transport_err)
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.sadd(key, member).await.map_err(transport_err)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        conn.srem(key, member).await.map_err(transport_err)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(transport_err)
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.sismember(key, member).await.map_err(transport_err)
    }

    async fn set_card(&self, key: &str) -> Result<usize, StoreError> {
        let mut conn = self.conn.clone();
        conn.scard(key).await.map_err(transport_err)
    }

    async fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in batch.ops() {
            match op {
                BatchOp::Set { key, value } => {
                    pipe.set(key, value).ignore();
                }
                BatchOp::Del { key } => {
                    pipe.del(key).ignore();
                }
                BatchOp::SetAdd { key, member } => {
                    pipe.sadd(key, member).ignore();
                }
                BatchOp::SetRemove { key, member } => {
                    pipe.srem(key, member).ignore();
                }
            }
        }
        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn)
            .await
            .map_err(transport_err)
    }
}
