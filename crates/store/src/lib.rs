//! The key-value store adapter (component A, §4.1): typed read/write/set
//! primitives over a string->string store, plus atomic multi-command
//! batches.

mod batch;
mod memory;
mod redis_store;

pub use batch::{Batch, BatchOp};
pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use async_trait::async_trait;
use idg_core::StoreError;

/// The store interface the replicator (writer) and verifier (readers)
/// depend on. Implementations must be safe for concurrent use (§5).
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    async fn del(&self, key: &str) -> Result<(), StoreError>;

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError>;
    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;
    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StoreError>;
    async fn set_card(&self, key: &str) -> Result<usize, StoreError>;

    /// Apply every op in `batch` atomically. A batch that partially fails
    /// must leave no observable effect (§4.1, P4).
    async fn commit(&self, batch: Batch) -> Result<(), StoreError>;

    /// For tests: ensure buffered writes are visible to subsequent reads.
    async fn flush(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Read a JSON record, deserializing it. `None` if the key is absent.
    ///
    /// `Self: Sized` keeps this out of the trait's vtable so `Store` stays
    /// object-safe for the primitives above; callers holding `Arc<dyn
    /// Store>` decode JSON with the free function [`decode_json`] instead.
    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        key: &str,
    ) -> Result<Option<T>, StoreError>
    where
        Self: Sized,
    {
        match self.get(key).await? {
            Some(raw) => Ok(Some(decode_json(key, &raw)?)),
            None => Ok(None),
        }
    }
}

/// Decode a stored JSON value, tagging failures with the key they came
/// from. Shared by every caller that holds a type-erased `Arc<dyn Store>`.
pub fn decode_json<T: serde::de::DeserializeOwned>(
    key: &str,
    raw: &str,
) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::Malformed {
        key: key.to_owned(),
        message: e.to_string(),
    })
}
