//! An in-process store for tests (the replicator and verifier unit-test
//! suites never talk to a real Redis).

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use idg_core::StoreError;
use parking_lot::RwLock;

use crate::batch::{Batch, BatchOp};
use crate::Store;

#[derive(Debug, Clone)]
enum Slot {
    Scalar(String),
    Set(HashSet<String>),
}

/// A `HashMap`-backed [`Store`] implementing the exact same trait as
/// [`crate::RedisStore`], so transformer/driver tests run without a real
/// Redis instance.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Slot>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(&self, op: &BatchOp, data: &mut HashMap<String, Slot>) -> Result<(), StoreError> {
        match op {
            BatchOp::Set { key, value } => {
                data.insert(key.clone(), Slot::Scalar(value.clone()));
            }
            BatchOp::Del { key } => {
                data.remove(key);
            }
            BatchOp::SetAdd { key, member } => match data.get_mut(key) {
                Some(Slot::Set(s)) => {
                    s.insert(member.clone());
                }
                Some(Slot::Scalar(_)) => {
                    return Err(StoreError::Malformed {
                        key: key.clone(),
                        message: "key holds a scalar, not a set".into(),
                    })
                }
                None => {
                    let mut s = HashSet::new();
                    s.insert(member.clone());
                    data.insert(key.clone(), Slot::Set(s));
                }
            },
            BatchOp::SetRemove { key, member } => {
                if let Some(Slot::Set(s)) = data.get_mut(key) {
                    s.remove(member);
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        match self.data.read().get(key) {
            Some(Slot::Scalar(v)) => Ok(Some(v.clone())),
            Some(Slot::Set(_)) => Err(StoreError::Malformed {
                key: key.to_owned(),
                message: "key holds a set, not a scalar".into(),
            }),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.data
            .write()
            .insert(key.to_owned(), Slot::Scalar(value.to_owned()));
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<(), StoreError> {
        self.data.write().remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut data = self.data.write();
        self.apply(
            &BatchOp::SetAdd {
                key: key.to_owned(),
                member: member.to_owned(),
            },
            &mut data,
        )
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<(), StoreError> {
        let mut data = self.data.write();
        self.apply(
            &BatchOp::SetRemove {
                key: key.to_owned(),
                member: member.to_owned(),
            },
            &mut data,
        )
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.data.read().get(key) {
            Some(Slot::Set(s)) => Ok(s.iter().cloned().collect()),
            Some(Slot::Scalar(_)) => Err(StoreError::Malformed {
                key: key.to_owned(),
                message: "key holds a scalar, not a set".into(),
            }),
            None => Ok(Vec::new()),
        }
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        Ok(self.set_members(key).await?.iter().any(|m| m == member))
    }

    async fn set_card(&self, key: &str) -> Result<usize, StoreError> {
        Ok(self.set_members(key).await?.len())
    }

    async fn commit(&self, batch: Batch) -> Result<(), StoreError> {
        // Hold the write lock for the whole batch: partial failure is
        // impossible because every op here is infallible except a
        // scalar/set type clash, which we validate before mutating.
        let mut data = self.data.write();
        for op in batch.ops() {
            let conflicts = match op {
                BatchOp::SetAdd { key, .. } | BatchOp::SetRemove { key, .. } => {
                    matches!(data.get(key), Some(Slot::Scalar(_)))
                }
                BatchOp::Set { key, .. } => matches!(data.get(key), Some(Slot::Set(_))),
                BatchOp::Del { .. } => false,
            };
            if conflicts {
                return Err(StoreError::Malformed {
                    key: "batch".into(),
                    message: "type conflict mid-batch; no changes applied".into(),
                });
            }
        }
        for op in batch.ops() {
            self.apply(op, &mut data)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_get_round_trip() {
        let store = MemoryStore::new();
        store.set("k", "v").await.unwrap();
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn batch_commits_atomically() {
        let store = MemoryStore::new();
        let mut batch = Batch::new();
        batch.set("a", "1").set_add("s", "m");
        store.commit(batch).await.unwrap();
        assert_eq!(store.get("a").await.unwrap().as_deref(), Some("1"));
        assert_eq!(store.set_members("s").await.unwrap(), vec!["m".to_owned()]);
    }

    #[tokio::test]
    async fn batch_with_type_conflict_leaves_no_partial_effect() {
        let store = MemoryStore::new();
        store.set("x", "scalar").await.unwrap();

        let mut batch = Batch::new();
        batch.set("fresh", "1").set_add("x", "m");
        let result = store.commit(batch).await;

        assert!(result.is_err());
        assert_eq!(store.get("fresh").await.unwrap(), None);
        assert_eq!(store.get("x").await.unwrap().as_deref(), Some("scalar"));
    }

    #[tokio::test]
    async fn set_remove_and_card() {
        let store = MemoryStore::new();
        store.set_add("s", "a").await.unwrap();
        store.set_add("s", "b").await.unwrap();
        assert_eq!(store.set_card("s").await.unwrap(), 2);
        store.set_remove("s", "a").await.unwrap();
        assert_eq!(store.set_card("s").await.unwrap(), 1);
        assert!(!store.set_is_member("s", "a").await.unwrap());
    }
}
