//! The replication driver (component D, §4.4): binds the poller and
//! transformer to the store in a strictly serial loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use idg_core::keys::{CHANGENUMBER_KEY, VIRGIN_KEY};
use idg_store::{Batch, Store};

use crate::directory::DirectoryClient;
use crate::poller::{ChangelogPoller, PollEvent};
use crate::transform::transform;

/// Readiness/progress counters exposed to the ambient `/healthz`/`/metrics`
/// surface (SPEC_FULL §1.1, §10) without coupling the driver to HTTP.
#[derive(Default)]
pub struct DriverMetrics {
    pub change_number: AtomicU64,
    pub entries_applied: AtomicU64,
    pub errors: AtomicU64,
    virgin: AtomicBool,
}

impl DriverMetrics {
    pub fn is_virgin(&self) -> bool {
        self.virgin.load(Ordering::Relaxed)
    }
}

/// Binds A+B+C into the replication loop (§4.4).
pub struct ReplicationDriver<D: DirectoryClient> {
    store: Arc<dyn Store>,
    poller: ChangelogPoller<D>,
    current_changenumber: u64,
    virgin: bool,
    metrics: Arc<DriverMetrics>,
    backoff_min: Duration,
    backoff_max: Duration,
}

impl<D: DirectoryClient> ReplicationDriver<D> {
    /// Load `changenumber`/`virgin` from the store and construct a poller
    /// starting from the persisted cursor (§4.4 "On startup").
    pub async fn bootstrap(
        store: Arc<dyn Store>,
        directory: Arc<D>,
        page_size: u32,
        search_timeout: Duration,
        backoff_min: Duration,
        backoff_max: Duration,
    ) -> Result<Self, idg_core::StoreError> {
        let persisted_cn = store.get(CHANGENUMBER_KEY).await?;
        let current_changenumber: u64 = match &persisted_cn {
            Some(s) => s.parse().unwrap_or(0),
            None => 0,
        };

        let virgin = match persisted_cn {
            Some(_) => store.get(VIRGIN_KEY).await?.is_some(),
            None => {
                store.set(VIRGIN_KEY, "true").await?;
                true
            }
        };

        let metrics = Arc::new(DriverMetrics::default());
        metrics.change_number.store(current_changenumber, Ordering::Relaxed);
        metrics.virgin.store(virgin, Ordering::Relaxed);

        let poller =
            ChangelogPoller::new(directory, current_changenumber, page_size, search_timeout);

        Ok(Self {
            store,
            poller,
            current_changenumber,
            virgin,
            metrics,
            backoff_min,
            backoff_max,
        })
    }

    pub fn metrics(&self) -> Arc<DriverMetrics> {
        self.metrics.clone()
    }

    /// The main loop (§4.4): fetch → transform → atomically commit →
    /// persist new change-number, forever. Never returns under normal
    /// operation; exits only if the poller's directory client errors are
    /// unrecoverable (callers typically run this inside a supervised task).
    pub async fn run(&mut self) {
        loop {
            self.step().await;
        }
    }

    /// One iteration of the loop, exposed separately so tests can drive it
    /// deterministically instead of looping forever.
    pub async fn step(&mut self) {
        let (entry, event) = match self.poller.get_next().await {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "changelog poll failed, retrying after backoff");
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                tokio::time::sleep(self.backoff_min).await;
                return;
            }
        };

        if let Some(entry) = entry {
            self.apply_with_retry(&entry).await;
        }

        if event == PollEvent::Fresh && self.virgin {
            if let Err(e) = self.store.del(VIRGIN_KEY).await {
                tracing::error!(error = %e, "failed to clear virgin flag");
                self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                return;
            }
            self.virgin = false;
            self.metrics.virgin.store(false, Ordering::Relaxed);
            tracing::info!("replication caught up; cache is now authoritative");
        }
    }

    async fn apply_with_retry(&mut self, entry: &idg_core::model::ChangelogEntry) {
        let mut backoff = self.backoff_min;
        loop {
            let mut batch = Batch::new();
            match transform(&*self.store, &mut batch, entry).await {
                Ok(()) => {}
                Err(e) => {
                    tracing::error!(
                        changenumber = entry.changenumber,
                        error = %e,
                        "fatal transform error; change number will not advance"
                    );
                    self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }

            if entry.changenumber > self.current_changenumber {
                batch.set(CHANGENUMBER_KEY, entry.changenumber.to_string());
            }

            match self.store.commit(batch).await {
                Ok(()) => {
                    self.current_changenumber = self.current_changenumber.max(entry.changenumber);
                    self.metrics
                        .change_number
                        .store(self.current_changenumber, Ordering::Relaxed);
                    self.metrics.entries_applied.fetch_add(1, Ordering::Relaxed);
                    return;
                }
                Err(e) => {
                    tracing::warn!(
                        changenumber = entry.changenumber,
                        error = %e,
                        backoff_ms = backoff.as_millis() as u64,
                        "store commit failed, retrying same entry"
                    );
                    self.metrics.errors.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(self.backoff_max);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::FakeDirectoryClient;
    use idg_core::keys::account_login_key;
    use idg_core::model::{ChangeType, ChangesPayload, ChangelogEntry};
    use idg_store::MemoryStore;
    use std::collections::HashMap;

    fn add_account(cn: u64, uuid: &str, login: &str) -> ChangelogEntry {
        let mut m = HashMap::new();
        m.insert("objectclass".into(), vec!["sdcperson".into()]);
        m.insert("uuid".into(), vec![uuid.into()]);
        m.insert("login".into(), vec![login.into()]);
        ChangelogEntry {
            targetdn: format!("uuid={uuid}, ou=users, o=smartdc"),
            changetype: ChangeType::Add,
            changes: ChangesPayload::Attrs(m),
            entry: None,
            changenumber: cn,
            changetime: None,
        }
    }

    #[tokio::test]
    async fn fresh_poll_clears_virgin_and_progresses_change_number() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let directory = Arc::new(FakeDirectoryClient::new(vec![
            add_account(1, "123e4567-e89b-12d3-a456-426614174000", "a"),
            add_account(2, "223e4567-e89b-12d3-a456-426614174000", "b"),
        ]));

        let mut driver = ReplicationDriver::bootstrap(
            store.clone(),
            directory,
            1000,
            Duration::from_millis(200),
            Duration::from_millis(1),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        assert!(driver.metrics().is_virgin());

        driver.step().await;
        assert_eq!(
            store.get(&account_login_key("a")).await.unwrap().as_deref(),
            Some("123e4567-e89b-12d3-a456-426614174000")
        );

        driver.step().await;
        assert_eq!(
            store.get(CHANGENUMBER_KEY).await.unwrap().as_deref(),
            Some("2")
        );

        driver.step().await;
        assert!(store.get(VIRGIN_KEY).await.unwrap().is_none());
        assert!(!driver.metrics().is_virgin());
    }

    #[tokio::test]
    async fn fatal_transform_error_does_not_advance_change_number() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let bad_entry = ChangelogEntry {
            targetdn: "uuid=x, ou=users, o=smartdc".into(),
            changetype: ChangeType::Modify,
            changes: {
                let mut m = HashMap::new();
                m.insert("objectclass".into(), vec!["sdcperson".into()]);
                ChangesPayload::Attrs(m)
            },
            entry: None,
            changenumber: 5,
            changetime: None,
        };
        let directory = Arc::new(FakeDirectoryClient::new(vec![bad_entry]));

        let mut driver = ReplicationDriver::bootstrap(
            store.clone(),
            directory,
            1000,
            Duration::from_millis(200),
            Duration::from_millis(1),
            Duration::from_millis(10),
        )
        .await
        .unwrap();

        driver.step().await;
        assert_eq!(store.get(CHANGENUMBER_KEY).await.unwrap(), None);
        assert_eq!(driver.metrics().errors.load(Ordering::Relaxed), 1);
    }
}
