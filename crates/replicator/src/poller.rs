//! The changelog poller (component B, §4.2).

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use idg_core::model::ChangelogEntry;

use crate::directory::{DirectoryClient, DirectoryError};

/// Emitted after each poll, per §4.2's observable events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvent {
    /// The poll returned one or more new entries.
    Stale,
    /// The poll returned zero new entries; the caller is caught up.
    Fresh,
}

/// Pulls ordered changelog entries, buffers them, and hands them out one at
/// a time while tracking the high-water change number.
///
/// Re-entrancy is guarded structurally: `get_next` takes `&mut self`, so two
/// polls can never run concurrently against the same poller.
pub struct ChangelogPoller<D: DirectoryClient> {
    directory: Arc<D>,
    next_cn: u64,
    page_size: u32,
    search_timeout: Duration,
    buffer: VecDeque<ChangelogEntry>,
}

impl<D: DirectoryClient> ChangelogPoller<D> {
    pub fn new(
        directory: Arc<D>,
        last_applied_cn: u64,
        page_size: u32,
        search_timeout: Duration,
    ) -> Self {
        Self {
            directory,
            next_cn: last_applied_cn + 1,
            page_size,
            search_timeout,
            buffer: VecDeque::new(),
        }
    }

    pub fn next_cn(&self) -> u64 {
        self.next_cn
    }

    /// One changelog entry, blocking up to `search_timeout` while a search
    /// is outstanding. Returns `(None, event)` when the search is empty or
    /// times out (caller should re-poll); `(Some(entry), Stale)` otherwise.
    pub async fn get_next(&mut self) -> Result<(Option<ChangelogEntry>, PollEvent), DirectoryError> {
        if let Some(entry) = self.buffer.pop_front() {
            let event = if self.buffer.is_empty() {
                PollEvent::Fresh
            } else {
                PollEvent::Stale
            };
            return Ok((Some(entry), event));
        }

        let search = self.directory.search_changelog(self.next_cn, self.page_size);
        let entries = match tokio::time::timeout(self.search_timeout, search).await {
            Ok(Ok(entries)) => entries,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                tracing::warn!(
                    next_cn = self.next_cn,
                    timeout_ms = self.search_timeout.as_millis() as u64,
                    "changelog search timed out, will retry from same cursor"
                );
                return Ok((None, PollEvent::Fresh));
            }
        };

        if entries.is_empty() {
            return Ok((None, PollEvent::Fresh));
        }

        let max_cn = entries.iter().map(|e| e.changenumber).max().unwrap();
        self.buffer.extend(entries);
        self.next_cn = max_cn + 1;

        let entry = self.buffer.pop_front();
        let event = if self.buffer.is_empty() {
            PollEvent::Fresh
        } else {
            PollEvent::Stale
        };
        Ok((entry, event))
    }

    pub async fn close(&self) {
        self.directory.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::FakeDirectoryClient;
    use idg_core::model::{ChangeType, ChangesPayload};
    use std::collections::HashMap;

    fn entry(cn: u64) -> ChangelogEntry {
        ChangelogEntry {
            targetdn: format!("uuid={cn}, ou=users, o=smartdc"),
            changetype: ChangeType::Add,
            changes: ChangesPayload::Attrs(HashMap::new()),
            entry: None,
            changenumber: cn,
            changetime: None,
        }
    }

    #[tokio::test]
    async fn drains_buffer_before_polling_and_advances_next_cn() {
        let client = Arc::new(FakeDirectoryClient::new(vec![entry(1), entry(2)]));
        let mut poller = ChangelogPoller::new(client, 0, 1000, Duration::from_millis(500));

        let (e1, ev1) = poller.get_next().await.unwrap();
        assert_eq!(e1.unwrap().changenumber, 1);
        assert_eq!(ev1, PollEvent::Stale);

        let (e2, ev2) = poller.get_next().await.unwrap();
        assert_eq!(e2.unwrap().changenumber, 2);
        assert_eq!(ev2, PollEvent::Fresh);

        assert_eq!(poller.next_cn(), 3);
    }

    #[tokio::test]
    async fn empty_poll_emits_fresh_without_advancing_cursor() {
        let client = Arc::new(FakeDirectoryClient::new(vec![]));
        let mut poller = ChangelogPoller::new(client, 5, 1000, Duration::from_millis(500));
        let (entry, event) = poller.get_next().await.unwrap();
        assert!(entry.is_none());
        assert_eq!(event, PollEvent::Fresh);
        assert_eq!(poller.next_cn(), 6);
    }
}
