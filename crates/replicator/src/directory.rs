//! The directory-server collaborator (§1 Non-goals: "producing a
//! general-purpose LDAP client" is out of scope — we consume one through
//! this trait).

use std::collections::VecDeque;

use async_trait::async_trait;
use idg_core::model::ChangelogEntry;
use parking_lot::Mutex;

/// Errors raised talking to the directory server. Always transient from the
/// poller's point of view: it logs and retries from the same `nextCn`.
#[derive(thiserror::Error, Debug)]
pub enum DirectoryError {
    #[error("directory transport error: {0}")]
    Transport(String),

    #[error("directory search timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("directory returned malformed changelog entry: {0}")]
    Malformed(String),
}

/// What the poller (component B) requires of the directory server: an
/// ordered search over `cn=changelog` (§4.2, §6).
#[async_trait]
pub trait DirectoryClient: Send + Sync {
    /// Entries with `changenumber >= from_cn`, restricted to the
    /// `ou=users`/`ou=groups` subtrees and excluding `vm*`/`amon*` targets
    /// (§4.2 step 2), ascending by change number, at most `limit` results.
    async fn search_changelog(
        &self,
        from_cn: u64,
        limit: u32,
    ) -> Result<Vec<ChangelogEntry>, DirectoryError>;

    /// Release directory-server resources (§4.2 `Close()`).
    async fn close(&self);
}

/// Production client over `cn=changelog`, built on the `ldap3` crate.
///
/// Construction binds once with `bind_dn`/`bind_password` and keeps the
/// connection for the process lifetime; `ldap3`'s `Ldap` handle is cheaply
/// cloneable, so concurrent callers (there are none today — the poller is
/// the sole user) would share it safely.
pub struct LdapDirectoryClient {
    ldap: Mutex<ldap3::Ldap>,
    search_base: String,
    search_timeout: std::time::Duration,
}

impl LdapDirectoryClient {
    pub async fn connect(
        url: &str,
        bind_dn: &str,
        bind_password: &str,
        search_base: impl Into<String>,
        search_timeout: std::time::Duration,
    ) -> Result<Self, DirectoryError> {
        let (conn, mut ldap) = ldap3::LdapConnAsync::new(url)
            .await
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;
        ldap3::drive!(conn);
        ldap.simple_bind(bind_dn, bind_password)
            .await
            .and_then(|r| r.success())
            .map_err(|e| DirectoryError::Transport(format!("bind failed: {e}")))?;
        Ok(Self {
            ldap: Mutex::new(ldap),
            search_base: search_base.into(),
            search_timeout,
        })
    }

    fn filter(from_cn: u64) -> String {
        format!(
            "(&(changenumber>={from_cn})(|(targetdn=*,ou=users,*)(targetdn=*,ou=groups,*))(!(targetdn=vm*))(!(targetdn=amon*)))"
        )
    }
}

#[async_trait]
impl DirectoryClient for LdapDirectoryClient {
    async fn search_changelog(
        &self,
        from_cn: u64,
        limit: u32,
    ) -> Result<Vec<ChangelogEntry>, DirectoryError> {
        let filter = Self::filter(from_cn);
        let mut ldap = self.ldap.lock().clone();

        let search = ldap
            .with_search_options(ldap3::SearchOptions::new().sizelimit(limit))
            .search(&self.search_base, ldap3::Scope::Subtree, &filter, vec!["*", "+"]);

        let (raw_entries, _res) = tokio::time::timeout(self.search_timeout, search)
            .await
            .map_err(|_| DirectoryError::Timeout(self.search_timeout))?
            .map_err(|e| DirectoryError::Transport(e.to_string()))?
            .success()
            .map_err(|e| DirectoryError::Transport(e.to_string()))?;

        let mut entries = Vec::with_capacity(raw_entries.len().min(limit as usize));
        for raw in raw_entries.into_iter().take(limit as usize) {
            entries.push(parse_search_entry(ldap3::SearchEntry::construct(raw))?);
        }

        entries.sort_by_key(|e| e.changenumber);
        Ok(entries)
    }

    async fn close(&self) {
        let mut ldap = self.ldap.lock().clone();
        let _ = ldap.unbind().await;
    }
}

/// Each changelog attribute arrives as a JSON-encoded string on the wire
/// (§6); `changes`/`entry` are parsed out of their single string value.
fn parse_search_entry(entry: ldap3::SearchEntry) -> Result<ChangelogEntry, DirectoryError> {
    let attr = |name: &str| -> Option<String> { entry.attrs.get(name)?.first().cloned() };

    let targetdn = attr("targetdn")
        .ok_or_else(|| DirectoryError::Malformed("missing targetdn".into()))?;
    let changetype_raw =
        attr("changetype").ok_or_else(|| DirectoryError::Malformed("missing changetype".into()))?;
    let changenumber: u64 = attr("changenumber")
        .ok_or_else(|| DirectoryError::Malformed("missing changenumber".into()))?
        .parse()
        .map_err(|_| DirectoryError::Malformed("changenumber not an integer".into()))?;
    let changes_raw =
        attr("changes").ok_or_else(|| DirectoryError::Malformed("missing changes".into()))?;
    let changetime = attr("changetime");
    let entry_raw = attr("entry");

    let changetype = serde_json::from_value(serde_json::Value::String(changetype_raw))
        .map_err(|e| DirectoryError::Malformed(format!("bad changetype: {e}")))?;
    let changes = serde_json::from_str(&changes_raw)
        .map_err(|e| DirectoryError::Malformed(format!("bad changes payload: {e}")))?;
    let entry = entry_raw
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| DirectoryError::Malformed(format!("bad entry payload: {e}")))?;

    Ok(ChangelogEntry {
        targetdn,
        changetype,
        changes,
        entry,
        changenumber,
        changetime,
    })
}

/// In-memory `DirectoryClient` for tests: a fixed queue of entries, handed
/// out in order as `search_changelog` is called with increasing `from_cn`.
#[derive(Default)]
pub struct FakeDirectoryClient {
    entries: Mutex<VecDeque<ChangelogEntry>>,
}

impl FakeDirectoryClient {
    pub fn new(entries: Vec<ChangelogEntry>) -> Self {
        Self {
            entries: Mutex::new(entries.into()),
        }
    }

    pub fn push(&self, entry: ChangelogEntry) {
        self.entries.lock().push_back(entry);
    }
}

#[async_trait]
impl DirectoryClient for FakeDirectoryClient {
    async fn search_changelog(
        &self,
        from_cn: u64,
        limit: u32,
    ) -> Result<Vec<ChangelogEntry>, DirectoryError> {
        let mut queue = self.entries.lock();
        let mut out = Vec::new();
        while let Some(front) = queue.front() {
            if front.changenumber < from_cn {
                queue.pop_front();
                continue;
            }
            if out.len() as u32 >= limit {
                break;
            }
            out.push(queue.pop_front().unwrap());
        }
        Ok(out)
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
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
    async fn fake_client_respects_from_cn_and_limit() {
        let client = FakeDirectoryClient::new(vec![entry(1), entry(2), entry(3)]);
        let page = client.search_changelog(2, 10).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].changenumber, 2);
    }

    #[tokio::test]
    async fn fake_client_enforces_page_size() {
        let client = FakeDirectoryClient::new(vec![entry(1), entry(2), entry(3)]);
        let page = client.search_changelog(1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
    }
}
