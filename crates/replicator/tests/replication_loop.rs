//! End-to-end poll -> transform -> commit loop against `MemoryStore` and a
//! `FakeDirectoryClient` (§8 P3/P4).

use std::collections::HashMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use idg_core::keys::{account_login_key, uuid_key, CHANGENUMBER_KEY};
use idg_core::model::{ChangeType, ChangelogEntry, ChangesPayload};
use idg_replicator::{FakeDirectoryClient, ReplicationDriver};
use idg_store::{MemoryStore, Store};

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
async fn change_number_is_monotonic_across_many_steps() {
    let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
    let entries: Vec<_> = (1..=20)
        .map(|cn| {
            add_account(
                cn,
                &format!("{:08x}-e89b-12d3-a456-426614174000", cn),
                &format!("user{cn}"),
            )
        })
        .collect();
    let directory = Arc::new(FakeDirectoryClient::new(entries));

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

    let mut last_seen = 0u64;
    for _ in 0..25 {
        driver.step().await;
        if let Some(raw) = store.get(CHANGENUMBER_KEY).await.unwrap() {
            let cn: u64 = raw.parse().unwrap();
            assert!(cn >= last_seen, "change number must never regress");
            last_seen = cn;
        }
    }

    assert_eq!(last_seen, 20);
    assert_eq!(driver.metrics().entries_applied.load(Ordering::Relaxed), 20);
    assert!(!driver.metrics().is_virgin());

    for cn in 1..=20u64 {
        let login = format!("user{cn}");
        assert!(store.get(&account_login_key(&login)).await.unwrap().is_some());
    }
    let u = idg_core::model::Uuid::new_unchecked("00000001-e89b-12d3-a456-426614174000");
    assert!(store.get(&uuid_key(&u)).await.unwrap().is_some());
}
