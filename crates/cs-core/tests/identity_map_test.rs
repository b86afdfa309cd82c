use cs_core::db::SyncDb;
use cs_core::identity_map::IdentityError;
use cs_core::types::*;

#[tokio::test]
async fn upsert_is_idempotent_and_refreshes_metadata() {
    let db = SyncDb::open_in_memory().await.unwrap();
    let map = db.identity_map();

    let first = SyncMapping::new(Platform::Wordpress, "content", "cms-42", "ext-99", SyncDirection::Inbound);
    map.upsert(&first).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let again = SyncMapping::new(Platform::Wordpress, "content", "cms-42", "ext-99", SyncDirection::Outbound);
    map.upsert(&again).await.unwrap();

    let row = map.get(Platform::Wordpress, "content", "cms-42").await.unwrap().unwrap();
    assert_eq!(row.last_sync_direction, SyncDirection::Outbound);
    assert!(row.last_synced_at >= first.last_synced_at);
    assert_eq!(map.count(Platform::Wordpress).await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_upserts_keep_pairs_unique() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sync.db");
    SyncDb::open(&path).await.unwrap();

    // Ten writers race to pair different cms ids with the same external id.
    let mut handles = Vec::new();
    for i in 0..10 {
        let db = SyncDb::open(&path).await.unwrap();
        handles.push(tokio::spawn(async move {
            db.identity_map()
                .upsert(&SyncMapping::new(
                    Platform::Shopify,
                    "product",
                    format!("cms-{i}"),
                    "ext-1",
                    SyncDirection::Inbound,
                ))
                .await
        }));
    }

    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => ok += 1,
            Err(IdentityError::Conflict { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
    assert_eq!(ok, 1);

    let map = SyncDb::open(&path).await.unwrap().identity_map();
    assert_eq!(map.count(Platform::Shopify).await.unwrap(), 1);
}
