//! SQLite durability: everything an engine instance committed is visible to a
//! fresh instance opened on the same file.

mod common;

use std::sync::Arc;

use brookdb::memory::InMemoryLeaseProvider;
use brookdb::sqlite::SqliteStorage;
use brookdb::{BrookDb, Position, StorageRepository};
use common::{create_temp_db_file, event, events, key, small_batch_config};

#[tokio::test]
async fn committed_events_survive_reopen() {
    let (_dir, path) = create_temp_db_file("restart.db");
    let k = key("durable");

    {
        let db = BrookDb::open(&path).unwrap();
        db.append_events(&k, events(10), None).await.unwrap();
        db.append_events(&k, vec![event("late")], None).await.unwrap();
    }

    let reopened = BrookDb::open(&path).unwrap();
    assert_eq!(reopened.head_position(&k).await.unwrap(), Position::from_raw(10));

    let read = reopened.read_events_batch(&k, None, None).await.unwrap();
    assert_eq!(read.len(), 11);
    assert_eq!(read[10].event.id, "late");
}

#[tokio::test]
async fn event_payloads_survive_reopen_intact() {
    let (_dir, path) = create_temp_db_file("payloads.db");
    let k = key("bytes");

    let payload: Vec<u8> = (0..=255).collect();
    let original = brookdb::Event::new("binary", "svc", "BlobStored", "application/octet-stream", payload)
        .with_time_ms(1_724_572_800_000);

    {
        let db = BrookDb::open(&path).unwrap();
        db.append_events(&k, vec![original.clone()], None).await.unwrap();
    }

    let reopened = BrookDb::open(&path).unwrap();
    let read = reopened.read_events_batch(&k, None, None).await.unwrap();
    assert_eq!(read[0].event, original);
}

#[tokio::test]
async fn interrupted_multi_batch_state_is_recovered_after_reopen() {
    let (_dir, path) = create_temp_db_file("interrupted.db");
    let k = key("cut-short");

    // First process dies mid-append: marker plus a partial range on disk.
    {
        let storage = SqliteStorage::open(&path).unwrap();
        storage
            .create_pending_head(&k, Position::NONE, Position::from_raw(5))
            .await
            .unwrap();
        storage
            .append_event_batch(&k, &events(3), Position::FIRST)
            .await
            .unwrap();
    }

    // Second process rolls it back on first access.
    let db = BrookDb::open(&path).unwrap();
    assert_eq!(db.head_position(&k).await.unwrap(), Position::NONE);
    assert!(db.read_events_batch(&k, None, None).await.unwrap().is_empty());

    // And the stream works normally from then on.
    let head = db.append_events(&k, events(2), None).await.unwrap();
    assert_eq!(head, Position::from_raw(1));
}

#[tokio::test]
async fn multi_batch_append_on_sqlite_round_trips() {
    let (_dir, path) = create_temp_db_file("two-phase.db");
    let k = key("big");

    {
        let storage = Arc::new(SqliteStorage::open(&path).unwrap());
        let db = BrookDb::new(
            storage,
            Arc::new(InMemoryLeaseProvider::new()),
            small_batch_config(),
        );
        let head = db.append_events(&k, events(7), None).await.unwrap();
        assert_eq!(head, Position::from_raw(6));
    }

    let reopened = BrookDb::open(&path).unwrap();
    let read = reopened.read_events_batch(&k, None, None).await.unwrap();
    assert_eq!(read.len(), 7);
    assert_eq!(
        read.iter().map(|r| r.position.as_raw()).collect::<Vec<i64>>(),
        (0..=6).collect::<Vec<i64>>()
    );
}
