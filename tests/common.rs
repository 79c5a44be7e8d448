#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use brookdb::memory::{InMemoryLeaseProvider, InMemoryStorage};
use brookdb::{BrookDb, EngineConfig, Event, StreamKey};

pub fn event(id: &str) -> Event {
    Event::new(id, "test-suite", "TestEvent", "application/json", b"{}".to_vec())
}

pub fn events(count: usize) -> Vec<Event> {
    (0..count).map(|i| event(&format!("e-{}", i))).collect()
}

pub fn key(id: &str) -> StreamKey {
    StreamKey::new("t", id).expect("valid stream key")
}

/// A config that forces the multi-batch append path with a handful of events.
pub fn small_batch_config() -> EngineConfig {
    EngineConfig {
        max_events_per_batch: 2,
        ..EngineConfig::default()
    }
}

/// An in-memory engine plus direct handles to its storage and lease provider,
/// for tests that fabricate crash states or pre-hold leases.
pub struct TestHarness {
    pub db: BrookDb,
    pub storage: Arc<InMemoryStorage>,
    pub leases: Arc<InMemoryLeaseProvider>,
}

pub fn harness(config: EngineConfig) -> TestHarness {
    let storage = Arc::new(InMemoryStorage::new());
    let leases = Arc::new(InMemoryLeaseProvider::new());
    let db = BrookDb::new(
        Arc::clone(&storage) as _,
        Arc::clone(&leases) as _,
        config,
    );
    TestHarness { db, storage, leases }
}

pub fn create_temp_db_file(name: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join(name);
    (dir, path)
}
