//! Integration tests for file-backed snapshot persistence.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use chrono::Utc;
use questline_state::{FileStorage, PlayerStateStore, SnapshotStorage};
use questline_types::{ParcelCoord, WalletAddress};
use tempfile::TempDir;

#[test]
fn missing_file_loads_as_nothing() {
    let dir = TempDir::new().unwrap();
    let storage = FileStorage::in_directory(dir.path());
    assert!(storage.load().unwrap().is_none());
}

#[test]
fn store_survives_a_restart_through_a_file() {
    let dir = TempDir::new().unwrap();
    let wallet = WalletAddress::parse("0xc0ffee").unwrap();
    let now = Utc::now();

    {
        let store = PlayerStateStore::open(Arc::new(FileStorage::in_directory(dir.path())));
        store.bind_wallet(&wallet);
        for x in 0..4 {
            store.enter_parcel(ParcelCoord::new(x, 0), now);
        }
        store.add_xp(40);
        assert!(store.persist().unwrap());
    }

    let storage = FileStorage::in_directory(dir.path());
    assert!(storage.path().exists());
    let store = PlayerStateStore::open(Arc::new(storage));
    assert_eq!(store.wallet(), Some(wallet));
    assert_eq!(store.parcels_visited_count(), 4);
    assert_eq!(store.total_xp(), 40);
}

#[test]
fn truncated_file_is_replaced_on_next_persist() {
    let dir = TempDir::new().unwrap();
    let storage = FileStorage::in_directory(dir.path());
    storage.save("{\"schemaVersion\": 1, \"parcelsVisited\": [[").unwrap();

    let store = PlayerStateStore::open(Arc::new(storage.clone()));
    assert_eq!(store.parcels_visited_count(), 0);

    store.add_xp(5);
    assert!(store.persist().unwrap());
    let reopened = PlayerStateStore::open(Arc::new(storage));
    assert_eq!(reopened.total_xp(), 5);
}

#[test]
fn snapshot_directory_is_created_on_first_persist() {
    let dir = TempDir::new().unwrap();
    let nested = dir.path().join("profiles").join("beta");
    let storage = FileStorage::in_directory(&nested);

    let store = PlayerStateStore::open(Arc::new(storage.clone()));
    store.add_xp(1);
    assert!(store.persist().unwrap());
    assert!(storage.path().starts_with(&nested));
    assert!(storage.path().exists());
}
