//! State Store Integration Tests
//!
//! Persistence behaviour of the processed-locator file across process
//! lifetimes (modelled as drop and reopen).

use reelcast::core::{StateStore, StateStoreError};
use tempfile::TempDir;

#[test]
fn test_reopen_sees_committed_locators() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("downloaded.json");

    {
        let mut store = StateStore::open(&path).unwrap();
        assert!(store.insert_and_commit("magnet:?xt=urn:btih:one").unwrap());
        assert!(store.insert_and_commit("https://cdn.example/two.mkv").unwrap());
    }

    let store = StateStore::open(&path).unwrap();
    assert_eq!(store.len(), 2);
    assert!(store.contains("magnet:?xt=urn:btih:one"));
    assert!(store.contains("https://cdn.example/two.mkv"));
}

#[test]
fn test_file_content_is_independent_of_insertion_order() {
    let temp = TempDir::new().unwrap();
    let first = temp.path().join("first.json");
    let second = temp.path().join("second.json");

    let mut a = StateStore::open(&first).unwrap();
    for locator in ["c", "a", "b"] {
        a.insert_and_commit(locator).unwrap();
    }

    let mut b = StateStore::open(&second).unwrap();
    for locator in ["b", "c", "a"] {
        b.insert_and_commit(locator).unwrap();
    }

    assert_eq!(
        std::fs::read_to_string(&first).unwrap(),
        std::fs::read_to_string(&second).unwrap()
    );
    assert_eq!(StateStore::load(&first).unwrap(), StateStore::load(&second).unwrap());
}

#[test]
fn test_corrupt_file_is_never_reset() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("downloaded.json");
    std::fs::write(&path, "[\"a\", ").unwrap();

    let err = StateStore::open(&path).err().unwrap();
    assert!(matches!(err, StateStoreError::Corrupt { .. }));

    // The bad file is left for a human to inspect
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[\"a\", ");
}

#[test]
fn test_accepts_file_written_by_hand() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("downloaded.json");
    std::fs::write(&path, "[\n  \"https://cdn.example/x.mkv\"\n]\n").unwrap();

    let store = StateStore::open(&path).unwrap();
    assert!(store.contains("https://cdn.example/x.mkv"));
}

#[test]
fn test_second_writer_is_rejected_until_first_closes() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("downloaded.json");

    let first = StateStore::open(&path).unwrap();
    assert!(matches!(
        StateStore::open(&path).err().unwrap(),
        StateStoreError::Locked(_)
    ));

    drop(first);
    assert!(StateStore::open(&path).is_ok());
}

#[test]
fn test_state_file_in_missing_directory() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("state").join("nested").join("downloaded.json");

    let mut store = StateStore::open(&path).unwrap();
    store.insert_and_commit("a").unwrap();

    assert_eq!(std::fs::read_to_string(&path).unwrap(), "[\"a\"]");
}
