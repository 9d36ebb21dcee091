//! Integration tests for Database open, commit and reset
//!
//! These tests verify:
//! - Creating and reopening durable databases
//! - Encrypted bundles
//! - Whole-database resets
//! - Journal-relative timestamps

use gink_core::{Behavior, Muid, UserKey};
use gink_engine::{
    Container, Contents, Database, Directory, GinkConfig, KeySet, Sequence, CONFIG_FILE_NAME, NOW,
    STARTING_CHAIN,
};
use tempfile::TempDir;

#[test]
fn test_database_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("lifecycle_test");

    // Phase 1: create and write
    let first_chain = {
        let db = Database::open(&db_path).expect("Failed to open database");
        let root = Directory::arche(&db);
        root.set("user:1", "Alice", None).unwrap();
        root.set("user:2", "Bob", None).unwrap();
        db.chain().unwrap()
    };
    assert!(db_path.join(CONFIG_FILE_NAME).exists());

    // Phase 2: reopen, data is still there
    let db = Database::open(&db_path).expect("Failed to reopen database");
    let root = Directory::arche(&db);
    assert_eq!(root.get("user:1", NOW).unwrap(), Some(Contents::from("Alice")));
    assert_eq!(root.size(NOW).unwrap(), 2);

    // this process is still alive, so its old chain is not taken over
    root.set("user:3", "Carol", None).unwrap();
    assert_ne!(db.chain().unwrap(), first_chain);
    let starts = db
        .log(-20)
        .unwrap()
        .into_iter()
        .filter(|a| a.comment.as_deref() == Some(STARTING_CHAIN))
        .count();
    assert_eq!(starts, 2);
}

#[test]
fn test_config_file_is_respected() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("configured");
    std::fs::create_dir_all(&db_path).unwrap();
    std::fs::write(
        db_path.join(CONFIG_FILE_NAME),
        "identity = \"ops@cluster\"\n[store]\nretain_entries = false\n",
    )
    .unwrap();

    let db = Database::open(&db_path).unwrap();
    assert_eq!(db.identity(), "ops@cluster");
    assert!(!db.store().get_retentions().unwrap().entries);

    let root = Directory::arche(&db);
    root.set("k", 1, None).unwrap();
    root.set("k", 2, None).unwrap();
    assert_eq!(root.get("k", NOW).unwrap(), Some(Contents::from(2)));
}

#[test]
fn test_bad_config_fails_open() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("broken");
    std::fs::create_dir_all(&db_path).unwrap();
    std::fs::write(db_path.join(CONFIG_FILE_NAME), "[store]\nmap_size = 10\n").unwrap();
    assert!(matches!(
        Database::open(&db_path),
        Err(gink_core::Error::ConfigError(_))
    ));
}

#[test]
fn test_explicit_config_is_not_written() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("explicit");
    let db = Database::builder()
        .path(&db_path)
        .config(GinkConfig::default())
        .open()
        .unwrap();
    assert_eq!(db.data_dir(), Some(db_path.as_path()));
    assert!(!db_path.join(CONFIG_FILE_NAME).exists());
}

#[test]
fn test_encrypted_bundles_still_apply() {
    let db = Database::builder().symmetric_key([7u8; 32]).open().unwrap();
    let root = Directory::arche(&db);
    root.set("secret", "sauce", None).unwrap();
    assert_eq!(root.get("secret", NOW).unwrap(), Some(Contents::from("sauce")));

    let latest = db.store().get_bundle_info(-1).unwrap().unwrap();
    let wrapper = db
        .store()
        .get_one_bundle(latest.timestamp, latest.medallion)
        .unwrap()
        .unwrap();
    assert!(wrapper.builder().encrypted.is_some());
    assert!(wrapper.builder().changes.is_empty());
}

#[test]
fn test_reset_everything() {
    let db = Database::in_memory().unwrap();
    let root = Directory::arche(&db);
    let tags = KeySet::arche(&db);
    root.set("a", 1, None).unwrap();
    tags.add("blue", None).unwrap();
    let mark = db.now();

    root.set("a", 2, None).unwrap();
    root.set("b", 3, None).unwrap();
    tags.add("green", None).unwrap();
    tags.discard("blue", None).unwrap();

    let changes = db.reset(mark, None).unwrap();
    assert!(changes > 0);
    assert_eq!(root.items(NOW).unwrap(), vec![(UserKey::from("a"), Contents::from(1))]);
    let keys: Vec<_> = tags.keys(NOW).unwrap().into_iter().collect();
    assert_eq!(keys, vec![UserKey::from("blue")]);

    // resetting to the current state changes nothing
    assert_eq!(db.reset(NOW, None).unwrap(), 0);
}

#[test]
fn test_reset_into_open_bundle() {
    let db = Database::in_memory().unwrap();
    let root = Directory::arche(&db);
    root.set("x", "old", None).unwrap();
    let mark = db.now();
    root.set("x", "new", None).unwrap();

    let mut bundler = db.start_bundle("undo");
    let count = root.reset(mark, None, false, Some(&mut bundler)).unwrap();
    assert_eq!(count, bundler.len());
    assert_eq!(root.get("x", NOW).unwrap(), Some(Contents::from("new")));
    db.commit(bundler).unwrap();
    assert_eq!(root.get("x", NOW).unwrap(), Some(Contents::from("old")));
}

#[test]
fn test_nested_containers_reset_recursively() {
    let db = Database::in_memory().unwrap();
    let root = Directory::arche(&db);
    let child = Directory::create(&db, None).unwrap();
    root.set("child", child.muid(), None).unwrap();
    child.set("leaf", "green", None).unwrap();
    let mark = db.now();
    child.set("leaf", "brown", None).unwrap();

    root.reset(mark, None, true, None).unwrap();
    assert_eq!(child.get("leaf", NOW).unwrap(), Some(Contents::from("green")));
}

#[test]
fn test_journal_indexes_as_timestamps() {
    let db = Database::in_memory().unwrap();
    let seq = Sequence::arche(&db);
    seq.append("one", None).unwrap();
    seq.append("two", None).unwrap();
    seq.append("three", None).unwrap();
    assert_eq!(seq.size(-1).unwrap(), 2);
    assert_eq!(seq.size(-2).unwrap(), 1);
    assert_eq!(seq.size(-3).unwrap(), 0);
}

#[test]
fn test_bundler_groups_container_creation() {
    let db = Database::in_memory().unwrap();
    let mut bundler = db.start_bundle("setup");
    let dir = Directory::create(&db, Some(&mut bundler)).unwrap();
    dir.set("ready", true, Some(&mut bundler)).unwrap();
    Directory::arche(&db).set("config", dir.muid(), Some(&mut bundler)).unwrap();
    let info = db.commit(bundler).unwrap();

    let created = Muid::create(&info, Some(&dir.muid().to_builder()));
    let opened = Directory::open(&db, created).unwrap();
    assert_eq!(opened.get("ready", NOW).unwrap(), Some(Contents::from(true)));
    assert_eq!(
        Directory::arche(&db).get("config", NOW).unwrap(),
        Some(Contents::Container(created))
    );
    assert_eq!(db.store().get_container(created).unwrap().unwrap().behavior, Behavior::Directory as i32);
}
