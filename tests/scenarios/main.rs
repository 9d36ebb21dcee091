//! End-to-end scenarios
//!
//! Each test drives a full database (store, chain manager, relay and
//! container facades) the way an application would.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::Duration;

use proptest::prelude::*;

use common::{directory_set, drive_until, has_maps_match, TestChain, START};
use gink::core::{BundleWrapper, EntryKey, INT_INF};
use gink::{
    BoxContainer, Container, Contents, Database, Directory, Error, GenericTimestamp, Muid,
    Sequence, UserKey, Value, NOW,
};

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_box_history() {
    let db = Database::in_memory().unwrap();
    let global = BoxContainer::arche(&db);
    global.set("first", None).unwrap();
    global.set("second", None).unwrap();
    global.set("third", None).unwrap();

    assert_eq!(global.get(NOW).unwrap(), Some(Contents::from("third")));
    assert_eq!(global.get(-1).unwrap(), Some(Contents::from("second")));
    assert_eq!(global.get(-2).unwrap(), Some(Contents::from("first")));
}

#[test]
fn test_directory_reset() {
    let db = Database::in_memory().unwrap();
    let root = Directory::arche(&db);
    let nested = Directory::create(&db, None).unwrap();
    nested.set("cheese", "wiz", None).unwrap();
    root.set("foo", "bar", None).unwrap();
    root.set("bar", "foo", None).unwrap();
    root.set(7, nested.muid(), None).unwrap();
    let mark = db.now();

    root.set("foo", "zoo", None).unwrap();
    root.set(99, 30, None).unwrap();
    assert!(root.reset(mark, None, true, None).unwrap() > 0);

    assert_eq!(root.get("foo", NOW).unwrap(), Some(Contents::from("bar")));
    assert!(!root.keys(NOW).unwrap().contains(&UserKey::from(99)));
    assert_eq!(root.get(7, NOW).unwrap(), Some(Contents::Container(nested.muid())));
    assert_eq!(nested.get("cheese", NOW).unwrap(), Some(Contents::from("wiz")));
}

#[test]
fn test_sequence_move() {
    let db = Database::in_memory().unwrap();
    let seq = Sequence::arche(&db);
    for item in ["a", "b", "c", "x", "y", "z"] {
        seq.append(item, None).unwrap();
    }

    let moved = seq.pop(5, Some(GenericTimestamp::Int(1)), None).unwrap();
    assert_eq!(moved, Some(Contents::from("z")));

    let expected: Vec<Contents> = ["a", "z", "b", "c", "x", "y"].into_iter().map(Contents::from).collect();
    assert_eq!(seq.values(NOW).unwrap(), expected);
    let mut reversed = expected.clone();
    reversed.reverse();
    assert_eq!(seq.values_reversed(NOW).unwrap(), reversed);
}

#[test]
fn test_expiry() {
    let db = Database::in_memory().unwrap();
    let seq = Sequence::arche(&db);
    seq.append_expiring("brief", 0.1, None).unwrap();
    seq.append_expiring("longer", 0.3, None).unwrap();
    seq.append("kept", None).unwrap();
    seq.append("also kept", None).unwrap();

    let values = |names: &[&str]| -> Vec<Contents> { names.iter().map(|n| Contents::from(*n)).collect() };
    assert_eq!(seq.values(NOW).unwrap(), values(&["brief", "longer", "kept", "also kept"]));

    sleep(Duration::from_millis(110));
    assert_eq!(seq.values(NOW).unwrap(), values(&["longer", "kept", "also kept"]));

    sleep(Duration::from_millis(200));
    assert_eq!(seq.values(NOW).unwrap(), values(&["kept", "also kept"]));
}

#[test]
fn test_two_peer_sync() {
    let a = Database::in_memory().unwrap();
    let b = Database::in_memory().unwrap();
    Directory::arche(&a).set("hello", "world", None).unwrap();

    let addr = a.start_listening("127.0.0.1", 0).unwrap();
    let target = format!("127.0.0.1:{}", addr.port());
    let link = b.connect_to(&target).unwrap();
    let on_b = Directory::arche(&b);
    assert!(drive_until(&[&a, &b], || {
        on_b.get("hello", NOW).unwrap() == Some(Contents::from("world"))
    }));

    assert!(b.relay().disconnect(link));
    on_b.set("hello", "universe", None).unwrap();
    let on_a = Directory::arche(&a);
    assert_eq!(on_a.get("hello", NOW).unwrap(), Some(Contents::from("world")));

    b.connect_to(&target).unwrap();
    assert!(drive_until(&[&a, &b], || {
        on_a.get("hello", NOW).unwrap() == Some(Contents::from("universe"))
    }));
}

#[test]
fn test_bad_extension_rejected() {
    let db = Database::in_memory().unwrap();
    let store = db.store();
    let mut chain = TestChain::new((1 << 48) + 42);
    store
        .apply_bundle(&chain.seal(vec![directory_set("k", "start")]), None, false)
        .unwrap();

    let head = chain.seal_at(START + 456, START, vec![directory_set("k", "head")]);
    store.apply_bundle(&head, None, false).unwrap();
    chain.head = Some(head.info().clone());

    let stray = chain.seal_at(START + 1_000, START + 777, vec![directory_set("k", "stray")]);
    assert!(matches!(
        store.apply_bundle(&stray, None, false),
        Err(Error::BadExtension(_))
    ));
    assert_eq!(
        store.get_has_map(None).unwrap().get(&chain.chain),
        Some(START + 456)
    );
    assert_eq!(
        Directory::arche(&db).get("k", NOW).unwrap(),
        Some(Contents::from("head"))
    );
}

// ============================================================================
// Properties
// ============================================================================

#[test]
fn test_apply_is_idempotent() {
    let db = Database::in_memory().unwrap();
    let mut chain = TestChain::new((1 << 48) + 7);
    let wrapper = chain.seal(vec![directory_set("once", 1)]);

    let (_, accepted) = db.store().apply_bundle(&wrapper, None, false).unwrap();
    assert!(accepted);
    let has_before = db.store().get_has_map(None).unwrap();
    let items_before = Directory::arche(&db).items(NOW).unwrap();

    let (_, accepted) = db.store().apply_bundle(&wrapper, None, false).unwrap();
    assert!(!accepted);
    assert_eq!(db.store().get_has_map(None).unwrap(), has_before);
    assert_eq!(Directory::arche(&db).items(NOW).unwrap(), items_before);
}

#[test]
fn test_chain_head_is_latest_accepted() {
    let db = Database::in_memory().unwrap();
    let mut chain = TestChain::new((1 << 48) + 8);
    let mut latest = 0;
    for i in 0..5 {
        let wrapper = chain.seal(vec![directory_set("n", i as i64)]);
        latest = wrapper.info().timestamp;
        db.store().apply_bundle(&wrapper, None, false).unwrap();
    }
    // an older timestamp can't extend the chain
    let behind = chain.seal_at(latest - 1, latest, vec![directory_set("n", -1)]);
    assert!(!matches!(
        db.store().apply_bundle(&behind, None, false),
        Ok((_, true))
    ));
    assert_eq!(db.store().get_has_map(None).unwrap().get(&chain.chain), Some(latest));
}

#[test]
fn test_peers_converge_without_echo() {
    let a = Database::in_memory().unwrap();
    let b = Database::in_memory().unwrap();
    let root_a = Directory::arche(&a);
    root_a.set("one", 1, None).unwrap();
    root_a.set("two", 2, None).unwrap();

    let received = Arc::new(AtomicUsize::new(0));
    let counter = received.clone();
    b.add_callback(move |_: &BundleWrapper| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let addr = a.start_listening("127.0.0.1", 0).unwrap();
    let link = b.connect_to(&format!("127.0.0.1:{}", addr.port())).unwrap();
    assert!(drive_until(&[&a, &b], || has_maps_match(&a, &b)));
    assert!(drive_until(&[&a, &b], || a.relay().not_acked() == 0));

    // chain start plus two writes
    assert_eq!(received.load(Ordering::SeqCst), 3);
    let root = Muid::arche(gink::Behavior::Directory);
    for key in ["one", "two"] {
        let key = EntryKey::Key(UserKey::from(key));
        let on_a = a.store().get_entry_by_key(root, &key, INT_INF).unwrap();
        let on_b = b.store().get_entry_by_key(root, &key, INT_INF).unwrap();
        assert_eq!(on_a.map(|f| f.address), on_b.map(|f| f.address));
    }
    let stats = b.relay().connection_stats(link).unwrap();
    assert_eq!(stats.bundles_received, 3);
    assert_eq!(stats.bundles_sent, 0);
}

#[test]
fn test_clearance_hides_older_entries() {
    let db = Database::in_memory().unwrap();
    let root = Directory::arche(&db);
    root.set("a", 1, None).unwrap();
    root.set("b", 2, None).unwrap();
    let before_clear = db.now();
    root.clear(false, None).unwrap();
    let after_clear = db.now();
    root.set("c", 3, None).unwrap();

    assert_eq!(root.size(before_clear).unwrap(), 2);
    assert_eq!(root.size(after_clear).unwrap(), 0);
    assert_eq!(
        root.items(NOW).unwrap(),
        vec![(UserKey::from("c"), Contents::from(3))]
    );
    assert_eq!(root.get("a", NOW).unwrap(), None);
}

#[test]
fn test_values_and_keys_are_typed() {
    let db = Database::in_memory().unwrap();
    let root = Directory::arche(&db);
    root.set(-5, Value::Float(2.5), None).unwrap();
    root.set(b"raw".to_vec(), vec![0u8, 1, 2], None).unwrap();
    assert_eq!(root.get(-5, NOW).unwrap(), Some(Contents::Value(Value::Float(2.5))));
    assert_eq!(
        root.get(UserKey::Octets(b"raw".to_vec()), NOW).unwrap(),
        Some(Contents::from(vec![0u8, 1, 2]))
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_reset_restores_observable_state(
        before in prop::collection::vec((0u8..4, prop::option::of(0i64..100)), 1..6),
        after in prop::collection::vec((0u8..4, prop::option::of(0i64..100)), 1..6),
    ) {
        let db = Database::in_memory().unwrap();
        let root = Directory::arche(&db);
        let apply = |ops: &[(u8, Option<i64>)]| {
            for (key, value) in ops {
                let key = format!("k{key}");
                match value {
                    Some(v) => root.set(key.as_str(), *v, None).unwrap(),
                    None => root.delete(key.as_str(), false, None).unwrap(),
                };
            }
        };
        apply(&before);
        let mark = db.now();
        let expected = root.items(mark).unwrap();
        apply(&after);

        root.reset(mark, None, true, None).unwrap();
        prop_assert_eq!(root.items(NOW).unwrap(), expected);
    }
}
