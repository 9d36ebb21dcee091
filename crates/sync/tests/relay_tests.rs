//! Integration tests for peer synchronization
//!
//! Two relays over in-memory stores talk through real loopback sockets,
//! driven alternately from the test thread.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use gink_core::crypto::{generate_signing_key, SigningKey};
use gink_core::proto::{ChangeBuilder, ConnectRequest, EntryBuilder};
use gink_core::{
    Behavior, BundleInfo, BundleWrapper, Bundler, Chain, EntryKey, MuTimestamp, Muid, Sealing,
    UserKey, Value, INT_INF,
};
use gink_storage::{BundleStore, MemoryStore};
use gink_sync::{Permissions, Relay, RelayOptions};

// ============================================================================
// Helper Functions
// ============================================================================

const START: MuTimestamp = 1_700_000_000_000_000;

struct TestChain {
    key: SigningKey,
    chain: Chain,
    head: Option<BundleInfo>,
}

impl TestChain {
    fn new(medallion: i64) -> Self {
        Self {
            key: generate_signing_key(),
            chain: Chain::new(medallion, START),
            head: None,
        }
    }

    fn seal(&mut self, key: &str, value: &str) -> BundleWrapper {
        let mut bundler = Bundler::new("relay test");
        bundler.add_change(ChangeBuilder::entry(EntryBuilder {
            behavior: Behavior::Directory as i32,
            container: Some(Muid::arche(Behavior::Directory).to_builder()),
            key: Some(UserKey::from(key).to_builder()),
            value: Some(Value::from(value).to_builder()),
            ..Default::default()
        }));
        let wrapper = bundler
            .seal(Sealing {
                chain: self.chain,
                timestamp: self.head.as_ref().map_or(START, |h| h.timestamp + 1_000),
                previous: self.head.as_ref().map_or(0, |h| h.timestamp),
                prior_hash: self.head.as_ref().and_then(|h| h.hash),
                identity: "tester",
                signing_key: &self.key,
                symmetric_key: None,
            })
            .unwrap();
        self.head = Some(wrapper.info().clone());
        wrapper
    }
}

fn new_relay() -> Relay {
    let store: Arc<dyn BundleStore> = Arc::new(MemoryStore::in_memory().unwrap());
    Relay::new(store).unwrap()
}

fn lookup(relay: &Relay, key: &str) -> Option<Value> {
    let found = relay
        .store()
        .get_entry_by_key(
            Muid::arche(Behavior::Directory),
            &EntryKey::Key(UserKey::from(key)),
            INT_INF,
        )
        .unwrap()?;
    found
        .builder
        .value
        .as_ref()
        .map(|v| Value::from_builder(v).unwrap())
}

/// Alternate loop iterations until `done` holds; false on timeout.
fn drive_until(relays: &[&Relay], mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        for relay in relays {
            relay.run_once(Duration::from_millis(1));
        }
        if done() {
            return true;
        }
    }
    false
}

fn has_maps_match(a: &Relay, b: &Relay) -> bool {
    a.store().get_has_map(None).unwrap() == b.store().get_has_map(None).unwrap()
}

/// `server` listens on loopback; `client` connects to it.
fn link(server: &Relay, client: &Relay) {
    let addr = server.start_listening("127.0.0.1", 0).unwrap();
    client
        .connect_to(&format!("127.0.0.1:{}", addr.port()), None)
        .unwrap();
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_greeting_streams_missing_bundles() {
    let a = new_relay();
    let b = new_relay();
    let mut chain = TestChain::new((1 << 48) + 1);
    a.receive(&chain.seal("hello", "world"), true).unwrap();
    a.receive(&chain.seal("color", "blue"), true).unwrap();

    link(&a, &b);
    assert!(drive_until(&[&a, &b], || has_maps_match(&a, &b)));
    assert_eq!(lookup(&b, "hello"), Some(Value::from("world")));
    assert_eq!(lookup(&b, "color"), Some(Value::from("blue")));
}

#[test]
fn test_new_bundles_reach_connected_peers_and_get_acked() {
    let a = new_relay();
    let b = new_relay();
    let mut chain = TestChain::new((1 << 48) + 2);
    a.receive(&chain.seal("first", "1"), true).unwrap();
    link(&a, &b);
    assert!(drive_until(&[&a, &b], || has_maps_match(&a, &b)));
    assert!(drive_until(&[&a, &b], || a.not_acked() == 0));

    assert!(a.receive(&chain.seal("second", "2"), true).unwrap());
    assert_eq!(a.not_acked(), 1);
    assert!(drive_until(&[&a, &b], || lookup(&b, "second").is_some()));
    assert!(drive_until(&[&a, &b], || a.not_acked() == 0));
    assert!(a.store().read_through_outbox().unwrap().is_empty());
}

#[test]
fn test_bundles_are_not_echoed_to_their_sender() {
    let a = new_relay();
    let b = new_relay();
    let mut chain = TestChain::new((1 << 48) + 3);
    a.receive(&chain.seal("k", "v"), true).unwrap();
    link(&a, &b);
    assert!(drive_until(&[&a, &b], || has_maps_match(&a, &b)));
    assert!(drive_until(&[&a, &b], || a.not_acked() == 0));

    let a_side = a.connection_ids()[0];
    let b_side = b.connection_ids()[0];
    let a_stats = a.connection_stats(a_side).unwrap();
    let b_stats = b.connection_stats(b_side).unwrap();
    assert_eq!(a_stats.bundles_sent, 1);
    assert_eq!(a_stats.bundles_received, 0);
    assert_eq!(b_stats.bundles_received, 1);
    assert_eq!(b_stats.bundles_sent, 0);
}

#[test]
fn test_both_directions_converge() {
    let a = new_relay();
    let b = new_relay();
    let mut on_a = TestChain::new((1 << 48) + 4);
    let mut on_b = TestChain::new((1 << 48) + 5);
    a.receive(&on_a.seal("from", "a"), true).unwrap();
    b.receive(&on_b.seal("other", "b"), true).unwrap();
    link(&a, &b);
    assert!(drive_until(&[&a, &b], || has_maps_match(&a, &b)
        && a.store().get_has_map(None).unwrap().len() == 2));
    assert_eq!(lookup(&a, "other"), Some(Value::from("b")));
    assert_eq!(lookup(&b, "from"), Some(Value::from("a")));
}

#[test]
fn test_callbacks_see_bundles_from_peers() {
    let a = new_relay();
    let b = new_relay();
    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    b.add_callback(move |_: &BundleWrapper| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let mut chain = TestChain::new((1 << 48) + 6);
    a.receive(&chain.seal("x", "y"), true).unwrap();
    link(&a, &b);
    assert!(drive_until(&[&a, &b], || seen.load(Ordering::SeqCst) == 1));
}

#[test]
fn test_write_denied_peer_is_ignored() {
    let read_only = RelayOptions {
        auth_func: Arc::new(|_: &ConnectRequest| Permissions::READ),
        sync_func: None,
    };
    let store: Arc<dyn BundleStore> = Arc::new(MemoryStore::in_memory().unwrap());
    let a = Relay::with_options(store, read_only).unwrap();
    let b = new_relay();
    let mut on_a = TestChain::new((1 << 48) + 7);
    let mut on_b = TestChain::new((1 << 48) + 8);
    a.receive(&on_a.seal("served", "yes"), true).unwrap();
    b.receive(&on_b.seal("pushed", "no"), true).unwrap();
    link(&a, &b);

    assert!(drive_until(&[&a, &b], || lookup(&b, "served").is_some()));
    let deadline = Instant::now() + Duration::from_millis(100);
    while Instant::now() < deadline {
        a.run_once(Duration::from_millis(1));
        b.run_once(Duration::from_millis(1));
    }
    assert_eq!(lookup(&a, "pushed"), None);
    assert_eq!(b.not_acked(), 1);
}

#[test]
fn test_refused_peer_is_disconnected() {
    let refuse = RelayOptions {
        auth_func: Arc::new(|_: &ConnectRequest| Permissions::NONE),
        sync_func: None,
    };
    let store: Arc<dyn BundleStore> = Arc::new(MemoryStore::in_memory().unwrap());
    let a = Relay::with_options(store, refuse).unwrap();
    let b = new_relay();
    link(&a, &b);
    assert!(drive_until(&[&a, &b], || b.connection_count() == 0
        && a.connection_count() == 0
        && a.store().get_has_map(None).unwrap().is_empty()));
}

#[test]
fn test_reconnect_after_disconnect_catches_up() {
    let a = new_relay();
    let b = new_relay();
    let mut on_a = TestChain::new((1 << 48) + 9);
    let mut on_b = TestChain::new((1 << 48) + 10);
    a.receive(&on_a.seal("hello", "world"), true).unwrap();
    let addr = a.start_listening("127.0.0.1", 0).unwrap();
    let target = format!("127.0.0.1:{}", addr.port());
    let first = b.connect_to(&target, None).unwrap();
    assert!(drive_until(&[&a, &b], || lookup(&b, "hello").is_some()));

    assert!(b.disconnect(first));
    assert!(drive_until(&[&a, &b], || a.connection_count() == 0
        && b.connection_count() == 0));
    b.receive(&on_b.seal("warm", "up"), true).unwrap();
    b.receive(&on_b.seal("hello", "universe"), true).unwrap();
    assert_eq!(lookup(&a, "hello"), Some(Value::from("world")));

    b.connect_to(&target, Some(b"token")).unwrap();
    assert!(drive_until(&[&a, &b], || has_maps_match(&a, &b)));
    assert_eq!(lookup(&a, "hello"), Some(Value::from("universe")));
}
