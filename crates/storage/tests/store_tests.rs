//! Integration tests for the bundle store
//!
//! These tests drive `BundleStore` through signed bundles only:
//! - chain validation (duplicates, gaps, identity conflicts)
//! - keyed, ordered, edge and name lookups, current and historical
//! - clearances, movements and retention modes
//! - reset generation, outbox, journal streaming and history dropping

use gink_core::crypto::{generate_signing_key, SigningKey};
use gink_core::proto::{
    ChangeBuilder, ClearanceBuilder, ContainerBuilder, EntryBuilder, MovementBuilder, PairBuilder,
};
use gink_core::{
    Behavior, BundleInfo, BundleWrapper, Bundler, Chain, EntryKey, Error, HasMap, MuTimestamp,
    Muid, Sealing, UserKey, Value, INT_INF,
};
use gink_storage::{BundleStore, LmdbStore, MemoryStore, StoreConfig};

// ============================================================================
// Helper Functions
// ============================================================================

const MEDALLION: i64 = (1 << 48) + 77;
const START: MuTimestamp = 1_700_000_000_000_000;

/// Writes consecutive bundles onto one chain.
struct TestChain {
    key: SigningKey,
    chain: Chain,
    identity: String,
    head: Option<BundleInfo>,
}

impl TestChain {
    fn new(medallion: i64, identity: &str) -> Self {
        Self {
            key: generate_signing_key(),
            chain: Chain::new(medallion, START),
            identity: identity.to_string(),
            head: None,
        }
    }

    fn next_timestamp(&self) -> MuTimestamp {
        self.head.as_ref().map_or(START, |h| h.timestamp + 1_000)
    }

    fn seal(&mut self, changes: Vec<ChangeBuilder>) -> BundleWrapper {
        let mut bundler = Bundler::new("test");
        for change in changes {
            bundler.add_change(change);
        }
        let wrapper = bundler
            .seal(Sealing {
                chain: self.chain,
                timestamp: self.next_timestamp(),
                previous: self.head.as_ref().map_or(0, |h| h.timestamp),
                prior_hash: self.head.as_ref().and_then(|h| h.hash),
                identity: &self.identity,
                signing_key: &self.key,
                symmetric_key: None,
            })
            .unwrap();
        self.head = Some(wrapper.info().clone());
        wrapper
    }

    /// Seal and apply, returning the bundle timestamp.
    fn commit(&mut self, store: &dyn BundleStore, changes: Vec<ChangeBuilder>) -> MuTimestamp {
        let wrapper = self.seal(changes);
        let (info, accepted) = store.apply_bundle(&wrapper, None, true).unwrap();
        assert!(accepted);
        info.timestamp
    }

    fn muid(&self, timestamp: MuTimestamp, offset: i32) -> Muid {
        Muid::new(timestamp, self.chain.medallion, offset)
    }
}

fn directory() -> Muid {
    Muid::arche(Behavior::Directory)
}

fn set_key(container: Muid, key: &str, value: impl Into<Value>) -> ChangeBuilder {
    ChangeBuilder::entry(EntryBuilder {
        behavior: Behavior::Directory as i32,
        container: Some(container.to_builder()),
        key: Some(UserKey::from(key).to_builder()),
        value: Some(value.into().to_builder()),
        ..Default::default()
    })
}

fn push(value: impl Into<Value>) -> ChangeBuilder {
    ChangeBuilder::entry(EntryBuilder {
        behavior: Behavior::Sequence as i32,
        container: Some(Muid::arche(Behavior::Sequence).to_builder()),
        value: Some(value.into().to_builder()),
        ..Default::default()
    })
}

fn value_of(entry: &EntryBuilder) -> Value {
    Value::from_builder(entry.value.as_ref().unwrap()).unwrap()
}

fn key_a() -> EntryKey {
    EntryKey::Key(UserKey::from("a"))
}

// ============================================================================
// Chain validation
// ============================================================================

mod chains {
    use super::*;

    #[test]
    fn test_duplicate_bundle_not_reapplied() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let wrapper = chain.seal(vec![set_key(directory(), "a", 1)]);
        assert!(store.apply_bundle(&wrapper, None, false).unwrap().1);
        assert!(!store.apply_bundle(&wrapper, None, false).unwrap().1);

        let has = store.get_has_map(None).unwrap();
        assert_eq!(has.get(&chain.chain), Some(START));
        assert_eq!(store.get_identity(chain.chain).unwrap().as_deref(), Some("alice"));
    }

    #[test]
    fn test_gap_is_bad_extension() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let first = chain.seal(vec![]);
        let _skipped = chain.seal(vec![]);
        let third = chain.seal(vec![]);
        store.apply_bundle(&first, None, false).unwrap();
        let err = store.apply_bundle(&third, None, false).unwrap_err();
        assert!(matches!(err, Error::BadExtension(_)));
        assert!(err.is_rejection());
    }

    #[test]
    fn test_restart_with_other_identity_conflicts() {
        let store = MemoryStore::in_memory().unwrap();
        let mut honest = TestChain::new(MEDALLION, "alice");
        let mut impostor = TestChain::new(MEDALLION, "mallory");
        store.apply_bundle(&honest.seal(vec![]), None, false).unwrap();
        let err = store
            .apply_bundle(&impostor.seal(vec![]), None, false)
            .unwrap_err();
        assert!(matches!(err, Error::IdentityConflict(_)));
    }

    #[test]
    fn test_find_chain_and_comment() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let t1 = chain.commit(&store, vec![]);
        let t2 = chain.commit(&store, vec![]);
        assert_eq!(store.find_chain(MEDALLION, t2).unwrap(), Some(chain.chain));
        assert_eq!(store.find_chain(MEDALLION, START - 1).unwrap(), None);
        assert_eq!(store.get_comment(t1, MEDALLION).unwrap().as_deref(), Some("test"));
        assert_eq!(store.get_last(chain.chain).unwrap().unwrap().timestamp, t2);
        assert!(store.get_one_bundle(t1, MEDALLION).unwrap().is_some());
        assert!(store.get_verify_key(chain.chain).unwrap().is_some());
    }

    #[test]
    fn test_bundle_infos_listing() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let times: Vec<_> = (0..3).map(|_| chain.commit(&store, vec![])).collect();
        let first_two = store.get_some_infos(1).unwrap();
        assert_eq!(first_two.len(), 2);
        assert_eq!(first_two[0].timestamp, times[0]);
        let latest = store.get_bundle_info(-1).unwrap().unwrap();
        assert_eq!(latest.timestamp, times[2]);
        assert!(store.get_bundle_info(5).unwrap().is_none());
    }
}

// ============================================================================
// Keyed containers
// ============================================================================

mod keyed {
    use super::*;

    #[test]
    fn test_latest_value_and_history() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let t1 = chain.commit(&store, vec![set_key(directory(), "a", 1)]);
        let t2 = chain.commit(&store, vec![set_key(directory(), "a", 2)]);

        let now = store.get_entry_by_key(directory(), &key_a(), INT_INF).unwrap().unwrap();
        assert_eq!(value_of(&now.builder), Value::Int(2));
        let then = store.get_entry_by_key(directory(), &key_a(), t2).unwrap().unwrap();
        assert_eq!(value_of(&then.builder), Value::Int(1));
        assert_eq!(then.address, chain.muid(t1, 1));
        assert!(store.get_entry_by_key(directory(), &key_a(), t1).unwrap().is_none());
    }

    #[test]
    fn test_keyed_entries_in_key_order() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        chain.commit(
            &store,
            vec![
                set_key(directory(), "b", 2),
                set_key(directory(), "a", 1),
                set_key(directory(), "c", 3),
            ],
        );
        let entries = store
            .get_keyed_entries(directory(), Behavior::Directory, INT_INF)
            .unwrap();
        let values: Vec<_> = entries.iter().map(|e| value_of(&e.builder)).collect();
        assert_eq!(values, vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
    }

    #[test]
    fn test_without_history_old_entries_are_deleted() {
        let store = MemoryStore::in_memory_with(StoreConfig::current_only()).unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let t1 = chain.commit(&store, vec![set_key(directory(), "a", 1)]);
        chain.commit(&store, vec![set_key(directory(), "a", 2)]);
        assert!(store.get_entry(chain.muid(t1, 1)).unwrap().is_none());
        let now = store.get_entry_by_key(directory(), &key_a(), INT_INF).unwrap().unwrap();
        assert_eq!(value_of(&now.builder), Value::Int(2));
        assert!(matches!(
            store.get_reset_changes(t1, None, None, false),
            Err(Error::RetentionConfig(_))
        ));
    }

    #[test]
    fn test_clearance_hides_earlier_entries() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        chain.commit(&store, vec![set_key(directory(), "a", 1)]);
        let cleared = chain.commit(
            &store,
            vec![ChangeBuilder::clearance(ClearanceBuilder {
                container: Some(directory().to_builder()),
                purge: false,
            })],
        );
        assert!(store
            .get_keyed_entries(directory(), Behavior::Directory, INT_INF)
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .get_keyed_entries(directory(), Behavior::Directory, cleared)
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn test_reset_restores_previous_value() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        chain.commit(&store, vec![set_key(directory(), "a", 1)]);
        let t2 = chain.commit(
            &store,
            vec![set_key(directory(), "a", 2), set_key(directory(), "b", 9)],
        );
        let changes = store
            .get_reset_changes(t2, Some(directory()), None, false)
            .unwrap();
        assert_eq!(changes.len(), 2);
        chain.commit(&store, changes);

        let a = store.get_entry_by_key(directory(), &key_a(), INT_INF).unwrap().unwrap();
        assert_eq!(value_of(&a.builder), Value::Int(1));
        let b = store
            .get_entry_by_key(directory(), &EntryKey::Key(UserKey::from("b")), INT_INF)
            .unwrap()
            .unwrap();
        assert!(b.builder.deletion);
    }

    #[test]
    fn test_reset_of_key_requires_container() {
        let store = MemoryStore::in_memory().unwrap();
        assert!(store.get_reset_changes(1, None, Some(&key_a()), false).is_err());
    }

    #[test]
    fn test_container_auto_defined_and_named() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let relative = Muid::new(0, 0, 1);
        let t = chain.commit(
            &store,
            vec![
                ChangeBuilder::container(ContainerBuilder {
                    behavior: Behavior::Directory as i32,
                }),
                ChangeBuilder::entry(EntryBuilder {
                    behavior: Behavior::Property as i32,
                    container: Some(Muid::arche(Behavior::Property).to_builder()),
                    describing: Some(relative.to_builder()),
                    value: Some(Value::from("users").to_builder()),
                    ..Default::default()
                }),
            ],
        );
        let named = store.get_by_name("users", INT_INF).unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].address, chain.muid(t, 1));
        assert_eq!(named[0].builder.behavior, Behavior::Directory as i32);
        assert!(store.get_by_name("users", t).unwrap().is_empty());

        let described = store.get_by_describing(chain.muid(t, 1), INT_INF).unwrap();
        assert_eq!(described.len(), 1);
        assert_eq!(store.list_containers().unwrap().len(), 1);
    }

    #[test]
    fn test_clearance_without_history_deletes_entries() {
        let store = MemoryStore::in_memory_with(StoreConfig::current_only()).unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let t1 = chain.commit(
            &store,
            vec![set_key(directory(), "a", 1), set_key(directory(), "b", 2)],
        );
        let cleared = chain.commit(
            &store,
            vec![ChangeBuilder::clearance(ClearanceBuilder {
                container: Some(directory().to_builder()),
                purge: false,
            })],
        );
        assert!(store.get_entry(chain.muid(t1, 1)).unwrap().is_none());
        assert!(store.get_entry(chain.muid(t1, 2)).unwrap().is_none());
        assert!(store
            .get_keyed_entries(directory(), Behavior::Directory, cleared)
            .unwrap()
            .is_empty());

        chain.commit(&store, vec![set_key(directory(), "c", 3)]);
        let entries = store
            .get_keyed_entries(directory(), Behavior::Directory, INT_INF)
            .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(value_of(&entries[0].builder), Value::Int(3));
    }
}

// ============================================================================
// Ordered containers
// ============================================================================

mod ordered {
    use super::*;

    fn remove(entry: Muid) -> ChangeBuilder {
        ChangeBuilder::movement(MovementBuilder {
            container: Some(Muid::arche(Behavior::Sequence).to_builder()),
            entry: Some(entry.to_builder()),
            dest: 0,
            purge: false,
        })
    }

    #[test]
    fn test_removal_is_historical() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let sequence = Muid::arche(Behavior::Sequence);
        let t1 = chain.commit(&store, vec![push("x"), push("y")]);
        let removal = remove(chain.muid(t1, 1));
        let t2 = chain.commit(&store, vec![removal]);

        let now = store.get_ordered_entries(sequence, INT_INF, None, 0, false).unwrap();
        assert_eq!(now.len(), 1);
        assert_eq!(value_of(&now[0].builder), Value::from("y"));
        let then = store.get_ordered_entries(sequence, t2, None, 0, false).unwrap();
        assert_eq!(then.len(), 2);
        assert!(store
            .get_positioned_entry(chain.muid(t1, 1), INT_INF)
            .unwrap()
            .is_none());
        assert!(store
            .get_positioned_entry(chain.muid(t1, 1), t2)
            .unwrap()
            .is_some());
    }

    #[test]
    fn test_move_changes_order() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let sequence = Muid::arche(Behavior::Sequence);
        let t1 = chain.commit(&store, vec![push("x")]);
        chain.commit(&store, vec![push("y")]);
        chain.commit(
            &store,
            vec![ChangeBuilder::movement(MovementBuilder {
                container: Some(sequence.to_builder()),
                entry: Some(chain.muid(t1, 1).to_builder()),
                dest: t1 + 5_000,
                purge: false,
            })],
        );
        let values: Vec<_> = store
            .get_ordered_entries(sequence, INT_INF, None, 0, false)
            .unwrap()
            .iter()
            .map(|e| value_of(&e.builder))
            .collect();
        assert_eq!(values, vec![Value::from("y"), Value::from("x")]);
    }

    #[test]
    fn test_limit_offset_descending() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let sequence = Muid::arche(Behavior::Sequence);
        for i in 0..5 {
            chain.commit(&store, vec![push(i)]);
        }
        let page = store.get_ordered_entries(sequence, INT_INF, Some(2), 1, true).unwrap();
        let values: Vec<_> = page.iter().map(|e| value_of(&e.builder)).collect();
        assert_eq!(values, vec![Value::Int(3), Value::Int(2)]);
    }

    #[test]
    fn test_drop_history_purges_removed_entries() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let t1 = chain.commit(&store, vec![push("x")]);
        let removal = remove(chain.muid(t1, 1));
        chain.commit(&store, vec![removal]);
        assert!(store.get_entry(chain.muid(t1, 1)).unwrap().is_some());
        assert_eq!(store.drop_history(None).unwrap(), 1);
        assert!(store.get_entry(chain.muid(t1, 1)).unwrap().is_none());
    }

    #[test]
    fn test_edges_by_source() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let vertex = || {
            ChangeBuilder::container(ContainerBuilder {
                behavior: Behavior::Vertex as i32,
            })
        };
        let t = chain.commit(
            &store,
            vec![
                ChangeBuilder::container(ContainerBuilder {
                    behavior: Behavior::EdgeType as i32,
                }),
                vertex(),
                vertex(),
                ChangeBuilder::entry(EntryBuilder {
                    behavior: Behavior::EdgeType as i32,
                    container: Some(Muid::new(0, 0, 1).to_builder()),
                    pair: Some(PairBuilder {
                        left: Some(Muid::new(0, 0, 2).to_builder()),
                        rite: Some(Muid::new(0, 0, 3).to_builder()),
                    }),
                    ..Default::default()
                }),
            ],
        );
        let source = chain.muid(t, 2);
        let target = chain.muid(t, 3);
        let by_source = store.get_edge_entries(INT_INF, None, Some(source), None).unwrap();
        assert_eq!(by_source.len(), 1);
        assert_eq!(by_source[0].address, chain.muid(t, 4));
        let by_type = store
            .get_edge_entries(INT_INF, Some(chain.muid(t, 1)), None, Some(target))
            .unwrap();
        assert_eq!(by_type.len(), 1);
        assert!(store
            .get_edge_entries(INT_INF, None, Some(target), Some(source))
            .unwrap()
            .is_empty());
        assert!(store.get_edge_entries(INT_INF, None, None, None).is_err());
    }

    #[test]
    fn test_move_without_history_drops_old_placement() {
        let store = MemoryStore::in_memory_with(StoreConfig::current_only()).unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let sequence = Muid::arche(Behavior::Sequence);
        let t1 = chain.commit(&store, vec![push("x")]);
        let t2 = chain.commit(&store, vec![push("y")]);
        let moved = chain.commit(
            &store,
            vec![ChangeBuilder::movement(MovementBuilder {
                container: Some(sequence.to_builder()),
                entry: Some(chain.muid(t1, 1).to_builder()),
                dest: t1 + 5_000,
                purge: false,
            })],
        );

        let values: Vec<_> = store
            .get_ordered_entries(sequence, INT_INF, None, 0, false)
            .unwrap()
            .iter()
            .map(|e| value_of(&e.builder))
            .collect();
        assert_eq!(values, vec![Value::from("y"), Value::from("x")]);
        // the original placement is gone, not just hidden
        let before_move = store.get_ordered_entries(sequence, moved, None, 0, false).unwrap();
        assert_eq!(before_move.len(), 1);
        assert_eq!(value_of(&before_move[0].builder), Value::from("y"));

        chain.commit(&store, vec![remove(chain.muid(t2, 1))]);
        assert!(store.get_entry(chain.muid(t2, 1)).unwrap().is_none());
        assert!(store.get_positioned_entry(chain.muid(t2, 1), INT_INF).unwrap().is_none());
        assert!(store.get_positioned_entry(chain.muid(t1, 1), INT_INF).unwrap().is_some());
    }
}

// ============================================================================
// Accumulators
// ============================================================================

mod accumulators {
    use super::*;

    fn add(amount: i64) -> ChangeBuilder {
        ChangeBuilder::entry(EntryBuilder {
            behavior: Behavior::Accumulator as i32,
            container: Some(Muid::arche(Behavior::Accumulator).to_builder()),
            value: Some(Value::Int(amount).to_builder()),
            ..Default::default()
        })
    }

    #[test]
    fn test_totals_current_and_past() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let accumulator = Muid::arche(Behavior::Accumulator);
        chain.commit(&store, vec![add(5_000_000_000)]);
        let t2 = chain.commit(&store, vec![add(-2_000_000_000)]);
        assert_eq!(store.get_billionths(accumulator, INT_INF).unwrap(), 3_000_000_000);
        assert_eq!(store.get_billionths(accumulator, t2).unwrap(), 5_000_000_000);

        let changes = store
            .get_reset_changes(t2, Some(accumulator), None, false)
            .unwrap();
        assert_eq!(changes.len(), 1);
        chain.commit(&store, changes);
        assert_eq!(store.get_billionths(accumulator, INT_INF).unwrap(), 5_000_000_000);
    }
}

// ============================================================================
// Journal and outbox
// ============================================================================

mod journal {
    use super::*;

    #[test]
    fn test_get_bundles_skips_what_peer_has() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let first = chain.seal(vec![]);
        let second = chain.seal(vec![]);
        store.apply_bundle(&first, None, false).unwrap();
        store.apply_bundle(&second, None, false).unwrap();

        let mut peer = HasMap::new();
        peer.mark_as_having(first.info());
        let mut sent = Vec::new();
        store
            .get_bundles(
                &mut |b: &BundleWrapper| {
                    sent.push(b.info().timestamp);
                    Ok(())
                },
                Some(&peer),
                None,
            )
            .unwrap();
        assert_eq!(sent, vec![second.info().timestamp]);

        let mut limit = HasMap::new();
        limit.mark_as_having(first.info());
        let mut limited = 0;
        store
            .get_bundles(
                &mut |_: &BundleWrapper| {
                    limited += 1;
                    Ok(())
                },
                None,
                Some(&limit),
            )
            .unwrap();
        assert_eq!(limited, 1);
    }

    #[test]
    fn test_bundles_require_retention() {
        let store = MemoryStore::in_memory_with(StoreConfig::current_only()).unwrap();
        let result = store.get_bundles(&mut |_: &BundleWrapper| Ok(()), None, None);
        assert!(matches!(result, Err(Error::RetentionConfig(_))));
    }

    #[test]
    fn test_outbox_until_acknowledged() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let local = chain.seal(vec![]);
        store.apply_bundle(&local, None, true).unwrap();
        let pending = store.read_through_outbox().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.get_claims().unwrap().len(), 1);
        store.remove_from_outbox(&[local.info().clone()]).unwrap();
        assert!(store.read_through_outbox().unwrap().is_empty());
    }

    #[test]
    fn test_callback_sees_new_bundles_only() {
        let store = MemoryStore::in_memory().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let wrapper = chain.seal(vec![]);
        let mut seen = 0;
        store
            .apply_bundle(&wrapper, Some(&mut |_: &BundleWrapper| seen += 1), false)
            .unwrap();
        store
            .apply_bundle(&wrapper, Some(&mut |_: &BundleWrapper| seen += 1), false)
            .unwrap();
        assert_eq!(seen, 1);
        assert_eq!(store.refresh(None).unwrap(), 0);
    }

    #[test]
    fn test_keys_round_trip() {
        let store = MemoryStore::in_memory().unwrap();
        let signing = generate_signing_key();
        store.save_signing_key(&signing).unwrap();
        let found = store.get_signing_key(&signing.verifying_key()).unwrap().unwrap();
        assert_eq!(found.to_bytes(), signing.to_bytes());

        let symmetric = [7u8; 32];
        let id = store.save_symmetric_key(&symmetric).unwrap();
        assert_eq!(store.get_symmetric_key(id).unwrap(), Some(symmetric.to_vec()));
        assert!(store.save_symmetric_key(&[1, 2, 3]).is_err());
        assert_eq!(store.get_symmetric_key(id + 1).unwrap(), None);
        assert!(matches!(
            store.get_symmetric_key(u64::MAX),
            Err(gink_core::Error::CryptoError(_))
        ));
    }
}

// ============================================================================
// Durable backend
// ============================================================================

mod lmdb {
    use super::*;

    #[test]
    fn test_reopen_keeps_entries_and_retention() {
        let dir = tempfile::tempdir().unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        {
            let store =
                LmdbStore::open(dir.path(), StoreConfig::for_testing().with_retain_entries(false))
                    .unwrap();
            chain.commit(&store, vec![set_key(directory(), "a", 1)]);
        }
        let store = LmdbStore::open(dir.path(), StoreConfig::for_testing()).unwrap();
        assert!(!store.get_retentions().unwrap().entries);
        let found = store.get_entry_by_key(directory(), &key_a(), INT_INF).unwrap().unwrap();
        assert_eq!(value_of(&found.builder), Value::Int(1));
        chain.commit(&store, vec![set_key(directory(), "a", 2)]);
        assert_eq!(store.kind(), "lmdb");
    }

    #[test]
    fn test_history_toggle() {
        let dir = tempfile::tempdir().unwrap();
        let store = LmdbStore::open(dir.path(), StoreConfig::for_testing()).unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        let t1 = chain.commit(&store, vec![set_key(directory(), "a", 1)]);
        chain.commit(&store, vec![set_key(directory(), "a", 2)]);
        assert!(store.get_entry(chain.muid(t1, 1)).unwrap().is_some());
        store.stop_history().unwrap();
        assert!(store.get_entry(chain.muid(t1, 1)).unwrap().is_none());
        store.start_history().unwrap();
        assert!(store.get_retentions().unwrap().entries);
    }

    #[test]
    fn test_failed_apply_keeps_bundles_from_other_writers() {
        let dir = tempfile::tempdir().unwrap();
        let writer = LmdbStore::open(dir.path(), StoreConfig::for_testing()).unwrap();
        let reader = LmdbStore::open(dir.path(), StoreConfig::for_testing()).unwrap();
        let mut chain = TestChain::new(MEDALLION, "alice");
        chain.commit(&writer, vec![set_key(directory(), "a", 1)]);

        // second bundle of a chain whose start never arrived
        let mut stranger = TestChain::new(MEDALLION + 1, "bob");
        stranger.seal(vec![]);
        let gap = stranger.seal(vec![set_key(directory(), "b", 2)]);
        let mut seen = 0;
        let result = reader.apply_bundle(&gap, Some(&mut |_: &BundleWrapper| seen += 1), false);
        assert!(matches!(result, Err(Error::BadExtension(_))));
        assert_eq!(seen, 0);

        let mut refreshed = Vec::new();
        let count = reader
            .refresh(Some(&mut |w: &BundleWrapper| refreshed.push(w.info().clone())))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(refreshed[0].chain(), chain.chain);
        assert_eq!(reader.refresh(None).unwrap(), 0);
    }
}
