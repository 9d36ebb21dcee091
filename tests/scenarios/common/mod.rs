//! Shared helpers for the end-to-end scenarios.

#![allow(dead_code)]

use std::time::{Duration, Instant};

use gink::core::crypto::{generate_signing_key, SigningKey};
use gink::core::proto::{ChangeBuilder, EntryBuilder};
use gink::core::{BundleInfo, BundleWrapper, Bundler, Chain, MuTimestamp, Sealing};
use gink::{Behavior, Database, Muid, UserKey, Value};

pub const START: MuTimestamp = 1_700_000_000_000_000;

/// Hand-driven chain for feeding bundles straight into a store.
pub struct TestChain {
    pub key: SigningKey,
    pub chain: Chain,
    pub head: Option<BundleInfo>,
}

impl TestChain {
    pub fn new(medallion: i64) -> Self {
        Self {
            key: generate_signing_key(),
            chain: Chain::new(medallion, START),
            head: None,
        }
    }

    /// Seal `changes` with explicit timestamps.
    pub fn seal_at(
        &self,
        timestamp: MuTimestamp,
        previous: MuTimestamp,
        changes: Vec<ChangeBuilder>,
    ) -> BundleWrapper {
        let mut bundler = Bundler::new("scenario");
        for change in changes {
            bundler.add_change(change);
        }
        bundler
            .seal(Sealing {
                chain: self.chain,
                timestamp,
                previous,
                prior_hash: self.head.as_ref().and_then(|h| h.hash),
                identity: "scenario",
                signing_key: &self.key,
                symmetric_key: None,
            })
            .unwrap()
    }

    /// Seal the next bundle on the chain and advance the head.
    pub fn seal(&mut self, changes: Vec<ChangeBuilder>) -> BundleWrapper {
        let timestamp = self.head.as_ref().map_or(START, |h| h.timestamp + 1_000);
        let previous = self.head.as_ref().map_or(0, |h| h.timestamp);
        let wrapper = self.seal_at(timestamp, previous, changes);
        self.head = Some(wrapper.info().clone());
        wrapper
    }
}

/// Entry putting `value` under `key` in the global directory.
pub fn directory_set(key: &str, value: impl Into<Value>) -> ChangeBuilder {
    ChangeBuilder::entry(EntryBuilder {
        behavior: Behavior::Directory as i32,
        container: Some(Muid::arche(Behavior::Directory).to_builder()),
        key: Some(UserKey::from(key).to_builder()),
        value: Some(value.into().to_builder()),
        ..Default::default()
    })
}

/// Alternate loop iterations on every database until `done` holds.
pub fn drive_until(dbs: &[&Database], mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        for db in dbs {
            db.relay().run_once(Duration::from_millis(1));
        }
        if done() {
            return true;
        }
    }
    false
}

/// Chain heads of two databases agree.
pub fn has_maps_match(a: &Database, b: &Database) -> bool {
    a.store().get_has_map(None).unwrap() == b.store().get_has_map(None).unwrap()
}
