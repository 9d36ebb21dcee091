//! Database struct: chain management and the write path
//!
//! A [`Database`] ties a bundle store to a [`Relay`] and owns the chain this
//! process appends to:
//!
//! - The first commit claims a chain: one left behind by an exited process
//!   with the same identity, or a fresh one whose starting bundle records
//!   the identity, the verify key and process details in the chain's
//!   personal directory.
//! - Every commit seals its bundler onto the chain head under a single
//!   writer lock, so a process never forks its own chain.
//! - Sealed bundles go through the relay, which applies them and forwards
//!   them to peers and callbacks.
//!
//! ## Example
//!
//! ```text
//! let db = Database::in_memory()?;
//! let root = Directory::arche(&db);
//! root.set("hello", "world", None)?;
//! assert_eq!(root.get("hello", NOW)?, Some(Contents::from("world")));
//! ```

mod builder;

pub use builder::DatabaseBuilder;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, info, warn};

use gink_core::crypto::{generate_signing_key, SigningKey};
use gink_core::proto::{ChangeBuilder, EntryBuilder};
use gink_core::{
    Behavior, BundleInfo, BundleWrapper, Bundler, Chain, EntryKey, Error, FoundContainer,
    Medallion, MuTimestamp, Muid, Result, Sealing, UserKey, Value,
};
use gink_storage::BundleStore;
use gink_sync::{ConnectionId, Relay};

use crate::attribution::Attribution;
use crate::clock::{Clock, GenericTimestamp};
use crate::config::GinkConfig;

/// Comment of every chain-starting bundle.
pub const STARTING_CHAIN: &str = "(starting chain)";

/// Fresh medallions are drawn from `MEDALLION_MIN..=MEDALLION_MAX`.
pub const MEDALLION_MIN: Medallion = (1 << 48) + 1;
/// See [`MEDALLION_MIN`].
pub const MEDALLION_MAX: Medallion = (1 << 49) - 1;

// Bounds used to guess what a bare number means.
const MICROS_LOW: i64 = 1_671_697_316_392_367;
const MICROS_HIGH: i64 = 2_147_483_648_000_000;
const SECONDS_LOW: i64 = 1_671_697_630;
const SECONDS_HIGH: i64 = 2_147_483_648;
const RELATIVE_LIMIT: i64 = 1_000_000;

/// Head of the chain this process appends to.
struct ChainLink {
    head: BundleInfo,
    signing_key: SigningKey,
}

struct Inner {
    store: Arc<dyn BundleStore>,
    relay: Relay,
    config: GinkConfig,
    data_dir: Option<PathBuf>,
    clock: Clock,
    symmetric_key: Option<Vec<u8>>,
    /// Writer critical section; `None` until the first commit.
    writer: Mutex<Option<ChainLink>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.relay.close();
    }
}

/// A store, the chain this process writes to, and its peers. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("store", &self.inner.store.kind())
            .field("data_dir", &self.inner.data_dir)
            .field("chain", &self.chain())
            .finish()
    }
}

impl Database {
    /// Builder for databases with non-default settings.
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    /// Ephemeral database with default settings.
    pub fn in_memory() -> Result<Self> {
        DatabaseBuilder::new().open()
    }

    /// Open (creating if needed) the durable database in directory `path`.
    ///
    /// Settings come from `gink.toml` in that directory, written with
    /// defaults on first open.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        DatabaseBuilder::new().path(path.as_ref()).open()
    }

    pub(crate) fn assemble(
        store: Arc<dyn BundleStore>,
        relay: Relay,
        config: GinkConfig,
        data_dir: Option<PathBuf>,
        symmetric_key: Option<Vec<u8>>,
    ) -> Result<Self> {
        if let Some(key) = &symmetric_key {
            store.save_symmetric_key(key)?;
        }
        let db = Database {
            inner: Arc::new(Inner {
                store,
                relay,
                config,
                data_dir,
                clock: Clock::new(),
                symmetric_key,
                writer: Mutex::new(None),
            }),
        };
        info!(store = db.inner.store.kind(), identity = %db.identity(), "database opened");
        db.start_sync()?;
        Ok(db)
    }

    fn start_sync(&self) -> Result<()> {
        let sync = &self.inner.config.sync;
        if sync.listen {
            self.start_listening(&sync.address, sync.port)?;
        }
        for peer in &sync.peers {
            if let Err(e) = self.connect_to(peer) {
                warn!(peer = %peer, error = %e, "could not reach configured peer");
            }
        }
        Ok(())
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<dyn BundleStore> {
        &self.inner.store
    }

    /// The relay bundles flow through.
    pub fn relay(&self) -> &Relay {
        &self.inner.relay
    }

    /// Settings this database was opened with.
    pub fn config(&self) -> &GinkConfig {
        &self.inner.config
    }

    /// Directory of a durable database.
    pub fn data_dir(&self) -> Option<&Path> {
        self.inner.data_dir.as_deref()
    }

    /// Identity recorded by chains this database starts.
    pub fn identity(&self) -> String {
        if self.inner.config.identity.is_empty() {
            default_identity()
        } else {
            self.inner.config.identity.clone()
        }
    }

    /// The chain being appended to, once something has been committed.
    pub fn chain(&self) -> Option<Chain> {
        self.inner.writer.lock().as_ref().map(|link| link.head.chain())
    }

    /// Current time; never the same value twice.
    pub fn now(&self) -> MuTimestamp {
        self.inner.clock.now()
    }

    /// Translate a loose notion of time into microseconds.
    ///
    /// - `Now`: the current time
    /// - a muid: its timestamp
    /// - numbers that look like microseconds or seconds since the epoch
    ///   are taken as such
    /// - small integers index the bundle journal: `0` is the first bundle,
    ///   `-1` the latest; reading as of that time shows the state right
    ///   before that bundle
    /// - small floats are offsets in seconds from now
    pub fn resolve_timestamp(&self, when: impl Into<GenericTimestamp>) -> Result<MuTimestamp> {
        match when.into() {
            GenericTimestamp::Now => Ok(self.now()),
            GenericTimestamp::Muid(muid) => Ok(muid.timestamp),
            GenericTimestamp::Int(t) if MICROS_LOW < t && t < MICROS_HIGH => Ok(t),
            GenericTimestamp::Int(t) if SECONDS_LOW < t && t < SECONDS_HIGH => Ok(t * 1_000_000),
            GenericTimestamp::Int(t) if -RELATIVE_LIMIT < t && t < RELATIVE_LIMIT => self
                .inner
                .store
                .get_bundle_info(t)?
                .map(|info| info.timestamp)
                .ok_or_else(|| Error::NotFound(format!("no bundle at index {t}"))),
            GenericTimestamp::Float(t) if (MICROS_LOW as f64) < t && t < (MICROS_HIGH as f64) => {
                Ok(t as i64)
            }
            GenericTimestamp::Float(t) if (SECONDS_LOW as f64) < t && t < (SECONDS_HIGH as f64) => {
                Ok((t * 1e6) as i64)
            }
            GenericTimestamp::Float(t) if (-RELATIVE_LIMIT as f64) < t && t < (RELATIVE_LIMIT as f64) => {
                Ok(self.now() + (t * 1e6) as i64)
            }
            other => Err(Error::InvalidOperation(format!(
                "don't know how to resolve {other:?} into a timestamp"
            ))),
        }
    }

    /// Empty bundler for grouping changes into one commit.
    pub fn start_bundle(&self, comment: impl Into<String>) -> Bundler {
        Bundler::new(comment)
    }

    /// Seal `bundler` onto this process's chain and apply it.
    pub fn commit(&self, bundler: Bundler) -> Result<BundleInfo> {
        let identity = self.identity();
        let mut writer = self.inner.writer.lock();
        if writer.is_none() {
            *writer = Some(self.acquire_chain(&identity)?);
        }
        let Some(link) = writer.as_mut() else {
            return Err(Error::InvalidOperation("no chain to commit to".to_string()));
        };
        let timestamp = self.inner.clock.now_after(link.head.timestamp);
        let wrapper = bundler.seal(Sealing {
            chain: link.head.chain(),
            timestamp,
            previous: link.head.timestamp,
            prior_hash: link.head.hash,
            identity: &identity,
            signing_key: &link.signing_key,
            symmetric_key: self.inner.symmetric_key.as_deref(),
        })?;
        self.receive_local(&wrapper)?;
        link.head = wrapper.info().clone();
        debug!(info = %link.head, "committed bundle");
        Ok(link.head.clone())
    }

    /// Add `change` to `bundler`, or commit it on its own when there is none.
    ///
    /// Returns the change's muid: relative to the bundle when a bundler was
    /// given, absolute otherwise.
    pub fn write_change(&self, bundler: Option<&mut Bundler>, change: ChangeBuilder) -> Result<Muid> {
        match bundler {
            Some(bundler) => Ok(bundler.add_change(change)),
            None => {
                let mut bundler = Bundler::new("");
                let relative = bundler.add_change(change);
                let info = self.commit(bundler)?;
                Ok(Muid::create(&info, Some(&relative.to_builder())))
            }
        }
    }

    /// Add every change to `bundler`, or commit them together when there is none.
    ///
    /// Returns the number of changes; nothing is committed for zero.
    pub fn write_changes(
        &self,
        bundler: Option<&mut Bundler>,
        comment: &str,
        changes: Vec<ChangeBuilder>,
    ) -> Result<usize> {
        let count = changes.len();
        match bundler {
            Some(bundler) => {
                for change in changes {
                    bundler.add_change(change);
                }
            }
            None if count > 0 => {
                let mut bundler = Bundler::new(comment);
                for change in changes {
                    bundler.add_change(change);
                }
                self.commit(bundler)?;
            }
            None => {}
        }
        Ok(count)
    }

    /// Run `build` against `bundler`, or against a fresh one committed after.
    ///
    /// Nothing is committed when `build` fails or adds no changes.
    pub fn in_bundle<T>(
        &self,
        bundler: Option<&mut Bundler>,
        comment: &str,
        build: impl FnOnce(&mut Bundler) -> Result<T>,
    ) -> Result<T> {
        match bundler {
            Some(bundler) => build(bundler),
            None => {
                let mut bundler = Bundler::new(comment);
                let out = build(&mut bundler)?;
                if !bundler.is_empty() {
                    self.commit(bundler)?;
                }
                Ok(out)
            }
        }
    }

    fn receive_local(&self, wrapper: &BundleWrapper) -> Result<()> {
        if self.inner.relay.receive(wrapper, true)? {
            Ok(())
        } else {
            Err(Error::InvalidOperation(format!(
                "store already had freshly sealed bundle {}",
                wrapper.info()
            )))
        }
    }

    fn acquire_chain(&self, identity: &str) -> Result<ChainLink> {
        if let Some(head) = self.inner.relay.maybe_reuse_chain(identity)? {
            let chain = head.chain();
            let key = match self.inner.store.get_verify_key(chain)? {
                Some(verify_key) => self.inner.store.get_signing_key(&verify_key)?,
                None => None,
            };
            match key {
                Some(signing_key) => {
                    info!(%chain, identity, "reusing chain");
                    return Ok(ChainLink { head, signing_key });
                }
                None => warn!(%chain, "no signing key for reusable chain, starting a new one"),
            }
        }
        self.start_chain(identity)
    }

    fn start_chain(&self, identity: &str) -> Result<ChainLink> {
        let signing_key = generate_signing_key();
        self.inner.store.save_signing_key(&signing_key)?;
        let medallion = rand::thread_rng().gen_range(MEDALLION_MIN..=MEDALLION_MAX);
        let chain_start = self.inner.clock.now();
        let chain = Chain::new(medallion, chain_start);

        let mut bundler = Bundler::new(STARTING_CHAIN);
        for (key, value) in process_info() {
            bundler.add_change(ChangeBuilder::entry(EntryBuilder {
                behavior: Behavior::Directory as i32,
                container: Some(Muid::personal_directory().to_builder()),
                key: Some(UserKey::from(key).to_builder()),
                value: Some(value.to_builder()),
                ..Default::default()
            }));
        }
        // The starting bundle stays readable so peers can attribute the chain.
        let wrapper = bundler.seal(Sealing {
            chain,
            timestamp: chain_start,
            previous: 0,
            prior_hash: None,
            identity,
            signing_key: &signing_key,
            symmetric_key: None,
        })?;
        self.receive_local(&wrapper)?;
        info!(%chain, identity, "started chain");
        Ok(ChainLink {
            head: wrapper.info().clone(),
            signing_key,
        })
    }

    /// Re-set every container to its state at `to_time`.
    ///
    /// The changes go into `bundler` when given, otherwise they are
    /// committed at once. History before the reset stays readable.
    /// Returns the number of changes.
    pub fn reset(
        &self,
        to_time: impl Into<GenericTimestamp>,
        bundler: Option<&mut Bundler>,
    ) -> Result<usize> {
        let to_time = self.resolve_timestamp(to_time)?;
        let changes = self.inner.store.get_reset_changes(to_time, None, None, false)?;
        self.write_changes(bundler, "reset", changes)
    }

    /// Who and what is behind the bundle at `(timestamp, medallion)`.
    pub fn get_attribution(
        &self,
        timestamp: MuTimestamp,
        medallion: Medallion,
    ) -> Result<Attribution> {
        let store = &self.inner.store;
        let personal = Muid::new(-1, medallion, Behavior::Directory as i32);
        let lookup = |key: &str| -> Result<Option<String>> {
            let found =
                store.get_entry_by_key(personal, &EntryKey::Key(UserKey::from(key)), timestamp + 1)?;
            Ok(found
                .and_then(|f| f.builder.value)
                .and_then(|v| Value::from_builder(&v).ok())
                .map(|v| match v {
                    Value::String(s) => s,
                    other => format!("{other:?}"),
                }))
        };
        let identity = match store.find_chain(medallion, timestamp)? {
            Some(chain) => store.get_identity(chain)?,
            None => None,
        };
        Ok(Attribution {
            timestamp,
            medallion,
            identity,
            comment: store.get_comment(timestamp, medallion)?,
            user_name: lookup(".user.name")?,
            host_name: lookup(".host.name")?,
            full_name: lookup(".full.name")?,
            software: lookup(".software")?,
        })
    }

    /// Attributions of journaled bundles.
    ///
    /// A negative `limit` gives the newest `-limit` bundles, newest first;
    /// otherwise the oldest `limit + 1`.
    pub fn log(&self, limit: i64) -> Result<Vec<Attribution>> {
        self.inner
            .store
            .get_some_infos(limit)?
            .iter()
            .map(|info| self.get_attribution(info.timestamp, info.medallion))
            .collect()
    }

    /// Containers named `name`.
    pub fn get_by_name(
        &self,
        name: &str,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<Vec<FoundContainer>> {
        let as_of = self.resolve_timestamp(as_of)?;
        self.inner.store.get_by_name(name, as_of)
    }

    /// Observe every bundle applied from now on, local or not.
    pub fn add_callback(&self, callback: impl FnMut(&BundleWrapper) + Send + 'static) {
        self.inner.relay.add_callback(callback);
    }

    /// Connect to a peer at `host[:port][/path]`.
    pub fn connect_to(&self, target: &str) -> Result<ConnectionId> {
        self.inner.relay.connect_to(target, None)
    }

    /// Accept peers on `addr:port`; returns the bound address.
    pub fn start_listening(&self, addr: &str, port: u16) -> Result<SocketAddr> {
        self.inner.relay.start_listening(addr, port)
    }

    /// Exchange bundles with peers for `duration`.
    pub fn run_for(&self, duration: Duration) {
        self.inner.relay.run_for(duration);
    }

    /// Exchange bundles with peers until `when`.
    pub fn run_until(&self, when: impl Into<GenericTimestamp>) -> Result<()> {
        let until = self.resolve_timestamp(when)?;
        let remaining = until.saturating_sub(self.now()).max(0);
        self.inner
            .relay
            .run_until(Instant::now() + Duration::from_micros(remaining as u64));
        Ok(())
    }

    /// Hang up on every peer and stop listening.
    pub fn close(&self) {
        self.inner.relay.close();
    }
}

fn default_identity() -> String {
    let user = user_name().unwrap_or_else(|| "unknown".to_string());
    let host = host_name().unwrap_or_else(|| "localhost".to_string());
    format!("{user}@{host}")
}

fn user_name() -> Option<String> {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .ok()
        .filter(|name| !name.is_empty())
}

fn host_name() -> Option<String> {
    hostname::get()
        .ok()
        .map(|name| name.to_string_lossy().into_owned())
}

/// Process details written to the personal directory of a new chain.
fn process_info() -> Vec<(&'static str, Value)> {
    let mut info = vec![(".process.id", Value::Int(std::process::id() as i64))];
    if let Some(user) = user_name() {
        info.push((".user.name", Value::String(user)));
    }
    if let Some(host) = host_name() {
        info.push((".host.name", Value::String(host)));
    }
    if let Some(software) = std::env::args().next().filter(|s| !s.is_empty()) {
        info.push((".software", Value::String(software)));
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_commit_starts_a_chain() {
        let db = Database::in_memory().unwrap();
        assert!(db.chain().is_none());
        let info = db.commit(Bundler::new("hello")).unwrap();
        let chain = db.chain().unwrap();
        assert_eq!(info.chain(), chain);
        assert!((MEDALLION_MIN..=MEDALLION_MAX).contains(&chain.medallion));
        assert!(info.timestamp > chain.chain_start);
        assert_eq!(info.previous, chain.chain_start);

        let infos = db.store().get_some_infos(10).unwrap();
        assert_eq!(infos.len(), 2);
        assert_eq!(infos[0].comment, STARTING_CHAIN);
        assert_eq!(infos[1].comment, "hello");
    }

    #[test]
    fn test_commits_extend_the_same_chain() {
        let db = Database::in_memory().unwrap();
        let first = db.commit(Bundler::new("one")).unwrap();
        let second = db.commit(Bundler::new("two")).unwrap();
        assert_eq!(first.chain(), second.chain());
        assert_eq!(second.previous, first.timestamp);
        assert!(second.timestamp > first.timestamp);
        let has = db.store().get_has_map(None).unwrap();
        assert_eq!(has.get(&first.chain()), Some(second.timestamp));
    }

    #[test]
    fn test_starting_bundle_records_process_info() {
        let db = Database::in_memory().unwrap();
        let info = db.commit(Bundler::new("x")).unwrap();
        let personal = Muid::new(-1, info.medallion, Behavior::Directory as i32);
        let found = db
            .store()
            .get_entry_by_key(personal, &EntryKey::Key(UserKey::from(".process.id")), gink_core::INT_INF)
            .unwrap()
            .unwrap();
        let pid = Value::from_builder(found.builder.value.as_ref().unwrap()).unwrap();
        assert_eq!(pid, Value::Int(std::process::id() as i64));
    }

    #[test]
    fn test_resolve_timestamp_by_magnitude() {
        let db = Database::in_memory().unwrap();
        let micros = 1_700_000_000_123_456;
        assert_eq!(db.resolve_timestamp(micros).unwrap(), micros);
        assert_eq!(db.resolve_timestamp(1_700_000_000).unwrap(), 1_700_000_000_000_000);
        assert_eq!(
            db.resolve_timestamp(1_700_000_000.5).unwrap(),
            1_700_000_000_500_000
        );
        let muid = Muid::new(micros, 7, 1);
        assert_eq!(db.resolve_timestamp(muid).unwrap(), micros);

        let before = db.now();
        let soon = db.resolve_timestamp(0.5).unwrap();
        assert!(soon >= before + 500_000);
        assert!(db.resolve_timestamp(1e12).is_err());
    }

    #[test]
    fn test_resolve_small_ints_index_the_journal() {
        let db = Database::in_memory().unwrap();
        assert!(matches!(db.resolve_timestamp(-1), Err(Error::NotFound(_))));
        let first = db.commit(Bundler::new("first")).unwrap();
        let second = db.commit(Bundler::new("second")).unwrap();
        assert_eq!(db.resolve_timestamp(-1).unwrap(), second.timestamp);
        assert_eq!(db.resolve_timestamp(-2).unwrap(), first.timestamp);
        assert_eq!(db.resolve_timestamp(0).unwrap(), first.chain().chain_start);
    }

    #[test]
    fn test_write_change_resolves_muid() {
        let db = Database::in_memory().unwrap();
        let change = ChangeBuilder::container(gink_core::proto::ContainerBuilder {
            behavior: Behavior::Directory as i32,
        });
        let muid = db.write_change(None, change.clone()).unwrap();
        let chain = db.chain().unwrap();
        assert_eq!(muid.medallion, chain.medallion);
        assert_eq!(muid.offset, 1);
        assert!(db.store().get_container(muid).unwrap().is_some());

        let mut bundler = db.start_bundle("batch");
        assert_eq!(db.write_change(Some(&mut bundler), change).unwrap(), Muid::new(0, 0, 1));
        assert_eq!(bundler.len(), 1);
    }

    #[test]
    fn test_attribution_and_log() {
        let db = Database::builder().identity("frank@test").open().unwrap();
        let info = db.commit(Bundler::new("did a thing")).unwrap();
        let attribution = db.get_attribution(info.timestamp, info.medallion).unwrap();
        assert_eq!(attribution.identity.as_deref(), Some("frank@test"));
        assert_eq!(attribution.comment.as_deref(), Some("did a thing"));
        assert!(attribution.software.is_some());

        let log = db.log(-10).unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].comment.as_deref(), Some("did a thing"));
        assert_eq!(log[1].comment.as_deref(), Some(STARTING_CHAIN));
    }

    #[test]
    fn test_callbacks_see_local_commits() {
        let db = Database::in_memory().unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        db.add_callback(move |w: &BundleWrapper| sink.lock().push(w.info().comment.clone()));
        db.commit(Bundler::new("observed")).unwrap();
        assert_eq!(*seen.lock(), vec![STARTING_CHAIN.to_string(), "observed".to_string()]);
    }
}
