//! The bundle store: journal, chain heads and entry indexes
//!
//! [`BundleStore`] is the object-safe contract the engine and the sync layer
//! program against. [`Store`] implements it once over any [`Backend`]:
//!
//! - [`MemoryStore`]: process-local tables, nothing persisted
//! - [`LmdbStore`]: durable tables shared by every process opening the
//!   same directory
//!
//! # Concurrency
//!
//! All mutation goes through the backend's single writer transaction, so
//! bundle application is serialized. Reads run on snapshots and never block
//! writers (LMDB) or only wait for the current writer (memory).
//!
//! # Other processes
//!
//! Several processes may apply bundles to one LMDB directory. Each store
//! remembers the receive time of the last journaled bundle it has reported;
//! [`BundleStore::refresh`] (and every `apply_bundle`) reports the bundles
//! journaled since by anyone else.

use std::ops::ControlFlow;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use gink_core::crypto::{self, SigningKey, VerifyingKey};
use gink_core::proto::{ChangeBuilder, ClaimBuilder, ContainerBuilder, EntryBuilder};
use gink_core::{
    decode_muts, encode_muts, Behavior, BundleInfo, BundleWrapper, Chain, EntryKey, Error,
    FoundContainer, FoundEntry, HasMap, Medallion, MuTimestamp, Muid, PositionedEntry, Result,
    INT_INF,
};

use crate::apply::{self, RETAIN_BUNDLES, RETAIN_ENTRIES};
use crate::claims;
use crate::config::StoreConfig;
use crate::kv::{concat, Backend, Direction, ReadTxn, Table, WriteTxn};
use crate::lmdb::LmdbBackend;
use crate::memory::MemoryBackend;
use crate::reads;
use crate::reset::Resetter;

/// Invoked with each bundle newly applied (or discovered by a refresh).
pub type BundleCallback<'a> = dyn FnMut(&BundleWrapper) + 'a;

/// Receives bundles streamed out of the journal; an error stops the stream.
pub type BundleSink<'a> = dyn FnMut(&BundleWrapper) -> Result<()> + 'a;

/// Retention flags persisted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Retentions {
    /// Signed bundles are journaled
    pub bundles: bool,
    /// Superseded entries are kept for historical reads
    pub entries: bool,
}

/// Storage contract shared by the memory and LMDB stores.
///
/// Every `as_of` argument is a microsecond timestamp; [`INT_INF`] reads the
/// current state.
pub trait BundleStore: Send + Sync {
    /// Check, journal and apply a bundle.
    ///
    /// `claim_chain` marks bundles produced by this instance: a chain start
    /// records a claim and every such bundle is queued in the outbox.
    /// Returns the bundle's info and whether it was new.
    fn apply_bundle(
        &self,
        wrapper: &BundleWrapper,
        callback: Option<&mut BundleCallback<'_>>,
        claim_chain: bool,
    ) -> Result<(BundleInfo, bool)>;

    /// Stream journaled bundles in the order they were applied.
    ///
    /// Bundles `peer_has` already covers are skipped; with `limit_to` only
    /// chains it lists are sent, up to the timestamp it gives for each.
    fn get_bundles(
        &self,
        sink: &mut BundleSink<'_>,
        peer_has: Option<&HasMap>,
        limit_to: Option<&HasMap>,
    ) -> Result<()>;

    /// One journaled bundle.
    fn get_one_bundle(
        &self,
        timestamp: MuTimestamp,
        medallion: Medallion,
    ) -> Result<Option<BundleWrapper>>;

    /// Chain heads, optionally restricted to some chains.
    fn get_has_map(&self, limit_to: Option<&[Chain]>) -> Result<HasMap>;

    /// Entry holding `key` in `container`, deletions included.
    fn get_entry_by_key(
        &self,
        container: Muid,
        key: &EntryKey,
        as_of: MuTimestamp,
    ) -> Result<Option<FoundEntry>>;

    /// Live entries of a keyed container, in key order.
    fn get_keyed_entries(
        &self,
        container: Muid,
        behavior: Behavior,
        as_of: MuTimestamp,
    ) -> Result<Vec<FoundEntry>>;

    /// Entries of an ordered container, in position order.
    fn get_ordered_entries(
        &self,
        container: Muid,
        as_of: MuTimestamp,
        limit: Option<usize>,
        offset: usize,
        descending: bool,
    ) -> Result<Vec<PositionedEntry>>;

    /// Current position of one entry.
    fn get_positioned_entry(
        &self,
        entry: Muid,
        as_of: MuTimestamp,
    ) -> Result<Option<PositionedEntry>>;

    /// Edges filtered by type, source and target (at least one required).
    fn get_edge_entries(
        &self,
        as_of: MuTimestamp,
        edge_type: Option<Muid>,
        source: Option<Muid>,
        target: Option<Muid>,
    ) -> Result<Vec<FoundEntry>>;

    /// Changes that would restore the state at `to_time`.
    ///
    /// Without a container every container is reset; a key requires a
    /// container.
    fn get_reset_changes(
        &self,
        to_time: MuTimestamp,
        container: Option<Muid>,
        key: Option<&EntryKey>,
        recursive: bool,
    ) -> Result<Vec<ChangeBuilder>>;

    /// Take over a chain with `identity` whose last claimant has exited.
    fn maybe_reuse_chain(
        &self,
        identity: &str,
        callback: Option<&mut BundleCallback<'_>>,
    ) -> Result<Option<BundleInfo>>;

    /// Store a symmetric key, returning its id.
    fn save_symmetric_key(&self, key: &[u8]) -> Result<u64>;

    /// Symmetric key by id.
    fn get_symmetric_key(&self, key_id: u64) -> Result<Option<Vec<u8>>>;

    /// Store a signing key under its verify key.
    fn save_signing_key(&self, signing_key: &SigningKey) -> Result<()>;

    /// Signing key matching a verify key.
    fn get_signing_key(&self, verify_key: &VerifyingKey) -> Result<Option<SigningKey>>;

    /// Verify key of a chain.
    fn get_verify_key(&self, chain: Chain) -> Result<Option<VerifyingKey>>;

    /// Containers named `name`.
    fn get_by_name(&self, name: &str, as_of: MuTimestamp) -> Result<Vec<FoundContainer>>;

    /// Entries describing `describing` (properties, group memberships).
    fn get_by_describing(&self, describing: Muid, as_of: MuTimestamp)
        -> Result<Vec<FoundEntry>>;

    /// Containers holding a pointer to `pointee`.
    fn get_by_pointee(&self, pointee: Muid, as_of: MuTimestamp) -> Result<Vec<Muid>>;

    /// Raw entry.
    fn get_entry(&self, entry: Muid) -> Result<Option<EntryBuilder>>;

    /// Container definition (synthesized for arche and instance containers).
    fn get_container(&self, container: Muid) -> Result<Option<ContainerBuilder>>;

    /// Every explicitly defined container.
    fn list_containers(&self) -> Result<Vec<(Muid, ContainerBuilder)>>;

    /// Identity recorded by a chain's start.
    fn get_identity(&self, chain: Chain) -> Result<Option<String>>;

    /// Comment of a journaled bundle.
    fn get_comment(&self, timestamp: MuTimestamp, medallion: Medallion)
        -> Result<Option<String>>;

    /// Chain of `medallion` that was current at `timestamp`.
    fn find_chain(&self, medallion: Medallion, timestamp: MuTimestamp) -> Result<Option<Chain>>;

    /// Stored head of a chain.
    fn get_last(&self, chain: Chain) -> Result<Option<BundleInfo>>;

    /// Every chain claim, oldest first.
    fn get_claims(&self) -> Result<Vec<ClaimBuilder>>;

    /// Accumulator total in billionths.
    fn get_billionths(&self, accumulator: Muid, as_of: MuTimestamp) -> Result<i128>;

    /// Journaled bundle infos in timestamp order.
    ///
    /// `last_index >= 0` returns the first `last_index + 1`; negative values
    /// return the last `-last_index` newest first.
    fn get_some_infos(&self, last_index: i64) -> Result<Vec<BundleInfo>>;

    /// The bundle info at `index` (negative counts from the end).
    fn get_bundle_info(&self, index: i64) -> Result<Option<BundleInfo>>;

    /// Hard delete history removed at or before `as_of` (everything if `None`).
    fn drop_history(&self, as_of: Option<MuTimestamp>) -> Result<usize>;

    /// Begin retaining entry history.
    fn start_history(&self) -> Result<()>;

    /// Stop retaining entry history and drop what was kept.
    fn stop_history(&self) -> Result<()>;

    /// Local bundles not yet acknowledged by a peer.
    fn read_through_outbox(&self) -> Result<Vec<BundleWrapper>>;

    /// Drop acknowledged bundles from the outbox.
    fn remove_from_outbox(&self, infos: &[BundleInfo]) -> Result<()>;

    /// Report bundles journaled by other processes since the last look.
    fn refresh(&self, callback: Option<&mut BundleCallback<'_>>) -> Result<usize>;

    /// Persisted retention flags.
    fn get_retentions(&self) -> Result<Retentions>;

    /// Backend name for logs.
    fn kind(&self) -> &'static str;
}

// =============================================================================
// Store
// =============================================================================

/// [`BundleStore`] over a table backend.
pub struct Store<B: Backend> {
    backend: B,
    config: StoreConfig,
    seen_through: Mutex<MuTimestamp>,
}

/// Store kept entirely in memory.
pub type MemoryStore = Store<MemoryBackend>;

/// Store persisted in an LMDB directory.
pub type LmdbStore = Store<LmdbBackend>;

impl<B: Backend> std::fmt::Debug for Store<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("kind", &self.backend.kind())
            .field("config", &self.config)
            .finish()
    }
}

impl MemoryStore {
    /// Fresh in-memory store with default retention.
    pub fn in_memory() -> Result<Self> {
        Self::with_backend(MemoryBackend::new(), StoreConfig::default())
    }

    /// Fresh in-memory store.
    pub fn in_memory_with(config: StoreConfig) -> Result<Self> {
        Self::with_backend(MemoryBackend::new(), config)
    }
}

impl LmdbStore {
    /// Open (creating if needed) the store in directory `path`.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let backend = LmdbBackend::open(path, config.map_size)?;
        Self::with_backend(backend, config)
    }
}

fn now_micros() -> MuTimestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as MuTimestamp)
        .unwrap_or(0)
}

fn last_receive_time(txn: &impl ReadTxn) -> Result<MuTimestamp> {
    match txn.last(Table::Bundles)? {
        Some((key, _)) => Ok(decode_muts(&key)?.unwrap_or(0)),
        None => Ok(0),
    }
}

impl<B: Backend> Store<B> {
    /// Wrap a backend, initializing retention flags on first use.
    pub fn with_backend(backend: B, config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let mut txn = backend.write_txn()?;
        if config.reset {
            for table in Table::ALL {
                txn.clear(table)?;
            }
        }
        if !txn.contains(Table::Retentions, RETAIN_BUNDLES)? {
            apply::set_retention_flag(&mut txn, RETAIN_BUNDLES, config.retain_bundles)?;
            apply::set_retention_flag(&mut txn, RETAIN_ENTRIES, config.retain_entries)?;
        }
        let seen_through = last_receive_time(&txn)?;
        txn.commit()?;
        info!(kind = backend.kind(), reset = config.reset, "bundle store opened");
        Ok(Self {
            backend,
            config,
            seen_through: Mutex::new(seen_through),
        })
    }

    /// Configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Journaled bundles received after `after`, with the newest receive time.
    ///
    /// Callers move `seen_through` only once whatever they do with the
    /// result has been committed.
    fn journaled_after(
        &self,
        txn: &impl ReadTxn,
        after: MuTimestamp,
    ) -> Result<(Vec<BundleWrapper>, MuTimestamp)> {
        let start = encode_muts(after.saturating_add(1));
        let mut found = Vec::new();
        let mut last = after;
        txn.walk(
            Table::Bundles,
            std::ops::Bound::Included(&start[..]),
            std::ops::Bound::Unbounded,
            Direction::Forward,
            &mut |key, value| {
                last = decode_muts(key)?.unwrap_or(last);
                found.push(BundleWrapper::new(value.to_vec())?);
                Ok(ControlFlow::Continue(()))
            },
        )?;
        Ok((found, last))
    }

    fn next_receive_time(&self, txn: &impl ReadTxn) -> Result<MuTimestamp> {
        Ok(now_micros().max(last_receive_time(txn)? + 1))
    }

    fn bundle_location(
        &self,
        txn: &impl ReadTxn,
        timestamp: MuTimestamp,
        medallion: Medallion,
    ) -> Result<Option<(BundleInfo, Vec<u8>)>> {
        let prefix = concat(&encode_muts(timestamp), &encode_muts(medallion));
        match txn.last_with_prefix(Table::BundleInfos, &prefix, None)? {
            Some((key, location)) => Ok(Some((BundleInfo::from_bytes(&key)?, location))),
            None => Ok(None),
        }
    }

    fn require_bundles(&self, txn: &impl ReadTxn) -> Result<()> {
        if apply::retention_flag(txn, RETAIN_BUNDLES)? {
            Ok(())
        } else {
            Err(Error::RetentionConfig("bundles are not retained".to_string()))
        }
    }
}

impl<B: Backend> BundleStore for Store<B> {
    fn apply_bundle(
        &self,
        wrapper: &BundleWrapper,
        callback: Option<&mut BundleCallback<'_>>,
        claim_chain: bool,
    ) -> Result<(BundleInfo, bool)> {
        let mut callback = callback;
        let info = wrapper.info().clone();
        let mut txn = self.backend.write_txn()?;
        let mut seen = self.seen_through.lock();
        let (missed, missed_through) = self.journaled_after(&txn, *seen)?;
        let receive_time = self.next_receive_time(&txn)?;
        let claim = claim_chain.then(|| claims::new_claim(info.chain(), receive_time));
        let accepted = apply::apply_bundle(
            &mut txn,
            wrapper,
            claim_chain,
            claim,
            self.config.apply_changes,
            receive_time,
        )?;
        let journaled = accepted && apply::retention_flag(&txn, RETAIN_BUNDLES)?;
        txn.commit()?;
        *seen = if journaled { receive_time } else { missed_through };
        drop(seen);
        if let Some(cb) = callback.as_deref_mut() {
            for other in &missed {
                cb(other);
            }
            if accepted {
                cb(wrapper);
            }
        }
        debug!(%info, accepted, "applied bundle");
        Ok((info, accepted))
    }

    fn get_bundles(
        &self,
        sink: &mut BundleSink<'_>,
        peer_has: Option<&HasMap>,
        limit_to: Option<&HasMap>,
    ) -> Result<()> {
        let bundles = {
            let txn = self.backend.read_txn()?;
            self.require_bundles(&txn)?;
            let mut bundles = Vec::new();
            txn.walk_prefix(Table::Bundles, &[], Direction::Forward, &mut |_, value| {
                let wrapper = BundleWrapper::new(value.to_vec())?;
                let info = wrapper.info();
                if peer_has.is_some_and(|has| has.has(info)) {
                    return Ok(ControlFlow::Continue(()));
                }
                if let Some(limit) = limit_to {
                    match limit.get(&info.chain()) {
                        Some(through) if info.timestamp <= through => {}
                        _ => return Ok(ControlFlow::Continue(())),
                    }
                }
                bundles.push(wrapper);
                Ok(ControlFlow::Continue(()))
            })?;
            bundles
        };
        for wrapper in &bundles {
            sink(wrapper)?;
        }
        Ok(())
    }

    fn get_one_bundle(
        &self,
        timestamp: MuTimestamp,
        medallion: Medallion,
    ) -> Result<Option<BundleWrapper>> {
        let txn = self.backend.read_txn()?;
        let Some((_, location)) = self.bundle_location(&txn, timestamp, medallion)? else {
            return Ok(None);
        };
        txn.get(Table::Bundles, &location)?
            .map(BundleWrapper::new)
            .transpose()
    }

    fn get_has_map(&self, limit_to: Option<&[Chain]>) -> Result<HasMap> {
        let txn = self.backend.read_txn()?;
        let mut has_map = HasMap::new();
        txn.walk_prefix(Table::Chains, &[], Direction::Forward, &mut |key, value| {
            if let Some(chains) = limit_to {
                if !chains.contains(&Chain::from_bytes(key)?) {
                    return Ok(ControlFlow::Continue(()));
                }
            }
            has_map.mark_as_having(&BundleInfo::from_bytes(value)?);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(has_map)
    }

    fn get_entry_by_key(
        &self,
        container: Muid,
        key: &EntryKey,
        as_of: MuTimestamp,
    ) -> Result<Option<FoundEntry>> {
        let txn = self.backend.read_txn()?;
        reads::entry_by_middle(&txn, container, &key.encode(), as_of)
    }

    fn get_keyed_entries(
        &self,
        container: Muid,
        behavior: Behavior,
        as_of: MuTimestamp,
    ) -> Result<Vec<FoundEntry>> {
        if !behavior.new_entries_replace() {
            return Err(Error::InvalidOperation(format!(
                "{behavior} containers aren't keyed"
            )));
        }
        let txn = self.backend.read_txn()?;
        reads::keyed_entries(&txn, container, as_of)
    }

    fn get_ordered_entries(
        &self,
        container: Muid,
        as_of: MuTimestamp,
        limit: Option<usize>,
        offset: usize,
        descending: bool,
    ) -> Result<Vec<PositionedEntry>> {
        let txn = self.backend.read_txn()?;
        reads::ordered_entries(&txn, container, as_of, limit, offset, descending)
    }

    fn get_positioned_entry(
        &self,
        entry: Muid,
        as_of: MuTimestamp,
    ) -> Result<Option<PositionedEntry>> {
        let txn = self.backend.read_txn()?;
        reads::positioned_entry(&txn, entry, as_of)
    }

    fn get_edge_entries(
        &self,
        as_of: MuTimestamp,
        edge_type: Option<Muid>,
        source: Option<Muid>,
        target: Option<Muid>,
    ) -> Result<Vec<FoundEntry>> {
        let txn = self.backend.read_txn()?;
        reads::edge_entries(&txn, as_of, edge_type, source, target)
    }

    fn get_reset_changes(
        &self,
        to_time: MuTimestamp,
        container: Option<Muid>,
        key: Option<&EntryKey>,
        recursive: bool,
    ) -> Result<Vec<ChangeBuilder>> {
        let txn = self.backend.read_txn()?;
        if !apply::retention_flag(&txn, RETAIN_ENTRIES)? {
            return Err(Error::RetentionConfig(
                "reset needs entry history".to_string(),
            ));
        }
        let mut resetter = Resetter::new(&txn, to_time, recursive);
        match (container, key) {
            (None, Some(_)) => {
                return Err(Error::InvalidOperation(
                    "a key can only be reset within a container".to_string(),
                ))
            }
            (None, None) => resetter.everything()?,
            (Some(container), Some(key)) => resetter.key(container, key)?,
            (Some(container), None) => resetter.container(container)?,
        }
        Ok(resetter.into_changes())
    }

    fn maybe_reuse_chain(
        &self,
        identity: &str,
        callback: Option<&mut BundleCallback<'_>>,
    ) -> Result<Option<BundleInfo>> {
        let mut callback = callback;
        let mut txn = self.backend.write_txn()?;
        let mut seen = self.seen_through.lock();
        let (missed, missed_through) = self.journaled_after(&txn, *seen)?;
        let reused = match claims::reusable_chain(&txn, identity)? {
            Some(chain) => {
                claims::record_claim(&mut txn, &claims::new_claim(chain, now_micros()))?;
                txn.get(Table::Chains, &chain.to_bytes())?
                    .map(|raw| BundleInfo::from_bytes(&raw))
                    .transpose()?
            }
            None => None,
        };
        txn.commit()?;
        *seen = missed_through;
        drop(seen);
        if let Some(cb) = callback.as_deref_mut() {
            for other in &missed {
                cb(other);
            }
        }
        if let Some(head) = &reused {
            info!(chain = %head.chain(), "reusing chain");
        }
        Ok(reused)
    }

    fn save_symmetric_key(&self, key: &[u8]) -> Result<u64> {
        if key.len() != crypto::SYMMETRIC_KEY_LEN {
            return Err(Error::CryptoError(format!(
                "symmetric keys must be {} bytes",
                crypto::SYMMETRIC_KEY_LEN
            )));
        }
        let key_id = crypto::key_id(key);
        let mut txn = self.backend.write_txn()?;
        txn.put(Table::SymmetricKeys, &encode_muts(apply::symmetric_key_row(key_id)?), key)?;
        txn.commit()?;
        Ok(key_id)
    }

    fn get_symmetric_key(&self, key_id: u64) -> Result<Option<Vec<u8>>> {
        let txn = self.backend.read_txn()?;
        txn.get(Table::SymmetricKeys, &encode_muts(apply::symmetric_key_row(key_id)?))
    }

    fn save_signing_key(&self, signing_key: &SigningKey) -> Result<()> {
        let mut txn = self.backend.write_txn()?;
        txn.put(
            Table::SigningKeys,
            signing_key.verifying_key().as_bytes(),
            &signing_key.to_bytes(),
        )?;
        txn.commit()
    }

    fn get_signing_key(&self, verify_key: &VerifyingKey) -> Result<Option<SigningKey>> {
        let txn = self.backend.read_txn()?;
        txn.get(Table::SigningKeys, verify_key.as_bytes())?
            .map(|raw| crypto::signing_key(&raw))
            .transpose()
    }

    fn get_verify_key(&self, chain: Chain) -> Result<Option<VerifyingKey>> {
        let txn = self.backend.read_txn()?;
        txn.get(Table::VerifyKeys, &chain.to_bytes())?
            .map(|raw| crypto::verifying_key(&raw))
            .transpose()
    }

    fn get_by_name(&self, name: &str, as_of: MuTimestamp) -> Result<Vec<FoundContainer>> {
        let txn = self.backend.read_txn()?;
        reads::by_name(&txn, name, as_of)
    }

    fn get_by_describing(
        &self,
        describing: Muid,
        as_of: MuTimestamp,
    ) -> Result<Vec<FoundEntry>> {
        let txn = self.backend.read_txn()?;
        reads::by_describing(&txn, describing, as_of)
    }

    fn get_by_pointee(&self, pointee: Muid, as_of: MuTimestamp) -> Result<Vec<Muid>> {
        let txn = self.backend.read_txn()?;
        reads::containers_pointing_to(&txn, pointee, as_of)
    }

    fn get_entry(&self, entry: Muid) -> Result<Option<EntryBuilder>> {
        let txn = self.backend.read_txn()?;
        reads::load_entry(&txn, &entry.to_bytes())
    }

    fn get_container(&self, container: Muid) -> Result<Option<ContainerBuilder>> {
        let txn = self.backend.read_txn()?;
        reads::container_definition(&txn, container)
    }

    fn list_containers(&self) -> Result<Vec<(Muid, ContainerBuilder)>> {
        let txn = self.backend.read_txn()?;
        let mut found = Vec::new();
        for (key, _) in txn.collect_prefix(Table::Containers, &[])? {
            let muid = Muid::from_bytes(&key)?;
            if let Some(definition) = reads::container_definition(&txn, muid)? {
                found.push((muid, definition));
            }
        }
        Ok(found)
    }

    fn get_identity(&self, chain: Chain) -> Result<Option<String>> {
        let txn = self.backend.read_txn()?;
        txn.get(Table::Identities, &chain.to_bytes())?
            .map(|raw| {
                String::from_utf8(raw).map_err(|e| Error::SerializationError(e.to_string()))
            })
            .transpose()
    }

    fn get_comment(
        &self,
        timestamp: MuTimestamp,
        medallion: Medallion,
    ) -> Result<Option<String>> {
        let txn = self.backend.read_txn()?;
        Ok(self
            .bundle_location(&txn, timestamp, medallion)?
            .map(|(info, _)| info.comment))
    }

    fn find_chain(&self, medallion: Medallion, timestamp: MuTimestamp) -> Result<Option<Chain>> {
        let txn = self.backend.read_txn()?;
        let prefix = encode_muts(medallion);
        let boundary = concat(&prefix, &encode_muts(timestamp.saturating_add(1)));
        match txn.last_with_prefix(Table::Identities, &prefix, Some(&boundary))? {
            Some((key, _)) => Ok(Some(Chain::from_bytes(&key)?)),
            None => Ok(None),
        }
    }

    fn get_last(&self, chain: Chain) -> Result<Option<BundleInfo>> {
        let txn = self.backend.read_txn()?;
        txn.get(Table::Chains, &chain.to_bytes())?
            .map(|raw| BundleInfo::from_bytes(&raw))
            .transpose()
    }

    fn get_claims(&self) -> Result<Vec<ClaimBuilder>> {
        let txn = self.backend.read_txn()?;
        claims::claims(&txn)
    }

    fn get_billionths(&self, accumulator: Muid, as_of: MuTimestamp) -> Result<i128> {
        let txn = self.backend.read_txn()?;
        if as_of != INT_INF && !apply::retention_flag(&txn, RETAIN_ENTRIES)? {
            return Err(Error::RetentionConfig(
                "past accumulator totals need entry history".to_string(),
            ));
        }
        reads::billionths(&txn, accumulator, as_of)
    }

    fn get_some_infos(&self, last_index: i64) -> Result<Vec<BundleInfo>> {
        let txn = self.backend.read_txn()?;
        let (wanted, direction) = if last_index >= 0 {
            (last_index.saturating_add(1), Direction::Forward)
        } else {
            (last_index.saturating_neg(), Direction::Reverse)
        };
        let mut found = Vec::new();
        txn.walk_prefix(Table::BundleInfos, &[], direction, &mut |key, _| {
            found.push(BundleInfo::from_bytes(key)?);
            Ok(if found.len() as i64 >= wanted {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })?;
        Ok(found)
    }

    fn get_bundle_info(&self, index: i64) -> Result<Option<BundleInfo>> {
        let wanted = if index >= 0 {
            index.saturating_add(1)
        } else {
            index.saturating_neg()
        };
        let mut infos = self.get_some_infos(index)?;
        if infos.len() as i64 == wanted {
            Ok(infos.pop())
        } else {
            Ok(None)
        }
    }

    fn drop_history(&self, as_of: Option<MuTimestamp>) -> Result<usize> {
        let mut txn = self.backend.write_txn()?;
        let dropped = apply::drop_history(&mut txn, as_of.unwrap_or(INT_INF))?;
        txn.commit()?;
        debug!(dropped, "dropped history");
        Ok(dropped)
    }

    fn start_history(&self) -> Result<()> {
        let mut txn = self.backend.write_txn()?;
        apply::set_retention_flag(&mut txn, RETAIN_ENTRIES, true)?;
        txn.commit()
    }

    fn stop_history(&self) -> Result<()> {
        let mut txn = self.backend.write_txn()?;
        apply::set_retention_flag(&mut txn, RETAIN_ENTRIES, false)?;
        let dropped = apply::drop_history(&mut txn, INT_INF)?;
        txn.commit()?;
        debug!(dropped, "stopped keeping history");
        Ok(())
    }

    fn read_through_outbox(&self) -> Result<Vec<BundleWrapper>> {
        let txn = self.backend.read_txn()?;
        let mut found = Vec::new();
        txn.walk_prefix(Table::Outbox, &[], Direction::Forward, &mut |_, value| {
            found.push(BundleWrapper::new(value.to_vec())?);
            Ok(ControlFlow::Continue(()))
        })?;
        Ok(found)
    }

    fn remove_from_outbox(&self, infos: &[BundleInfo]) -> Result<()> {
        let mut txn = self.backend.write_txn()?;
        for info in infos {
            if !txn.delete(Table::Outbox, &apply::info_header(info))? {
                warn!(%info, "acknowledged bundle not in outbox");
            }
        }
        txn.commit()
    }

    fn refresh(&self, callback: Option<&mut BundleCallback<'_>>) -> Result<usize> {
        let missed = {
            let txn = self.backend.read_txn()?;
            let mut seen = self.seen_through.lock();
            let (missed, through) = self.journaled_after(&txn, *seen)?;
            *seen = through;
            missed
        };
        if let Some(cb) = callback {
            for wrapper in &missed {
                cb(wrapper);
            }
        }
        Ok(missed.len())
    }

    fn get_retentions(&self) -> Result<Retentions> {
        let txn = self.backend.read_txn()?;
        Ok(Retentions {
            bundles: apply::retention_flag(&txn, RETAIN_BUNDLES)?,
            entries: apply::retention_flag(&txn, RETAIN_ENTRIES)?,
        })
    }

    fn kind(&self) -> &'static str {
        self.backend.kind()
    }
}
