//! Per-chain "seen through" watermarks
//!
//! A [`HasMap`] records, for each chain, the timestamp of the newest bundle
//! an instance holds. Peers exchange them as greetings so each side only
//! sends what the other lacks.

use crate::bundle_info::BundleInfo;
use crate::proto::{sync_message, Greeting, GreetingEntry, SyncMessage};
use crate::types::{Chain, Muid, MuTimestamp};
use std::collections::BTreeMap;

/// What data a particular instance has.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HasMap {
    data: BTreeMap<Chain, MuTimestamp>,
}

impl HasMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record possession of everything in `info`'s chain up to its timestamp.
    pub fn mark_as_having(&mut self, info: &BundleInfo) {
        let seen = self.data.entry(info.chain()).or_insert(0);
        if *seen < info.timestamp {
            *seen = info.timestamp;
        }
    }

    /// Whether the tracked instance already has this bundle.
    pub fn has(&self, info: &BundleInfo) -> bool {
        info.timestamp <= self.data.get(&info.chain()).copied().unwrap_or(0)
    }

    /// Whether the tracked instance has the bundle that created `muid`.
    pub fn has_muid(&self, muid: &Muid) -> bool {
        let low = Chain::new(muid.medallion, 0);
        let high = Chain::new(muid.medallion, muid.timestamp);
        self.data.range(low..=high).any(|(chain, seen_through)| {
            chain.chain_start <= muid.timestamp && muid.timestamp <= *seen_through
        })
    }

    /// Whether `info` directly extends what the tracked instance has.
    ///
    /// Chain starts are always valid extensions.
    pub fn is_valid_extension(&self, info: &BundleInfo) -> bool {
        if info.is_chain_start() {
            return true;
        }
        self.data.get(&info.chain()) == Some(&info.previous)
    }

    /// Seen-through timestamp of a chain.
    pub fn get(&self, chain: &Chain) -> Option<MuTimestamp> {
        self.data.get(chain).copied()
    }

    /// Iterate `(chain, seen_through)` in chain order.
    pub fn iter(&self) -> impl Iterator<Item = (&Chain, &MuTimestamp)> {
        self.data.iter()
    }

    /// Number of chains tracked.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no chains are tracked.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Restriction to the given chains.
    pub fn subset<'a>(&self, chains: impl IntoIterator<Item = &'a Chain>) -> HasMap {
        let data = chains
            .into_iter()
            .filter_map(|chain| self.data.get(chain).map(|seen| (*chain, *seen)))
            .collect();
        HasMap { data }
    }

    /// Greeting listing every tracked chain, sorted by (medallion, chain_start).
    pub fn to_greeting(&self) -> SyncMessage {
        let entries = self
            .data
            .iter()
            .map(|(chain, seen_through)| GreetingEntry {
                medallion: chain.medallion,
                chain_start: chain.chain_start,
                seen_through: *seen_through,
            })
            .collect();
        SyncMessage {
            contents: Some(sync_message::Contents::Greeting(Greeting { entries })),
        }
    }

    /// Inverse of [`HasMap::to_greeting`].
    pub fn from_greeting(greeting: &Greeting) -> Self {
        let data = greeting
            .entries
            .iter()
            .map(|e| (Chain::new(e.medallion, e.chain_start), e.seen_through))
            .collect();
        HasMap { data }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(medallion: i64, chain_start: i64, timestamp: i64, previous: i64) -> BundleInfo {
        BundleInfo {
            timestamp,
            medallion,
            chain_start,
            previous,
            ..Default::default()
        }
    }

    #[test]
    fn test_mark_and_has() {
        let mut has_map = HasMap::new();
        has_map.mark_as_having(&info(5, 100, 300, 200));
        assert!(has_map.has(&info(5, 100, 200, 100)));
        assert!(has_map.has(&info(5, 100, 300, 200)));
        assert!(!has_map.has(&info(5, 100, 400, 300)));
        assert!(!has_map.has(&info(6, 100, 100, 0)));

        has_map.mark_as_having(&info(5, 100, 200, 100));
        assert_eq!(has_map.get(&Chain::new(5, 100)), Some(300));
    }

    #[test]
    fn test_has_muid() {
        let mut has_map = HasMap::new();
        has_map.mark_as_having(&info(5, 100, 300, 200));
        assert!(has_map.has_muid(&Muid::new(150, 5, 1)));
        assert!(!has_map.has_muid(&Muid::new(50, 5, 1)));
        assert!(!has_map.has_muid(&Muid::new(350, 5, 1)));
        assert!(!has_map.has_muid(&Muid::new(150, 6, 1)));
    }

    #[test]
    fn test_valid_extension() {
        let mut has_map = HasMap::new();
        assert!(has_map.is_valid_extension(&info(5, 100, 100, 0)));
        assert!(!has_map.is_valid_extension(&info(5, 100, 200, 100)));
        has_map.mark_as_having(&info(5, 100, 100, 0));
        assert!(has_map.is_valid_extension(&info(5, 100, 200, 100)));
        assert!(!has_map.is_valid_extension(&info(5, 100, 300, 200)));
    }

    #[test]
    fn test_greeting_roundtrip_sorted() {
        let mut has_map = HasMap::new();
        has_map.mark_as_having(&info(9, 100, 150, 100));
        has_map.mark_as_having(&info(5, 300, 300, 0));
        has_map.mark_as_having(&info(5, 100, 120, 100));
        let Some(sync_message::Contents::Greeting(greeting)) = has_map.to_greeting().contents
        else {
            panic!("expected greeting");
        };
        let order: Vec<(i64, i64)> = greeting
            .entries
            .iter()
            .map(|e| (e.medallion, e.chain_start))
            .collect();
        assert_eq!(order, vec![(5, 100), (5, 300), (9, 100)]);
        assert_eq!(HasMap::from_greeting(&greeting), has_map);
    }

    #[test]
    fn test_subset() {
        let mut has_map = HasMap::new();
        has_map.mark_as_having(&info(5, 100, 150, 100));
        has_map.mark_as_having(&info(6, 100, 150, 100));
        let subset = has_map.subset(&[Chain::new(5, 100), Chain::new(7, 1)]);
        assert_eq!(subset.len(), 1);
        assert_eq!(subset.get(&Chain::new(5, 100)), Some(150));
    }
}
