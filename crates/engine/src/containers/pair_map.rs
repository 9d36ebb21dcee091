//! PairMap: (left, rite) container pairs mapped to values

use gink_core::codec::pair_of;
use gink_core::proto::{ChangeBuilder, PairBuilder};
use gink_core::{Behavior, Bundler, EntryKey, Muid, Result};

use super::{container_facade, decode_contents, entry_in, Contents};
use crate::clock::GenericTimestamp;

container_facade!(
    /// Map from ordered muid pairs to [`Contents`].
    PairMap,
    Behavior::PairMap
);

impl PairMap {
    fn entry_for(&self, pair: (Muid, Muid)) -> gink_core::proto::EntryBuilder {
        let mut entry = entry_in(self.muid, Behavior::PairMap);
        entry.pair = Some(PairBuilder {
            left: Some(pair.0.to_builder()),
            rite: Some(pair.1.to_builder()),
        });
        entry
    }

    /// Set `pair` to `contents`.
    pub fn set(
        &self,
        pair: (Muid, Muid),
        contents: impl Into<Contents>,
        bundler: Option<&mut Bundler>,
    ) -> Result<Muid> {
        let mut entry = self.entry_for(pair);
        contents.into().fill(&mut entry);
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Contents of `pair` as of a time.
    pub fn get(&self, pair: (Muid, Muid), as_of: impl Into<GenericTimestamp>) -> Result<Option<Contents>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        self.db
            .store()
            .get_entry_by_key(self.muid, &EntryKey::Pair(pair.0, pair.1), as_of)?
            .as_ref()
            .map(decode_contents)
            .transpose()
            .map(Option::flatten)
    }

    /// Whether `pair` is set.
    pub fn has(&self, pair: (Muid, Muid), as_of: impl Into<GenericTimestamp>) -> Result<bool> {
        Ok(self.get(pair, as_of)?.is_some())
    }

    /// Delete `pair`.
    pub fn delete(&self, pair: (Muid, Muid), bundler: Option<&mut Bundler>) -> Result<Muid> {
        let mut entry = self.entry_for(pair);
        entry.deletion = true;
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Every set pair with its contents.
    pub fn items(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<((Muid, Muid), Contents)>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let mut items = Vec::new();
        for found in self
            .db
            .store()
            .get_keyed_entries(self.muid, Behavior::PairMap, as_of)?
        {
            let pair = pair_of(&found.builder, found.address)?;
            if let Some(contents) = decode_contents(&found)? {
                items.push((pair, contents));
            }
        }
        Ok(items)
    }

    /// Number of set pairs.
    pub fn size(&self, as_of: impl Into<GenericTimestamp>) -> Result<usize> {
        Ok(self.items(as_of)?.len())
    }
}
