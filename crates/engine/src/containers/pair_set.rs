//! PairSet: a set of (left, rite) container pairs

use gink_core::codec::pair_of;
use gink_core::proto::{ChangeBuilder, PairBuilder};
use gink_core::{Behavior, Bundler, EntryKey, Muid, Result};

use super::{container_facade, entry_in};
use crate::clock::GenericTimestamp;

container_facade!(
    /// Set of ordered muid pairs.
    PairSet,
    Behavior::PairSet
);

impl PairSet {
    fn write(&self, pair: (Muid, Muid), deletion: bool, bundler: Option<&mut Bundler>) -> Result<Muid> {
        let mut entry = entry_in(self.muid, Behavior::PairSet);
        entry.pair = Some(PairBuilder {
            left: Some(pair.0.to_builder()),
            rite: Some(pair.1.to_builder()),
        });
        entry.deletion = deletion;
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Include `pair`.
    pub fn include(&self, pair: (Muid, Muid), bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.write(pair, false, bundler)
    }

    /// Exclude `pair`.
    pub fn exclude(&self, pair: (Muid, Muid), bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.write(pair, true, bundler)
    }

    /// Whether `pair` is included.
    pub fn contains(&self, pair: (Muid, Muid), as_of: impl Into<GenericTimestamp>) -> Result<bool> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let found = self
            .db
            .store()
            .get_entry_by_key(self.muid, &EntryKey::Pair(pair.0, pair.1), as_of)?;
        Ok(found.is_some_and(|f| !f.builder.deletion))
    }

    /// Included pairs, ordered by left then rite.
    pub fn pairs(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<(Muid, Muid)>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        self.db
            .store()
            .get_keyed_entries(self.muid, Behavior::PairSet, as_of)?
            .iter()
            .map(|found| pair_of(&found.builder, found.address))
            .collect()
    }

    /// Number of included pairs.
    pub fn size(&self, as_of: impl Into<GenericTimestamp>) -> Result<usize> {
        Ok(self.pairs(as_of)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{Container, Directory};
    use crate::{Database, NOW};

    #[test]
    fn test_include_exclude() {
        let db = Database::in_memory().unwrap();
        let set = PairSet::create(&db, None).unwrap();
        let a = Directory::create(&db, None).unwrap().muid();
        let b = Directory::create(&db, None).unwrap().muid();

        set.include((a, b), None).unwrap();
        assert!(set.contains((a, b), NOW).unwrap());
        assert!(!set.contains((b, a), NOW).unwrap());
        set.include((b, a), None).unwrap();
        assert_eq!(set.pairs(NOW).unwrap(), vec![(a, b), (b, a)]);

        set.exclude((a, b), None).unwrap();
        assert_eq!(set.size(NOW).unwrap(), 1);
        assert!(!set.contains((a, b), NOW).unwrap());
    }
}
