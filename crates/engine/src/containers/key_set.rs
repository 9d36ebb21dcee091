//! KeySet: a set of user keys

use std::collections::BTreeSet;

use gink_core::proto::ChangeBuilder;
use gink_core::{Behavior, Bundler, EntryKey, Error, Muid, Result, UserKey};

use super::{container_facade, entry_in};
use crate::clock::GenericTimestamp;

container_facade!(
    /// Set of [`UserKey`]s.
    KeySet,
    Behavior::KeySet
);

impl KeySet {
    fn write(&self, key: UserKey, deletion: bool, bundler: Option<&mut Bundler>) -> Result<Muid> {
        key.validate()?;
        let mut entry = entry_in(self.muid, Behavior::KeySet);
        entry.key = Some(key.to_builder());
        entry.deletion = deletion;
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Include `key`.
    pub fn add(&self, key: impl Into<UserKey>, bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.write(key.into(), false, bundler)
    }

    /// Include every key in one bundle.
    pub fn update<K: Into<UserKey>>(
        &self,
        keys: impl IntoIterator<Item = K>,
        bundler: Option<&mut Bundler>,
    ) -> Result<()> {
        self.db.in_bundle(bundler, "update", |bundler| {
            for key in keys {
                self.add(key, Some(&mut *bundler))?;
            }
            Ok(())
        })
    }

    /// Whether `key` is included.
    pub fn contains(&self, key: impl Into<UserKey>, as_of: impl Into<GenericTimestamp>) -> Result<bool> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let found = self
            .db
            .store()
            .get_entry_by_key(self.muid, &EntryKey::Key(key.into()), as_of)?;
        Ok(found.is_some_and(|f| !f.builder.deletion))
    }

    /// Exclude `key` whether or not it is included.
    pub fn discard(&self, key: impl Into<UserKey>, bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.write(key.into(), true, bundler)
    }

    /// Exclude `key`, failing when it isn't included.
    pub fn remove(&self, key: impl Into<UserKey>, bundler: Option<&mut Bundler>) -> Result<Muid> {
        let key = key.into();
        if !self.contains(key.clone(), GenericTimestamp::Now)? {
            return Err(Error::NotFound(format!("{key} not in key set {}", self.muid)));
        }
        self.write(key, true, bundler)
    }

    /// Included keys, in key order.
    pub fn keys(&self, as_of: impl Into<GenericTimestamp>) -> Result<BTreeSet<UserKey>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        self.db
            .store()
            .get_keyed_entries(self.muid, Behavior::KeySet, as_of)?
            .iter()
            .map(|found| {
                found
                    .builder
                    .key
                    .as_ref()
                    .ok_or_else(|| Error::InvalidKey(format!("key set entry {} lacks a key", found.address)))
                    .and_then(UserKey::from_builder)
            })
            .collect()
    }

    /// Number of included keys.
    pub fn size(&self, as_of: impl Into<GenericTimestamp>) -> Result<usize> {
        Ok(self.keys(as_of)?.len())
    }

    /// Keys in this set or in `other`.
    pub fn union<K: Into<UserKey>>(
        &self,
        other: impl IntoIterator<Item = K>,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<BTreeSet<UserKey>> {
        let mut keys = self.keys(as_of)?;
        keys.extend(other.into_iter().map(Into::into));
        Ok(keys)
    }

    /// Keys in both this set and `other`.
    pub fn intersection<K: Into<UserKey>>(
        &self,
        other: impl IntoIterator<Item = K>,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<BTreeSet<UserKey>> {
        let keys = self.keys(as_of)?;
        Ok(other.into_iter().map(Into::into).filter(|k| keys.contains(k)).collect())
    }

    /// Keys in this set but not in `other`.
    pub fn difference<K: Into<UserKey>>(
        &self,
        other: impl IntoIterator<Item = K>,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<BTreeSet<UserKey>> {
        let other: BTreeSet<UserKey> = other.into_iter().map(Into::into).collect();
        Ok(self.keys(as_of)?.difference(&other).cloned().collect())
    }

    /// Keys in exactly one of this set and `other`.
    pub fn symmetric_difference<K: Into<UserKey>>(
        &self,
        other: impl IntoIterator<Item = K>,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<BTreeSet<UserKey>> {
        let other: BTreeSet<UserKey> = other.into_iter().map(Into::into).collect();
        Ok(self.keys(as_of)?.symmetric_difference(&other).cloned().collect())
    }

    /// Whether every key of this set is in `other`.
    pub fn is_subset<K: Into<UserKey>>(
        &self,
        other: impl IntoIterator<Item = K>,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<bool> {
        let other: BTreeSet<UserKey> = other.into_iter().map(Into::into).collect();
        Ok(self.keys(as_of)?.is_subset(&other))
    }

    /// Whether every key of `other` is in this set.
    pub fn is_superset<K: Into<UserKey>>(
        &self,
        other: impl IntoIterator<Item = K>,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<bool> {
        let other: BTreeSet<UserKey> = other.into_iter().map(Into::into).collect();
        Ok(self.keys(as_of)?.is_superset(&other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, NOW};

    #[test]
    fn test_add_discard_remove() {
        let db = Database::in_memory().unwrap();
        let set = KeySet::create(&db, None).unwrap();
        set.update(["a", "b"], None).unwrap();
        set.add(5, None).unwrap();
        assert!(set.contains("a", NOW).unwrap());
        assert_eq!(set.size(NOW).unwrap(), 3);

        set.discard("zzz", None).unwrap();
        set.remove("a", None).unwrap();
        assert!(!set.contains("a", NOW).unwrap());
        assert!(matches!(set.remove("a", None), Err(Error::NotFound(_))));
        let keys: Vec<_> = set.keys(NOW).unwrap().into_iter().collect();
        assert_eq!(keys, vec![UserKey::from(5), UserKey::from("b")]);
    }

    #[test]
    fn test_set_operations() {
        let db = Database::in_memory().unwrap();
        let set = KeySet::arche(&db);
        set.update(["a", "b", "c"], None).unwrap();
        let key = |s: &str| UserKey::from(s);
        assert_eq!(set.intersection(["b", "z"], NOW).unwrap(), [key("b")].into());
        assert_eq!(set.difference(["b"], NOW).unwrap(), [key("a"), key("c")].into());
        assert_eq!(
            set.symmetric_difference(["c", "d"], NOW).unwrap(),
            [key("a"), key("b"), key("d")].into()
        );
        assert_eq!(set.union(["d"], NOW).unwrap().len(), 4);
        assert!(set.is_subset(["a", "b", "c", "d"], NOW).unwrap());
        assert!(set.is_superset(["a"], NOW).unwrap());
        assert!(!set.is_superset(["q"], NOW).unwrap());
    }
}
