//! Directory: user keys mapped to values or containers

use gink_core::proto::ChangeBuilder;
use gink_core::{Behavior, Bundler, EntryKey, Error, Muid, Result, UserKey};

use super::{container_facade, decode_contents, entry_in, Container, Contents};
use crate::attribution::Attribution;
use crate::clock::GenericTimestamp;

container_facade!(
    /// Map from [`UserKey`] to [`Contents`]; the newest write to a key wins.
    Directory,
    Behavior::Directory
);

impl Directory {
    /// Set `key` to `contents`.
    pub fn set(
        &self,
        key: impl Into<UserKey>,
        contents: impl Into<Contents>,
        bundler: Option<&mut Bundler>,
    ) -> Result<Muid> {
        let key = key.into();
        key.validate()?;
        let mut entry = entry_in(self.muid, Behavior::Directory);
        entry.key = Some(key.to_builder());
        contents.into().fill(&mut entry);
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Set every pair of `items` in one bundle.
    pub fn update<K, V>(
        &self,
        items: impl IntoIterator<Item = (K, V)>,
        bundler: Option<&mut Bundler>,
    ) -> Result<()>
    where
        K: Into<UserKey>,
        V: Into<Contents>,
    {
        self.db.in_bundle(bundler, "update", |bundler| {
            for (key, contents) in items {
                self.set(key, contents, Some(&mut *bundler))?;
            }
            Ok(())
        })
    }

    /// Contents of `key` as of a time.
    pub fn get(
        &self,
        key: impl Into<UserKey>,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<Option<Contents>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        self.db
            .store()
            .get_entry_by_key(self.muid, &EntryKey::Key(key.into()), as_of)?
            .as_ref()
            .map(decode_contents)
            .transpose()
            .map(Option::flatten)
    }

    /// Whether `key` is set.
    pub fn has(&self, key: impl Into<UserKey>, as_of: impl Into<GenericTimestamp>) -> Result<bool> {
        Ok(self.get(key, as_of)?.is_some())
    }

    /// Delete `key`. With `purge` its history is dropped too.
    pub fn delete(
        &self,
        key: impl Into<UserKey>,
        purge: bool,
        bundler: Option<&mut Bundler>,
    ) -> Result<Muid> {
        let mut entry = entry_in(self.muid, Behavior::Directory);
        entry.key = Some(key.into().to_builder());
        entry.deletion = true;
        entry.purge = purge;
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Delete `key`, returning what it held.
    pub fn pop(
        &self,
        key: impl Into<UserKey>,
        bundler: Option<&mut Bundler>,
    ) -> Result<Option<Contents>> {
        let key = key.into();
        let current = self.get(key.clone(), GenericTimestamp::Now)?;
        if current.is_some() {
            self.delete(key, false, bundler)?;
        }
        Ok(current)
    }

    /// Every set key with its contents, in key order.
    pub fn items(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<(UserKey, Contents)>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let mut items = Vec::new();
        for found in self
            .db
            .store()
            .get_keyed_entries(self.muid, Behavior::Directory, as_of)?
        {
            let key = found
                .builder
                .key
                .as_ref()
                .ok_or_else(|| Error::InvalidKey(format!("directory entry {} lacks a key", found.address)))
                .and_then(UserKey::from_builder)?;
            if let Some(contents) = decode_contents(&found)? {
                items.push((key, contents));
            }
        }
        Ok(items)
    }

    /// Set keys, in key order.
    pub fn keys(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<UserKey>> {
        Ok(self.items(as_of)?.into_iter().map(|(key, _)| key).collect())
    }

    /// Contents of the set keys, in key order.
    pub fn values(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<Contents>> {
        Ok(self.items(as_of)?.into_iter().map(|(_, contents)| contents).collect())
    }

    /// Number of set keys.
    pub fn size(&self, as_of: impl Into<GenericTimestamp>) -> Result<usize> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        Ok(self
            .db
            .store()
            .get_keyed_entries(self.muid, Behavior::Directory, as_of)?
            .len())
    }

    /// Who last wrote `key`, if it is set.
    pub fn blame(
        &self,
        key: impl Into<UserKey>,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<Option<Attribution>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let found = self
            .db
            .store()
            .get_entry_by_key(self.muid, &EntryKey::Key(key.into()), as_of)?;
        match found {
            Some(found) if !found.builder.deletion => self
                .db
                .get_attribution(found.address.timestamp, found.address.medallion)
                .map(Some),
            _ => Ok(None),
        }
    }

    /// Restore `key` to its contents at `to_time`.
    pub fn reset_key(
        &self,
        key: impl Into<UserKey>,
        to_time: impl Into<GenericTimestamp>,
        bundler: Option<&mut Bundler>,
    ) -> Result<usize> {
        self.reset(to_time, Some(&EntryKey::Key(key.into())), false, bundler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Database, NOW};

    #[test]
    fn test_set_get_delete() {
        let db = Database::in_memory().unwrap();
        let dir = Directory::create(&db, None).unwrap();
        dir.set("foo", "bar", None).unwrap();
        dir.set(7, 3.5, None).unwrap();
        assert_eq!(dir.get("foo", NOW).unwrap(), Some(Contents::from("bar")));
        assert!(dir.has(7, NOW).unwrap());
        assert_eq!(dir.size(NOW).unwrap(), 2);

        dir.delete("foo", false, None).unwrap();
        assert_eq!(dir.get("foo", NOW).unwrap(), None);
        assert_eq!(dir.keys(NOW).unwrap(), vec![UserKey::from(7)]);
    }

    #[test]
    fn test_items_in_key_order() {
        let db = Database::in_memory().unwrap();
        let dir = Directory::arche(&db);
        dir.update([("b", 2), ("a", 1), ("c", 3)], None).unwrap();
        let keys = dir.keys(NOW).unwrap();
        assert_eq!(keys, vec![UserKey::from("a"), UserKey::from("b"), UserKey::from("c")]);
        assert_eq!(
            dir.values(NOW).unwrap(),
            vec![Contents::from(1), Contents::from(2), Contents::from(3)]
        );
        // one bundle for the update plus the chain start
        assert_eq!(db.store().get_some_infos(-10).unwrap().len(), 2);
    }

    #[test]
    fn test_pop_returns_and_deletes() {
        let db = Database::in_memory().unwrap();
        let dir = Directory::arche(&db);
        dir.set("k", "v", None).unwrap();
        assert_eq!(dir.pop("k", None).unwrap(), Some(Contents::from("v")));
        assert_eq!(dir.pop("k", None).unwrap(), None);
        assert!(!dir.has("k", NOW).unwrap());
    }

    #[test]
    fn test_history_and_reset_key() {
        let db = Database::in_memory().unwrap();
        let dir = Directory::arche(&db);
        dir.set("x", 1, None).unwrap();
        let mark = db.now();
        dir.set("x", 2, None).unwrap();
        assert_eq!(dir.get("x", mark).unwrap(), Some(Contents::from(1)));
        assert_eq!(dir.reset_key("x", mark, None).unwrap(), 1);
        assert_eq!(dir.get("x", NOW).unwrap(), Some(Contents::from(1)));
    }

    #[test]
    fn test_blame_names_the_writer() {
        let db = Database::builder().identity("gus@shop").open().unwrap();
        let dir = Directory::arche(&db);
        assert!(dir.blame("k", NOW).unwrap().is_none());
        dir.set("k", "v", None).unwrap();
        let blame = dir.blame("k", NOW).unwrap().unwrap();
        assert_eq!(blame.identity.as_deref(), Some("gus@shop"));
        assert_eq!(Some(blame.medallion), db.chain().map(|c| c.medallion));
    }

    #[test]
    fn test_invalid_key_rejected() {
        let db = Database::in_memory().unwrap();
        let dir = Directory::arche(&db);
        assert!(dir.set(i64::MAX, 1, None).is_err());
    }

    #[test]
    fn test_recursive_key_reset_stays_on_that_key() {
        let db = Database::in_memory().unwrap();
        let dir = Directory::create(&db, None).unwrap();
        dir.set("me", dir.muid(), None).unwrap();
        dir.set("x", 1, None).unwrap();
        let mark = db.now();
        dir.set("x", 2, None).unwrap();

        let key = EntryKey::Key(UserKey::from("me"));
        assert_eq!(dir.reset(mark, Some(&key), true, None).unwrap(), 0);
        assert_eq!(dir.get("x", NOW).unwrap(), Some(Contents::from(2)));
    }
}
