//! Property: values attached to containers

use gink_core::proto::ChangeBuilder;
use gink_core::{Behavior, Bundler, EntryKey, Error, Muid, Result};

use super::{container_facade, decode_contents, entry_in, Contents};
use crate::clock::GenericTimestamp;

container_facade!(
    /// Map from a described muid to [`Contents`].
    ///
    /// The global instance holds container names.
    Property,
    Behavior::Property
);

impl Property {
    fn entry_for(&self, describing: Muid) -> gink_core::proto::EntryBuilder {
        let mut entry = entry_in(self.muid, Behavior::Property);
        entry.describing = Some(describing.to_builder());
        entry
    }

    /// Attach `contents` to `describing`.
    pub fn set(
        &self,
        describing: Muid,
        contents: impl Into<Contents>,
        bundler: Option<&mut Bundler>,
    ) -> Result<Muid> {
        let mut entry = self.entry_for(describing);
        contents.into().fill(&mut entry);
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// What is attached to `describing` as of a time.
    pub fn get(&self, describing: Muid, as_of: impl Into<GenericTimestamp>) -> Result<Option<Contents>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        self.db
            .store()
            .get_entry_by_key(self.muid, &EntryKey::Describing(describing), as_of)?
            .as_ref()
            .map(decode_contents)
            .transpose()
            .map(Option::flatten)
    }

    /// Detach whatever is attached to `describing`.
    pub fn delete(&self, describing: Muid, bundler: Option<&mut Bundler>) -> Result<Muid> {
        let mut entry = self.entry_for(describing);
        entry.deletion = true;
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Every described muid with its contents.
    pub fn items(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<(Muid, Contents)>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let mut items = Vec::new();
        for found in self
            .db
            .store()
            .get_keyed_entries(self.muid, Behavior::Property, as_of)?
        {
            let describing = found
                .builder
                .describing
                .as_ref()
                .map(|d| Muid::create(&found.address, Some(d)))
                .ok_or_else(|| {
                    Error::InvalidOperation(format!("property entry {} describes nothing", found.address))
                })?;
            if let Some(contents) = decode_contents(&found)? {
                items.push((describing, contents));
            }
        }
        Ok(items)
    }

    /// Number of described muids.
    pub fn size(&self, as_of: impl Into<GenericTimestamp>) -> Result<usize> {
        Ok(self.items(as_of)?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::{Container, Directory, Sequence};
    use crate::{Database, NOW};

    #[test]
    fn test_describe_containers() {
        let db = Database::in_memory().unwrap();
        let colors = Property::create(&db, None).unwrap();
        let dir = Directory::create(&db, None).unwrap();
        let seq = Sequence::create(&db, None).unwrap();

        colors.set(dir.muid(), "red", None).unwrap();
        colors.set(seq.muid(), "blue", None).unwrap();
        assert_eq!(colors.get(dir.muid(), NOW).unwrap(), Some(Contents::from("red")));
        assert_eq!(colors.size(NOW).unwrap(), 2);

        let describing = dir.get_describing(NOW).unwrap();
        assert_eq!(describing.len(), 1);

        colors.delete(dir.muid(), None).unwrap();
        assert_eq!(colors.get(dir.muid(), NOW).unwrap(), None);
        assert_eq!(colors.items(NOW).unwrap(), vec![(seq.muid(), Contents::from("blue"))]);
    }

    #[test]
    fn test_global_property_holds_names() {
        let db = Database::in_memory().unwrap();
        let dir = Directory::create(&db, None).unwrap();
        dir.set_name("inbox", None).unwrap();
        let names = Property::arche(&db);
        assert_eq!(names.get(dir.muid(), NOW).unwrap(), Some(Contents::from("inbox")));
    }
}
