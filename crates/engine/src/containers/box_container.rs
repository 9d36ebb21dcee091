//! Box: a container holding at most one value

use gink_core::proto::ChangeBuilder;
use gink_core::{Behavior, Bundler, EntryKey, Muid, Result};

use super::{container_facade, decode_contents, entry_in, Container, Contents};
use crate::clock::GenericTimestamp;

container_facade!(
    /// Holds a single value or container reference; each set replaces the last.
    BoxContainer,
    Behavior::Box
);

impl BoxContainer {
    /// Put `contents` in the box.
    pub fn set(&self, contents: impl Into<Contents>, bundler: Option<&mut Bundler>) -> Result<Muid> {
        let mut entry = entry_in(self.muid, Behavior::Box);
        contents.into().fill(&mut entry);
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// What the box held as of a time.
    pub fn get(&self, as_of: impl Into<GenericTimestamp>) -> Result<Option<Contents>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        self.db
            .store()
            .get_entry_by_key(self.muid(), &EntryKey::Unkeyed, as_of)?
            .as_ref()
            .map(decode_contents)
            .transpose()
            .map(Option::flatten)
    }

    /// 1 when the box holds something, else 0.
    pub fn size(&self, as_of: impl Into<GenericTimestamp>) -> Result<usize> {
        Ok(usize::from(self.get(as_of)?.is_some()))
    }

    /// True when the box holds nothing.
    pub fn is_empty(&self, as_of: impl Into<GenericTimestamp>) -> Result<bool> {
        Ok(self.get(as_of)?.is_none())
    }
}
