//! Group: a set of member containers

use gink_core::proto::ChangeBuilder;
use gink_core::{Behavior, Bundler, EntryKey, Error, Muid, Result};

use super::{container_facade, entry_in};
use crate::clock::GenericTimestamp;

container_facade!(
    /// Set of member muids.
    Group,
    Behavior::Group
);

impl Group {
    fn write(&self, member: Muid, deletion: bool, bundler: Option<&mut Bundler>) -> Result<Muid> {
        let mut entry = entry_in(self.muid, Behavior::Group);
        entry.describing = Some(member.to_builder());
        entry.deletion = deletion;
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Add `member`.
    pub fn include(&self, member: Muid, bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.write(member, false, bundler)
    }

    /// Drop `member`.
    pub fn exclude(&self, member: Muid, bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.write(member, true, bundler)
    }

    /// Whether `member` belongs.
    pub fn contains(&self, member: Muid, as_of: impl Into<GenericTimestamp>) -> Result<bool> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let found = self
            .db
            .store()
            .get_entry_by_key(self.muid, &EntryKey::Describing(member), as_of)?;
        Ok(found.is_some_and(|f| !f.builder.deletion))
    }

    /// Members, in muid order.
    pub fn member_ids(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<Muid>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        self.db
            .store()
            .get_keyed_entries(self.muid, Behavior::Group, as_of)?
            .iter()
            .map(|found| {
                found
                    .builder
                    .describing
                    .as_ref()
                    .map(|d| Muid::create(&found.address, Some(d)))
                    .ok_or_else(|| {
                        Error::InvalidOperation(format!("group entry {} has no member", found.address))
                    })
            })
            .collect()
    }

    /// Number of members.
    pub fn size(&self, as_of: impl Into<GenericTimestamp>) -> Result<usize> {
        Ok(self.member_ids(as_of)?.len())
    }
}
