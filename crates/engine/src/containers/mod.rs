//! Container facades
//!
//! Typed handles over the entry model. A facade holds a [`Database`] and a
//! container muid and nothing else: writes build entry, movement or
//! clearance changes and hand them to the database, reads decode what the
//! store returns. Multiple handles on one container are safe.
//!
//! Every write takes `bundler: Option<&mut Bundler>`:
//!
//! - `None` commits the change at once and returns its absolute muid
//! - `Some(bundler)` only adds the change; the returned muid is relative to
//!   the bundle until it is committed
//!
//! Every read takes an `as_of` ([`NOW`](crate::NOW) for current state).
//!
//! ```text
//! let root = Directory::arche(&db);
//! let mut bundler = db.start_bundle("two at once");
//! root.set("a", 1, Some(&mut bundler))?;
//! root.set("b", 2, Some(&mut bundler))?;
//! db.commit(bundler)?;
//! ```

pub mod accumulator;
pub mod box_container;
pub mod directory;
pub mod graph;
pub mod group;
pub mod key_set;
pub mod pair_map;
pub mod pair_set;
pub mod property;
pub mod sequence;

pub use accumulator::Accumulator;
pub use box_container::BoxContainer;
pub use directory::Directory;
pub use graph::{Edge, EdgeType, Vertex};
pub use group::Group;
pub use key_set::KeySet;
pub use pair_map::PairMap;
pub use pair_set::PairSet;
pub use property::Property;
pub use sequence::Sequence;

use gink_core::codec::decode_entry_occupant;
use gink_core::proto::{ChangeBuilder, ClearanceBuilder, ContainerBuilder, EntryBuilder};
use gink_core::{Behavior, Bundler, EntryKey, Error, FoundEntry, Muid, Occupant, Result, Value};

use crate::clock::GenericTimestamp;
use crate::database::Database;

/// What an entry holds: an immediate value or a reference to a container.
#[derive(Debug, Clone, PartialEq)]
pub enum Contents {
    /// Immediate value
    Value(Value),
    /// Another container
    Container(Muid),
}

impl Contents {
    /// The value, if this is one.
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Contents::Value(value) => Some(value),
            Contents::Container(_) => None,
        }
    }

    /// The container muid, if this is a reference.
    pub fn as_container(&self) -> Option<Muid> {
        match self {
            Contents::Container(muid) => Some(*muid),
            Contents::Value(_) => None,
        }
    }

    /// Store as the value or pointee of `entry`.
    pub(crate) fn fill(self, entry: &mut EntryBuilder) {
        match self {
            Contents::Value(value) => entry.value = Some(value.to_builder()),
            Contents::Container(muid) => entry.pointee = Some(muid.to_builder()),
        }
    }
}

impl From<Muid> for Contents {
    fn from(muid: Muid) -> Self {
        Contents::Container(muid)
    }
}

macro_rules! contents_from_value {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Contents {
                fn from(value: $t) -> Self {
                    Contents::Value(Value::from(value))
                }
            }
        )*
    };
}

contents_from_value!(&str, String, bool, i64, i32, f64, Vec<u8>);

impl From<Value> for Contents {
    fn from(value: Value) -> Self {
        Contents::Value(value)
    }
}

/// What a found entry holds; `None` for deletions and bare inclusions.
pub(crate) fn decode_contents(entry: &FoundEntry) -> Result<Option<Contents>> {
    occupant_contents(entry.address, &entry.builder)
}

pub(crate) fn occupant_contents(address: Muid, builder: &EntryBuilder) -> Result<Option<Contents>> {
    Ok(match decode_entry_occupant(address, builder)? {
        Occupant::Value(value) => Some(Contents::Value(value)),
        Occupant::Pointee(muid) => Some(Contents::Container(muid)),
        Occupant::Deletion | Occupant::Inclusion => None,
    })
}

/// Entry of `behavior` in `container`, to be completed by the caller.
pub(crate) fn entry_in(container: Muid, behavior: Behavior) -> EntryBuilder {
    EntryBuilder {
        behavior: behavior as i32,
        container: Some(container.to_builder()),
        ..Default::default()
    }
}

/// Define a new container of `behavior`.
pub(crate) fn create_container(
    db: &Database,
    behavior: Behavior,
    bundler: Option<&mut Bundler>,
) -> Result<Muid> {
    db.write_change(
        bundler,
        ChangeBuilder::container(ContainerBuilder {
            behavior: behavior as i32,
        }),
    )
}

/// Check that `muid` names a container of `behavior`.
pub(crate) fn check_container(db: &Database, muid: Muid, behavior: Behavior) -> Result<()> {
    let found = if muid.is_instance_container() {
        muid.instance_behavior()
    } else {
        db.store()
            .get_container(muid)?
            .and_then(|c| Behavior::from_i32(c.behavior))
    };
    match found {
        Some(b) if b == behavior => Ok(()),
        Some(b) => Err(Error::InvalidOperation(format!(
            "{muid} is a {b}, not a {behavior}"
        ))),
        None => Err(Error::NotFound(format!("no container {muid}"))),
    }
}

/// Operations shared by every container type.
pub trait Container {
    /// The database this handle writes to.
    fn database(&self) -> &Database;

    /// Address of the container.
    fn muid(&self) -> Muid;

    /// Container type.
    fn behavior(&self) -> Behavior;

    /// Hide everything currently in the container.
    ///
    /// With `purge` the hidden entries are dropped from history too.
    fn clear(&self, purge: bool, bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.database().write_change(
            bundler,
            ChangeBuilder::clearance(ClearanceBuilder {
                container: Some(self.muid().to_builder()),
                purge,
            }),
        )
    }

    /// Restore the container (or one key of it) to its state at `to_time`.
    ///
    /// With `recursive`, containers it points to are reset too. Returns the
    /// number of changes written.
    fn reset(
        &self,
        to_time: impl Into<GenericTimestamp>,
        key: Option<&EntryKey>,
        recursive: bool,
        bundler: Option<&mut Bundler>,
    ) -> Result<usize> {
        let db = self.database();
        let to_time = db.resolve_timestamp(to_time)?;
        let changes = db
            .store()
            .get_reset_changes(to_time, Some(self.muid()), key, recursive)?;
        db.write_changes(bundler, "reset", changes)
    }

    /// Name the container (a value in the global property).
    fn set_name(&self, name: &str, bundler: Option<&mut Bundler>) -> Result<Muid> {
        let mut entry = entry_in(Muid::arche(Behavior::Property), Behavior::Property);
        entry.describing = Some(self.muid().to_builder());
        entry.value = Some(Value::from(name).to_builder());
        self.database().write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Name of the container, if it has one.
    fn get_name(&self, as_of: impl Into<GenericTimestamp>) -> Result<Option<String>> {
        let db = self.database();
        let as_of = db.resolve_timestamp(as_of)?;
        let found = db.store().get_entry_by_key(
            Muid::arche(Behavior::Property),
            &EntryKey::Describing(self.muid()),
            as_of,
        )?;
        Ok(match found.as_ref().map(decode_contents).transpose()?.flatten() {
            Some(Contents::Value(Value::String(name))) => Some(name),
            _ => None,
        })
    }

    /// Property and group entries describing this container.
    fn get_describing(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<FoundEntry>> {
        let db = self.database();
        let as_of = db.resolve_timestamp(as_of)?;
        db.store().get_by_describing(self.muid(), as_of)
    }
}

/// Struct, constructors and [`Container`] impl of one facade type.
macro_rules! container_facade {
    ($(#[$doc:meta])* $name:ident, $behavior:expr) => {
        $(#[$doc])*
        #[derive(Debug, Clone)]
        pub struct $name {
            db: $crate::database::Database,
            muid: gink_core::Muid,
        }

        impl $name {
            /// Handle on the global instance.
            pub fn arche(db: &$crate::database::Database) -> Self {
                Self {
                    db: db.clone(),
                    muid: gink_core::Muid::arche($behavior),
                }
            }

            /// Define a new, empty container.
            ///
            /// With a bundler the handle's muid stays relative until the
            /// bundle is committed; use it only for writes into that bundle.
            pub fn create(
                db: &$crate::database::Database,
                bundler: Option<&mut gink_core::Bundler>,
            ) -> gink_core::Result<Self> {
                let muid = $crate::containers::create_container(db, $behavior, bundler)?;
                Ok(Self { db: db.clone(), muid })
            }

            /// Handle on an existing container.
            pub fn open(
                db: &$crate::database::Database,
                muid: gink_core::Muid,
            ) -> gink_core::Result<Self> {
                $crate::containers::check_container(db, muid, $behavior)?;
                Ok(Self { db: db.clone(), muid })
            }
        }

        impl $crate::containers::Container for $name {
            fn database(&self) -> &$crate::database::Database {
                &self.db
            }

            fn muid(&self) -> gink_core::Muid {
                self.muid
            }

            fn behavior(&self) -> gink_core::Behavior {
                $behavior
            }
        }
    };
}

pub(crate) use container_facade;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::NOW;

    #[test]
    fn test_contents_conversions() {
        assert_eq!(Contents::from("x"), Contents::Value(Value::String("x".to_string())));
        assert_eq!(Contents::from(3), Contents::Value(Value::Int(3)));
        let muid = Muid::new(1_700_000_000_000_000, 9, 2);
        assert_eq!(Contents::from(muid).as_container(), Some(muid));
        assert!(Contents::from(1.5).as_value().is_some());
    }

    #[test]
    fn test_open_checks_behavior() {
        let db = Database::in_memory().unwrap();
        let dir = Directory::create(&db, None).unwrap();
        assert!(Directory::open(&db, dir.muid()).is_ok());
        assert!(matches!(
            KeySet::open(&db, dir.muid()),
            Err(Error::InvalidOperation(_))
        ));
        assert!(matches!(
            Directory::open(&db, Muid::new(1_700_000_000_000_000, 5, 1)),
            Err(Error::NotFound(_))
        ));
        assert!(Sequence::open(&db, Muid::arche(Behavior::Sequence)).is_ok());
    }

    #[test]
    fn test_names() {
        let db = Database::in_memory().unwrap();
        let dir = Directory::create(&db, None).unwrap();
        assert_eq!(dir.get_name(NOW).unwrap(), None);
        dir.set_name("settings", None).unwrap();
        assert_eq!(dir.get_name(NOW).unwrap().as_deref(), Some("settings"));
        let named = db.get_by_name("settings", NOW).unwrap();
        assert_eq!(named.len(), 1);
        assert_eq!(named[0].address, dir.muid());

        dir.set_name("config", None).unwrap();
        assert!(db.get_by_name("settings", NOW).unwrap().is_empty());
        assert_eq!(db.get_by_name("config", NOW).unwrap().len(), 1);
    }

    #[test]
    fn test_clear_hides_earlier_entries() {
        let db = Database::in_memory().unwrap();
        let dir = Directory::create(&db, None).unwrap();
        dir.set("a", 1, None).unwrap();
        let before_clear = db.now();
        dir.clear(false, None).unwrap();
        assert_eq!(dir.size(NOW).unwrap(), 0);
        assert_eq!(dir.size(before_clear).unwrap(), 1);
        dir.set("b", 2, None).unwrap();
        assert_eq!(dir.keys(NOW).unwrap(), vec![gink_core::UserKey::from("b")]);
    }

    #[test]
    fn test_bundled_writes_commit_together() {
        let db = Database::in_memory().unwrap();
        let root = Directory::arche(&db);
        let mut bundler = db.start_bundle("pair");
        let first = root.set("a", 1, Some(&mut bundler)).unwrap();
        let second = root.set("b", 2, Some(&mut bundler)).unwrap();
        assert_eq!((first.offset, second.offset), (1, 2));
        assert_eq!(root.size(NOW).unwrap(), 0);
        let info = db.commit(bundler).unwrap();
        assert_eq!(root.size(NOW).unwrap(), 2);
        assert_eq!(info.comment, "pair");
    }
}
