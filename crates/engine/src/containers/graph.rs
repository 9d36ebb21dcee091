//! Graph: vertices, edge types and edges
//!
//! A vertex is a container whose single unkeyed entry says whether it is
//! alive. Edges are entries of an edge type whose pair is (source, target);
//! they can carry a value and are removed by a movement.

use gink_core::codec::{container_of, pair_of};
use gink_core::proto::{ChangeBuilder, MovementBuilder, PairBuilder};
use gink_core::{Behavior, Bundler, EntryKey, Error, FoundEntry, Muid, Result, Value};

use super::{container_facade, entry_in};
use crate::clock::GenericTimestamp;
use crate::database::Database;

container_facade!(
    /// Graph node that can be removed and revived.
    Vertex,
    Behavior::Vertex
);

impl Vertex {
    fn mark(&self, deletion: bool, purge: bool, bundler: Option<&mut Bundler>) -> Result<Muid> {
        let mut entry = entry_in(self.muid, Behavior::Vertex);
        entry.deletion = deletion;
        entry.purge = purge;
        self.db.write_change(bundler, ChangeBuilder::entry(entry))
    }

    /// Whether the vertex existed and was not removed as of a time.
    pub fn is_alive(&self, as_of: impl Into<GenericTimestamp>) -> Result<bool> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        if !self.muid.is_instance_container() && self.muid.timestamp >= as_of {
            return Ok(false);
        }
        let found = self
            .db
            .store()
            .get_entry_by_key(self.muid, &EntryKey::Unkeyed, as_of)?;
        Ok(!found.is_some_and(|f| f.builder.deletion))
    }

    /// Mark the vertex removed.
    pub fn remove(&self, purge: bool, bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.mark(true, purge, bundler)
    }

    /// Bring a removed vertex back.
    pub fn revive(&self, bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.mark(false, false, bundler)
    }

    /// Edges leaving this vertex, of any type.
    pub fn edges_from(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<Edge>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let found = self.db.store().get_edge_entries(as_of, None, Some(self.muid), None)?;
        found.into_iter().map(|f| Edge::from_found(&self.db, f)).collect()
    }

    /// Edges arriving at this vertex, of any type.
    pub fn edges_to(&self, as_of: impl Into<GenericTimestamp>) -> Result<Vec<Edge>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let found = self.db.store().get_edge_entries(as_of, None, None, Some(self.muid))?;
        found.into_iter().map(|f| Edge::from_found(&self.db, f)).collect()
    }
}

container_facade!(
    /// Collection of edges of one kind.
    EdgeType,
    Behavior::EdgeType
);

impl EdgeType {
    /// Connect `source` to `target`, optionally carrying `value`.
    ///
    /// With a bundler the edge's muid stays relative until the bundle is
    /// committed.
    pub fn create_edge(
        &self,
        source: Muid,
        target: Muid,
        value: Option<Value>,
        bundler: Option<&mut Bundler>,
    ) -> Result<Edge> {
        let mut entry = entry_in(self.muid, Behavior::EdgeType);
        entry.pair = Some(PairBuilder {
            left: Some(source.to_builder()),
            rite: Some(target.to_builder()),
        });
        entry.value = value.as_ref().map(Value::to_builder);
        let muid = self.db.write_change(bundler, ChangeBuilder::entry(entry))?;
        Ok(Edge {
            db: self.db.clone(),
            muid,
            edge_type: self.muid,
            source,
            target,
            value,
        })
    }

    /// Edges of this type, optionally only those from `source` or to `target`.
    pub fn get_edges(
        &self,
        source: Option<Muid>,
        target: Option<Muid>,
        as_of: impl Into<GenericTimestamp>,
    ) -> Result<Vec<Edge>> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        let found = self
            .db
            .store()
            .get_edge_entries(as_of, Some(self.muid), source, target)?;
        found.into_iter().map(|f| Edge::from_found(&self.db, f)).collect()
    }

    /// Number of edges of this type.
    pub fn size(&self, as_of: impl Into<GenericTimestamp>) -> Result<usize> {
        Ok(self.get_edges(None, None, as_of)?.len())
    }
}

/// One edge: an entry of an [`EdgeType`].
#[derive(Debug, Clone)]
pub struct Edge {
    db: Database,
    muid: Muid,
    edge_type: Muid,
    source: Muid,
    target: Muid,
    value: Option<Value>,
}

impl Edge {
    /// Load the edge written as entry `muid`.
    pub fn load(db: &Database, muid: Muid) -> Result<Edge> {
        let builder = db
            .store()
            .get_entry(muid)?
            .ok_or_else(|| Error::NotFound(format!("no edge {muid}")))?;
        Edge::from_found(db, FoundEntry { address: muid, builder })
    }

    fn from_found(db: &Database, found: FoundEntry) -> Result<Edge> {
        if found.builder.behavior != Behavior::EdgeType as i32 {
            return Err(Error::InvalidOperation(format!("{} is not an edge", found.address)));
        }
        let (source, target) = pair_of(&found.builder, found.address)?;
        Ok(Edge {
            db: db.clone(),
            muid: found.address,
            edge_type: container_of(&found.builder, found.address)?,
            source,
            target,
            value: found.builder.value.as_ref().map(Value::from_builder).transpose()?,
        })
    }

    /// Entry muid of the edge.
    pub fn muid(&self) -> Muid {
        self.muid
    }

    /// Edge type container.
    pub fn edge_type(&self) -> Muid {
        self.edge_type
    }

    /// Vertex the edge leaves.
    pub fn source(&self) -> Muid {
        self.source
    }

    /// Vertex the edge arrives at.
    pub fn target(&self) -> Muid {
        self.target
    }

    /// Value carried by the edge.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Whether the edge was placed and not removed as of a time.
    pub fn is_alive(&self, as_of: impl Into<GenericTimestamp>) -> Result<bool> {
        let as_of = self.db.resolve_timestamp(as_of)?;
        Ok(self.db.store().get_positioned_entry(self.muid, as_of)?.is_some())
    }

    /// Remove the edge; with `purge` it is dropped from history too.
    pub fn remove(&self, purge: bool, bundler: Option<&mut Bundler>) -> Result<Muid> {
        self.db.write_change(
            bundler,
            ChangeBuilder::movement(MovementBuilder {
                container: Some(self.edge_type.to_builder()),
                entry: Some(self.muid.to_builder()),
                dest: 0,
                purge,
            }),
        )
    }
}

impl PartialEq for Edge {
    fn eq(&self, other: &Self) -> bool {
        self.muid == other.muid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::Container;
    use crate::NOW;

    #[test]
    fn test_vertex_lifecycle() {
        let db = Database::in_memory().unwrap();
        let vertex = Vertex::create(&db, None).unwrap();
        assert!(vertex.is_alive(NOW).unwrap());
        let alive_at = db.now();
        vertex.remove(false, None).unwrap();
        assert!(!vertex.is_alive(NOW).unwrap());
        assert!(vertex.is_alive(alive_at).unwrap());
        vertex.revive(None).unwrap();
        assert!(vertex.is_alive(NOW).unwrap());
    }

    #[test]
    fn test_edges() {
        let db = Database::in_memory().unwrap();
        let knows = EdgeType::create(&db, None).unwrap();
        let alice = Vertex::create(&db, None).unwrap();
        let bob = Vertex::create(&db, None).unwrap();
        let carol = Vertex::create(&db, None).unwrap();

        let ab = knows
            .create_edge(alice.muid(), bob.muid(), Some(Value::from("since 2019")), None)
            .unwrap();
        knows.create_edge(alice.muid(), carol.muid(), None, None).unwrap();
        knows.create_edge(bob.muid(), carol.muid(), None, None).unwrap();

        assert_eq!(knows.size(NOW).unwrap(), 3);
        assert_eq!(knows.get_edges(Some(alice.muid()), None, NOW).unwrap().len(), 2);
        assert_eq!(carol.edges_to(NOW).unwrap().len(), 2);

        let loaded = Edge::load(&db, ab.muid()).unwrap();
        assert_eq!(loaded, ab);
        assert_eq!(loaded.source(), alice.muid());
        assert_eq!(loaded.target(), bob.muid());
        assert_eq!(loaded.edge_type(), knows.muid());
        assert_eq!(loaded.value(), Some(&Value::from("since 2019")));

        ab.remove(false, None).unwrap();
        assert!(!ab.is_alive(NOW).unwrap());
        assert_eq!(alice.edges_from(NOW).unwrap().len(), 1);
    }
}
