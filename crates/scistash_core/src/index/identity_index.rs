//! Identifier-to-kind index.
//!
//! The index is owned by the session and handed to both stores by reference;
//! it is built from the durable store at session start and dropped with the
//! session.

use crate::model::identity::{EntityId, EntityKind};
use log::{debug, error};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type IndexResult<T> = Result<T, IndexError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// No store knows this identifier.
    UnknownIdentifier(EntityId),
    /// The identifier is already registered to a different kind.
    DuplicateIdentifierConflict {
        id: EntityId,
        registered: EntityKind,
        attempted: EntityKind,
    },
}

impl Display for IndexError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownIdentifier(id) => write!(f, "unknown identifier: {id}"),
            Self::DuplicateIdentifierConflict {
                id,
                registered,
                attempted,
            } => write!(
                f,
                "identifier {id} is registered as {registered}, refusing to register it as {attempted}"
            ),
        }
    }
}

impl Error for IndexError {}

/// Mapping from identifier to entity kind across both stores.
#[derive(Debug, Default, Clone)]
pub struct IdentityIndex {
    entries: BTreeMap<EntityId, EntityKind>,
}

impl IdentityIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds an index from `(id, kind)` pairs, typically every durable row.
    ///
    /// # Errors
    /// - `DuplicateIdentifierConflict` if two kinds share an id.
    pub fn from_entries(
        entries: impl IntoIterator<Item = (EntityId, EntityKind)>,
    ) -> IndexResult<Self> {
        let mut index = Self::new();
        for (id, kind) in entries {
            index.register(id, kind)?;
        }
        debug!(
            "event=index_build module=index status=ok entries={}",
            index.len()
        );
        Ok(index)
    }

    /// Registers `id` as `kind`. Registering the same pair again is a no-op.
    pub fn register(&mut self, id: EntityId, kind: EntityKind) -> IndexResult<()> {
        self.check(id, kind)?;
        self.entries.insert(id, kind);
        Ok(())
    }

    /// Verifies `id` could be registered as `kind` without changing anything.
    pub fn check(&self, id: EntityId, kind: EntityKind) -> IndexResult<()> {
        match self.entries.get(&id) {
            Some(registered) if *registered != kind => {
                error!(
                    "event=index_conflict module=index status=error id={} registered={} attempted={}",
                    id, registered, kind
                );
                Err(IndexError::DuplicateIdentifierConflict {
                    id,
                    registered: *registered,
                    attempted: kind,
                })
            }
            _ => Ok(()),
        }
    }

    pub fn resolve(&self, id: EntityId) -> IndexResult<EntityKind> {
        self.entries
            .get(&id)
            .copied()
            .ok_or(IndexError::UnknownIdentifier(id))
    }

    /// Removes `id`, returning the kind it was registered as.
    pub fn forget(&mut self, id: EntityId) -> Option<EntityKind> {
        self.entries.remove(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, EntityKind)> + '_ {
        self.entries.iter().map(|(id, kind)| (*id, *kind))
    }
}

#[cfg(test)]
mod tests {
    use super::{IdentityIndex, IndexError};
    use crate::model::identity::EntityKind;
    use uuid::Uuid;

    #[test]
    fn register_is_idempotent_for_same_kind() {
        let mut index = IdentityIndex::new();
        let id = Uuid::new_v4();
        index.register(id, EntityKind::Tag).unwrap();
        index.register(id, EntityKind::Tag).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.resolve(id).unwrap(), EntityKind::Tag);
    }

    #[test]
    fn register_surfaces_cross_kind_collision() {
        let mut index = IdentityIndex::new();
        let id = Uuid::new_v4();
        index.register(id, EntityKind::Author).unwrap();

        let err = index.register(id, EntityKind::Article).unwrap_err();
        assert_eq!(
            err,
            IndexError::DuplicateIdentifierConflict {
                id,
                registered: EntityKind::Author,
                attempted: EntityKind::Article,
            }
        );
        assert_eq!(index.resolve(id).unwrap(), EntityKind::Author);
    }

    #[test]
    fn forget_makes_id_unresolvable() {
        let mut index = IdentityIndex::new();
        let id = Uuid::new_v4();
        index.register(id, EntityKind::File).unwrap();

        assert_eq!(index.forget(id), Some(EntityKind::File));
        assert_eq!(index.forget(id), None);
        assert_eq!(
            index.resolve(id).unwrap_err(),
            IndexError::UnknownIdentifier(id)
        );
    }

    #[test]
    fn from_entries_rejects_conflicting_rows() {
        let id = Uuid::new_v4();
        let result = IdentityIndex::from_entries([
            (id, EntityKind::Author),
            (id, EntityKind::Annotation),
        ]);
        assert!(matches!(
            result,
            Err(IndexError::DuplicateIdentifierConflict { .. })
        ));
    }
}
