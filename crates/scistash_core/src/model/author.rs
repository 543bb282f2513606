//! Author entity.

use crate::model::identity::{derive_id, EntityId, EntityKind, Identity, Origin};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

/// A person credited on articles. Identity = first name + last name.
#[derive(Debug, Clone, Serialize)]
pub struct Author {
    #[serde(flatten)]
    identity: Identity,
    first_name: String,
    last_name: String,
}

impl Author {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        let first_name = first_name.into();
        let last_name = last_name.into();
        let id = derive_id(EntityKind::Author, content(&first_name, &last_name).as_bytes());
        Self {
            identity: Identity::fresh(id),
            first_name,
            last_name,
        }
    }

    pub(crate) fn hydrate(stored_id: EntityId, first_name: String, last_name: String) -> Self {
        let derived = derive_id(EntityKind::Author, content(&first_name, &last_name).as_bytes());
        Self {
            identity: Identity::hydrated(derived, stored_id),
            first_name,
            last_name,
        }
    }

    pub fn id(&self) -> EntityId {
        self.identity.id()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    pub fn origin(&self) -> Origin {
        self.identity.origin()
    }

    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    pub fn set_first_name(&mut self, value: impl Into<String>) {
        self.first_name = value.into();
        self.rekey();
    }

    pub fn set_last_name(&mut self, value: impl Into<String>) {
        self.last_name = value.into();
        self.rekey();
    }

    /// Recomputes the identifier from current fields.
    pub fn derive_id(&self) -> EntityId {
        derive_id(
            EntityKind::Author,
            content(&self.first_name, &self.last_name).as_bytes(),
        )
    }

    /// `Last, First` form used in listings and article bylines.
    pub fn formal_name(&self) -> String {
        format!("{}, {}", self.last_name, self.first_name)
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.identity.mark_persisted();
    }

    fn rekey(&mut self) {
        let next = self.derive_id();
        self.identity.rekey(next);
    }
}

fn content(first_name: &str, last_name: &str) -> String {
    format!("{first_name}{last_name}")
}

impl PartialEq for Author {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Author {}

impl Hash for Author {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl Display for Author {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "==> Author: {}\n\t{}", self.id(), self.formal_name())
    }
}
