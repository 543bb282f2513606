//! Delete cascade confirmation.
//!
//! The durable store asks a `CascadePolicy` once per cascade class before it
//! removes anything beyond the entity itself. Interactive callers answer from
//! a prompt; batch callers pass `CascadeAll` or `CascadeNone`.

use crate::model::identity::{EntityId, EntityKind};
use std::fmt::{Display, Formatter};

/// Groups of rows a delete may take with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CascadeClass {
    /// Decorators and annotations owned by the entity, and the decorators of
    /// those annotations.
    Attached,
    /// References from elsewhere that target the entity.
    IncomingReferences,
    /// Article/author association rows.
    Associations,
}

impl CascadeClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Attached => "attached",
            Self::IncomingReferences => "incoming_references",
            Self::Associations => "associations",
        }
    }
}

impl Display for CascadeClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether a delete should cascade into one class of dependents.
pub trait CascadePolicy {
    fn confirm(&mut self, kind: EntityKind, id: EntityId, class: CascadeClass) -> bool;
}

/// Cascades into every class.
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeAll;

impl CascadePolicy for CascadeAll {
    fn confirm(&mut self, _kind: EntityKind, _id: EntityId, _class: CascadeClass) -> bool {
        true
    }
}

/// Never cascades; dependents are left behind as orphans.
#[derive(Debug, Clone, Copy, Default)]
pub struct CascadeNone;

impl CascadePolicy for CascadeNone {
    fn confirm(&mut self, _kind: EntityKind, _id: EntityId, _class: CascadeClass) -> bool {
        false
    }
}

impl<F> CascadePolicy for F
where
    F: FnMut(EntityKind, EntityId, CascadeClass) -> bool,
{
    fn confirm(&mut self, kind: EntityKind, id: EntityId, class: CascadeClass) -> bool {
        self(kind, id, class)
    }
}
