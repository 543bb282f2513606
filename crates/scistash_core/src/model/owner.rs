//! Owner references for annotations and decorators.

use crate::model::identity::{EntityId, EntityKind};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;

/// Identifier plus kind of the entity something hangs off.
///
/// The kind is carried alongside the id because lookups by owner are keyed on
/// both columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OwnerRef {
    pub id: EntityId,
    pub kind: EntityKind,
}

impl OwnerRef {
    pub fn new(id: EntityId, kind: EntityKind) -> Self {
        Self { id, kind }
    }
}

impl Display for OwnerRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "<{},{}>", self.id, self.kind)
    }
}

/// Construction-time model violations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// `kind` may not hang off an owner of kind `owner`.
    InvalidOwner {
        kind: EntityKind,
        owner: EntityKind,
    },
    /// Attachment source could not be read from disk.
    UnreadableFile { path: PathBuf, reason: String },
}

impl Display for ModelError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidOwner { kind, owner } => {
                write!(f, "a {kind} cannot be attached to a {owner}")
            }
            Self::UnreadableFile { path, reason } => {
                write!(f, "cannot read attachment `{}`: {reason}", path.display())
            }
        }
    }
}

impl Error for ModelError {}

pub(crate) fn ensure_owner(kind: EntityKind, owner: OwnerRef) -> Result<(), ModelError> {
    if kind.may_be_owned_by(owner.kind) {
        Ok(())
    } else {
        Err(ModelError::InvalidOwner {
            kind,
            owner: owner.kind,
        })
    }
}
