//! Identity contract shared by every stash entity.
//!
//! # Responsibility
//! - Define the closed set of entity kinds and their ownership capabilities.
//! - Derive content-addressed identifiers and track re-keying state.
//!
//! # Invariants
//! - `id` always equals `derive_id(kind, canonical content)`.
//! - `prior` anchors the identifier under which the entity was last persisted
//!   (or first derived, for fresh entities); it moves only on persistence.
//! - The kind tag is part of every hash input, so two kinds never share an id
//!   for the same content.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Content-derived identifier used as primary key across all stores.
pub type EntityId = Uuid;

/// Closed set of entity kinds known by the stash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Author,
    Article,
    Annotation,
    Tag,
    File,
    Reference,
}

impl EntityKind {
    /// Every kind in commit order: owners before the things that hang off them.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Author,
        EntityKind::Article,
        EntityKind::Annotation,
        EntityKind::Tag,
        EntityKind::File,
        EntityKind::Reference,
    ];

    /// Stable lowercase tag used in hash input and in `owner_kind` columns.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Author => "author",
            Self::Article => "article",
            Self::Annotation => "annotation",
            Self::Tag => "tag",
            Self::File => "file",
            Self::Reference => "reference",
        }
    }

    /// Durable table holding rows of this kind.
    pub fn table(self) -> &'static str {
        match self {
            Self::Author => "authors",
            Self::Article => "articles",
            Self::Annotation => "annotations",
            Self::Tag => "tags",
            Self::File => "files",
            Self::Reference => "refs",
        }
    }

    /// Parses either the singular tag or the plural table name.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "author" | "authors" => Some(Self::Author),
            "article" | "articles" => Some(Self::Article),
            "annotation" | "annotations" | "annots" => Some(Self::Annotation),
            "tag" | "tags" => Some(Self::Tag),
            "file" | "files" => Some(Self::File),
            "reference" | "references" | "ref" | "refs" => Some(Self::Reference),
            _ => None,
        }
    }

    /// Tags, files and references; they own nothing themselves.
    pub fn is_decorator(self) -> bool {
        matches!(self, Self::Tag | Self::File | Self::Reference)
    }

    pub fn may_have_tags(self) -> bool {
        matches!(self, Self::Author | Self::Article | Self::Annotation)
    }

    pub fn may_have_files(self) -> bool {
        matches!(self, Self::Author | Self::Article | Self::Annotation)
    }

    /// Authors are cited, they never cite.
    pub fn may_have_references(self) -> bool {
        matches!(self, Self::Article | Self::Annotation)
    }

    pub fn may_have_annotations(self) -> bool {
        matches!(self, Self::Author | Self::Article)
    }

    /// Whether an entity of this kind may hang off an owner of `owner` kind.
    pub fn may_be_owned_by(self, owner: EntityKind) -> bool {
        match self {
            Self::Annotation => owner.may_have_annotations(),
            Self::Tag => owner.may_have_tags(),
            Self::File => owner.may_have_files(),
            Self::Reference => owner.may_have_references(),
            Self::Author | Self::Article => false,
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an entity instance came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Constructed in this session, never committed.
    Fresh,
    /// Hydrated from, or already committed to, the durable store.
    Durable,
}

/// Derives the identifier for `content` of the given kind.
///
/// UUID v3 (OID namespace) over `"<kind>:" + content`.
pub fn derive_id(kind: EntityKind, content: &[u8]) -> EntityId {
    let mut name = Vec::with_capacity(kind.as_str().len() + 1 + content.len());
    name.extend_from_slice(kind.as_str().as_bytes());
    name.push(b':');
    name.extend_from_slice(content);
    Uuid::new_v3(&Uuid::NAMESPACE_OID, &name)
}

/// Identifier change applied to a stored or staged entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Rekey {
    pub kind: EntityKind,
    pub old_id: EntityId,
    pub new_id: EntityId,
}

/// Identifier bookkeeping embedded in every entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Identity {
    id: EntityId,
    prior: Option<EntityId>,
    origin: Origin,
}

impl Identity {
    pub(crate) fn fresh(id: EntityId) -> Self {
        Self {
            id,
            prior: None,
            origin: Origin::Fresh,
        }
    }

    /// Identity for a row loaded from the durable store under `stored_id`.
    ///
    /// A row stored under a stale id comes back dirty (`id != prior`).
    pub(crate) fn hydrated(derived: EntityId, stored_id: EntityId) -> Self {
        Self {
            id: derived,
            prior: Some(stored_id),
            origin: Origin::Durable,
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    pub fn prior(&self) -> Option<EntityId> {
        self.prior
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    /// True when the content differs from what was last persisted.
    pub fn is_dirty(&self) -> bool {
        match self.origin {
            Origin::Fresh => true,
            Origin::Durable => self.prior != Some(self.id),
        }
    }

    /// Identifier under which a durable row may still be stored, if it differs
    /// from the current one.
    pub fn stale_id(&self) -> Option<EntityId> {
        self.prior.filter(|prior| *prior != self.id)
    }

    /// Replaces the identifier after a content change.
    pub(crate) fn rekey(&mut self, next: EntityId) {
        if next == self.id {
            return;
        }
        if self.prior.is_none() {
            self.prior = Some(self.id);
        }
        self.id = next;
    }

    /// Records that the current content is now durable.
    pub(crate) fn mark_persisted(&mut self) {
        self.prior = Some(self.id);
        self.origin = Origin::Durable;
    }
}
