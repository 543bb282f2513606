//! Annotation entity: a free-text note attached to an author or article.

use crate::model::identity::{derive_id, EntityId, EntityKind, Identity, Origin};
use crate::model::owner::{ensure_owner, ModelError, OwnerRef};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

#[derive(Debug, Clone, Serialize)]
pub struct Annotation {
    #[serde(flatten)]
    identity: Identity,
    owner: OwnerRef,
    summary: String,
    body: String,
}

impl Annotation {
    /// Creates an annotation on an author or article.
    ///
    /// # Errors
    /// - `ModelError::InvalidOwner` for any other owner kind.
    pub fn new(
        owner: OwnerRef,
        summary: impl Into<String>,
        body: impl Into<String>,
    ) -> Result<Self, ModelError> {
        ensure_owner(EntityKind::Annotation, owner)?;
        let summary = summary.into();
        let body = body.into();
        let id = derive_id(EntityKind::Annotation, content(owner, &summary, &body).as_bytes());
        Ok(Self {
            identity: Identity::fresh(id),
            owner,
            summary,
            body,
        })
    }

    pub(crate) fn hydrate(
        stored_id: EntityId,
        owner: OwnerRef,
        summary: String,
        body: String,
    ) -> Self {
        let derived = derive_id(EntityKind::Annotation, content(owner, &summary, &body).as_bytes());
        Self {
            identity: Identity::hydrated(derived, stored_id),
            owner,
            summary,
            body,
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

    pub fn owner(&self) -> OwnerRef {
        self.owner
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn set_summary(&mut self, value: impl Into<String>) {
        self.summary = value.into();
        self.rekey();
    }

    pub fn set_body(&mut self, value: impl Into<String>) {
        self.body = value.into();
        self.rekey();
    }

    /// Follows an owner that was re-keyed; the kind never changes.
    pub(crate) fn set_owner_id(&mut self, owner_id: EntityId) {
        self.owner.id = owner_id;
        self.rekey();
    }

    pub fn derive_id(&self) -> EntityId {
        derive_id(
            EntityKind::Annotation,
            content(self.owner, &self.summary, &self.body).as_bytes(),
        )
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.identity.mark_persisted();
    }

    fn rekey(&mut self) {
        let next = self.derive_id();
        self.identity.rekey(next);
    }
}

fn content(owner: OwnerRef, summary: &str, body: &str) -> String {
    format!("{}{summary}{body}", owner.id)
}

impl PartialEq for Annotation {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Annotation {}

impl Hash for Annotation {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl Display for Annotation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "==> Annotation: {}\n\tSummary: {}\n\tInformation: {}\n\tBelongs to: {}",
            self.id(),
            self.summary,
            self.body,
            self.owner
        )
    }
}
