//! Decorator entities: tags, attached files and cross-references.
//!
//! # Invariants
//! - Every decorator hangs off exactly one owner (id + kind).
//! - Decorators own nothing; decoration is one level deep.
//! - A file's `size` is always the byte length of its content.

use crate::model::identity::{derive_id, EntityId, EntityKind, Identity, Origin};
use crate::model::owner::{ensure_owner, ModelError, OwnerRef};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};
use std::path::Path;

/// Free-text label.
#[derive(Debug, Clone, Serialize)]
pub struct Tag {
    #[serde(flatten)]
    identity: Identity,
    owner: OwnerRef,
    text: String,
}

impl Tag {
    pub fn new(owner: OwnerRef, text: impl Into<String>) -> Result<Self, ModelError> {
        ensure_owner(EntityKind::Tag, owner)?;
        let text = text.into();
        let id = derive_id(EntityKind::Tag, tag_content(owner, &text).as_bytes());
        Ok(Self {
            identity: Identity::fresh(id),
            owner,
            text,
        })
    }

    pub(crate) fn hydrate(stored_id: EntityId, owner: OwnerRef, text: String) -> Self {
        let derived = derive_id(EntityKind::Tag, tag_content(owner, &text).as_bytes());
        Self {
            identity: Identity::hydrated(derived, stored_id),
            owner,
            text,
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

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, value: impl Into<String>) {
        self.text = value.into();
        self.rekey();
    }

    pub(crate) fn set_owner_id(&mut self, owner_id: EntityId) {
        self.owner.id = owner_id;
        self.rekey();
    }

    pub fn derive_id(&self) -> EntityId {
        derive_id(EntityKind::Tag, tag_content(self.owner, &self.text).as_bytes())
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.identity.mark_persisted();
    }

    fn rekey(&mut self) {
        let next = self.derive_id();
        self.identity.rekey(next);
    }
}

fn tag_content(owner: OwnerRef, text: &str) -> String {
    format!("{}{}{text}", owner.id, owner.kind)
}

impl Display for Tag {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "==> Tag: {}\n\t{} {}", self.id(), self.owner, self.text)
    }
}

/// File attached to an entity, content kept inline.
#[derive(Debug, Clone, Serialize)]
pub struct FileAttachment {
    #[serde(flatten)]
    identity: Identity,
    owner: OwnerRef,
    file_name: String,
    file_type: String,
    description: String,
    #[serde(skip)]
    content: Vec<u8>,
}

impl FileAttachment {
    pub fn new(
        owner: OwnerRef,
        file_name: impl Into<String>,
        file_type: impl Into<String>,
        description: impl Into<String>,
        content: Vec<u8>,
    ) -> Result<Self, ModelError> {
        ensure_owner(EntityKind::File, owner)?;
        let mut file = Self {
            identity: Identity::fresh(EntityId::nil()),
            owner,
            file_name: file_name.into(),
            file_type: file_type.into(),
            description: description.into(),
            content,
        };
        file.identity = Identity::fresh(file.derive_id());
        Ok(file)
    }

    /// Reads `path` from disk; the stored name is the path's final component.
    pub fn from_path(
        owner: OwnerRef,
        path: impl AsRef<Path>,
        file_type: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|err| ModelError::UnreadableFile {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(owner, file_name, file_type, description, content)
    }

    pub(crate) fn hydrate(
        stored_id: EntityId,
        owner: OwnerRef,
        file_name: String,
        file_type: String,
        description: String,
        content: Vec<u8>,
    ) -> Self {
        let mut file = Self {
            identity: Identity::fresh(EntityId::nil()),
            owner,
            file_name,
            file_type,
            description,
            content,
        };
        file.identity = Identity::hydrated(file.derive_id(), stored_id);
        file
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

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn file_type(&self) -> &str {
        &self.file_type
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn content(&self) -> &[u8] {
        &self.content
    }

    pub fn size(&self) -> u64 {
        self.content.len() as u64
    }

    pub fn set_file_name(&mut self, value: impl Into<String>) {
        self.file_name = value.into();
        self.rekey();
    }

    pub fn set_file_type(&mut self, value: impl Into<String>) {
        self.file_type = value.into();
        self.rekey();
    }

    pub fn set_description(&mut self, value: impl Into<String>) {
        self.description = value.into();
        self.rekey();
    }

    pub(crate) fn set_owner_id(&mut self, owner_id: EntityId) {
        self.owner.id = owner_id;
        self.rekey();
    }

    pub fn derive_id(&self) -> EntityId {
        // Hashes the whole blob; cost grows with attachment size.
        let header = format!(
            "{}{}{}{}{}",
            self.owner.id, self.owner.kind, self.file_name, self.file_type, self.description
        );
        let mut name = Vec::with_capacity(header.len() + self.content.len());
        name.extend_from_slice(header.as_bytes());
        name.extend_from_slice(&self.content);
        derive_id(EntityKind::File, &name)
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.identity.mark_persisted();
    }

    fn rekey(&mut self) {
        let next = self.derive_id();
        self.identity.rekey(next);
    }
}

impl Display for FileAttachment {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "==> Reference file: {}\n\tReferee: {}\n\tName: {}\n\tSize: {}\n\tType: {}\n\tDescription: {}",
            self.id(),
            self.owner,
            self.file_name,
            self.size(),
            self.file_type,
            self.description
        )
    }
}

/// Cross-reference from an owner to another stash entity.
#[derive(Debug, Clone, Serialize)]
pub struct Reference {
    #[serde(flatten)]
    identity: Identity,
    owner: OwnerRef,
    target: EntityId,
}

impl Reference {
    pub fn new(owner: OwnerRef, target: EntityId) -> Result<Self, ModelError> {
        ensure_owner(EntityKind::Reference, owner)?;
        let id = derive_id(EntityKind::Reference, reference_content(owner, target).as_bytes());
        Ok(Self {
            identity: Identity::fresh(id),
            owner,
            target,
        })
    }

    pub(crate) fn hydrate(stored_id: EntityId, owner: OwnerRef, target: EntityId) -> Self {
        let derived = derive_id(EntityKind::Reference, reference_content(owner, target).as_bytes());
        Self {
            identity: Identity::hydrated(derived, stored_id),
            owner,
            target,
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

    pub fn target(&self) -> EntityId {
        self.target
    }

    pub fn set_target(&mut self, value: EntityId) {
        self.target = value;
        self.rekey();
    }

    pub(crate) fn set_owner_id(&mut self, owner_id: EntityId) {
        self.owner.id = owner_id;
        self.rekey();
    }

    pub fn derive_id(&self) -> EntityId {
        derive_id(
            EntityKind::Reference,
            reference_content(self.owner, self.target).as_bytes(),
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

fn reference_content(owner: OwnerRef, target: EntityId) -> String {
    format!("{}{}{target}", owner.id, owner.kind)
}

impl Display for Reference {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "==> Reference: {}\n\t{} ----> {}",
            self.id(),
            self.owner,
            self.target
        )
    }
}

macro_rules! identity_equality {
    ($($ty:ty),+) => {
        $(
            impl PartialEq for $ty {
                fn eq(&self, other: &Self) -> bool {
                    self.id() == other.id()
                }
            }

            impl Eq for $ty {}

            impl Hash for $ty {
                fn hash<H: Hasher>(&self, state: &mut H) {
                    self.id().hash(state);
                }
            }
        )+
    };
}

identity_equality!(Tag, FileAttachment, Reference);

#[cfg(test)]
mod tests {
    use super::{FileAttachment, Reference, Tag};
    use crate::model::identity::{EntityKind, Origin};
    use crate::model::owner::{ModelError, OwnerRef};
    use uuid::Uuid;

    fn article_owner() -> OwnerRef {
        OwnerRef::new(Uuid::new_v4(), EntityKind::Article)
    }

    #[test]
    fn reference_cannot_hang_off_an_author() {
        let owner = OwnerRef::new(Uuid::new_v4(), EntityKind::Author);
        let err = Reference::new(owner, Uuid::new_v4()).unwrap_err();
        assert_eq!(
            err,
            ModelError::InvalidOwner {
                kind: EntityKind::Reference,
                owner: EntityKind::Author,
            }
        );
    }

    #[test]
    fn tag_cannot_decorate_a_tag() {
        let owner = OwnerRef::new(Uuid::new_v4(), EntityKind::Tag);
        assert!(Tag::new(owner, "nested").is_err());
    }

    #[test]
    fn file_identity_covers_content_bytes() {
        let owner = article_owner();
        let a = FileAttachment::new(owner, "paper.pdf", "pdf", "", b"one".to_vec()).unwrap();
        let b = FileAttachment::new(owner, "paper.pdf", "pdf", "", b"two".to_vec()).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(a.size(), 3);
        assert_eq!(a.origin(), Origin::Fresh);
    }

    #[test]
    fn file_from_path_uses_final_component_as_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, b"hello").unwrap();

        let file = FileAttachment::from_path(article_owner(), &path, "text", "notes").unwrap();
        assert_eq!(file.file_name(), "notes.txt");
        assert_eq!(file.content(), b"hello");
        assert_eq!(file.size(), 5);
    }

    #[test]
    fn file_from_missing_path_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let err = FileAttachment::from_path(article_owner(), dir.path().join("absent"), "", "")
            .unwrap_err();
        assert!(matches!(err, ModelError::UnreadableFile { .. }));
    }

    #[test]
    fn following_owner_rekeys_tag() {
        let mut tag = Tag::new(article_owner(), "logic").unwrap();
        let before = tag.id();
        tag.set_owner_id(Uuid::new_v4());
        assert_ne!(tag.id(), before);
        assert_eq!(tag.id(), tag.derive_id());
    }
}
