//! Checkout/commit protocol over the staging and durable stores.
//!
//! # Responsibility
//! - Track the single current entity (Empty or Held).
//! - Park the current entity in staging when another one is checked out.
//! - Forward saves and deletes to the repository and keep staging in step
//!   with the identifiers they change.
//!
//! # Invariants
//! - The held entity lives in neither store; its id is registered only once
//!   it is staged or saved.
//! - A failed save leaves the entity held.
//! - Staged decorators of the held entity follow it through every re-key.

use crate::config::StashConfig;
use crate::index::identity_index::{IdentityIndex, IndexError};
use crate::model::decorator::{FileAttachment, Reference, Tag};
use crate::model::entity::{Entity, FieldError};
use crate::model::identity::{EntityId, EntityKind, Origin};
use crate::model::owner::{ModelError, OwnerRef};
use crate::repo::cascade::CascadePolicy;
use crate::repo::stash_repo::{DeleteReport, RepoError, SaveReport, StashRepository};
use crate::staging::staging_store::{StagingError, StagingStore};
use log::{debug, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

pub type SessionResult<T> = Result<T, SessionError>;

/// Protocol-level error returned by `StashSession`.
#[derive(Debug)]
pub enum SessionError {
    /// The operation needs a held entity and there is none.
    NoCurrentEntity,
    /// The held entity is not an article.
    NotArticle(EntityKind),
    InvalidField(FieldError),
    UnknownIdentifier(EntityId),
    NotFound(EntityId),
    AlreadyStaged(EntityId),
    NotStaged(EntityId),
    NoOpSave(EntityId),
    /// Carries the index error unmodified.
    DuplicateIdentifierConflict(IndexError),
    Model(ModelError),
    Staging(StagingError),
    Repo(RepoError),
}

impl Display for SessionError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NoCurrentEntity => write!(f, "no entity is checked out"),
            Self::NotArticle(kind) => write!(f, "current entity is a {kind}, not an article"),
            Self::InvalidField(err) => write!(f, "{err}"),
            Self::UnknownIdentifier(id) => write!(f, "unknown identifier: {id}"),
            Self::NotFound(id) => write!(f, "entity not found: {id}"),
            Self::AlreadyStaged(id) => write!(f, "entity already staged: {id}"),
            Self::NotStaged(id) => write!(f, "entity is not staged: {id}"),
            Self::NoOpSave(id) => write!(f, "nothing to save, {id} is already stored"),
            Self::DuplicateIdentifierConflict(err) => write!(f, "{err}"),
            Self::Model(err) => write!(f, "{err}"),
            Self::Staging(err) => write!(f, "{err}"),
            Self::Repo(err) => write!(f, "{err}"),
        }
    }
}

impl Error for SessionError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidField(err) => Some(err),
            Self::DuplicateIdentifierConflict(err) => Some(err),
            Self::Model(err) => Some(err),
            Self::Staging(err) => Some(err),
            Self::Repo(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IndexError> for SessionError {
    fn from(value: IndexError) -> Self {
        match value {
            IndexError::UnknownIdentifier(id) => Self::UnknownIdentifier(id),
            conflict @ IndexError::DuplicateIdentifierConflict { .. } => {
                Self::DuplicateIdentifierConflict(conflict)
            }
        }
    }
}

impl From<StagingError> for SessionError {
    fn from(value: StagingError) -> Self {
        match value {
            StagingError::AlreadyStaged(id) => Self::AlreadyStaged(id),
            StagingError::NotStaged { id, .. } => Self::NotStaged(id),
            StagingError::Index(err) => err.into(),
            other => Self::Staging(other),
        }
    }
}

impl From<RepoError> for SessionError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::NoOpSave(id) => Self::NoOpSave(id),
            RepoError::Index(err) => err.into(),
            other => Self::Repo(other),
        }
    }
}

impl From<FieldError> for SessionError {
    fn from(value: FieldError) -> Self {
        Self::InvalidField(value)
    }
}

impl From<ModelError> for SessionError {
    fn from(value: ModelError) -> Self {
        Self::Model(value)
    }
}

/// Whether the session currently holds an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Empty,
    Held(EntityId),
}

/// Result of committing one staged entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Saved(SaveReport),
    /// The row was already stored with identical content.
    Unchanged { id: EntityId, kind: EntityKind },
}

/// One working session over a stash.
pub struct StashSession<R: StashRepository> {
    repo: R,
    index: IdentityIndex,
    staging: StagingStore,
    current: Option<Entity>,
}

impl<R: StashRepository> StashSession<R> {
    /// Starts a session, seeding the index from every durable row.
    pub fn new(repo: R) -> SessionResult<Self> {
        Self::with_staging(repo, StagingStore::new())
    }

    /// Starts a session honoring the staging quota from `config`.
    pub fn from_config(repo: R, config: &StashConfig) -> SessionResult<Self> {
        let staging = match config.memory_quota_bytes {
            Some(bytes) => StagingStore::with_quota(bytes),
            None => StagingStore::new(),
        };
        Self::with_staging(repo, staging)
    }

    fn with_staging(repo: R, staging: StagingStore) -> SessionResult<Self> {
        let index = IdentityIndex::from_entries(repo.identities()?)?;
        info!(
            "event=session_start module=service status=ok indexed={}",
            index.len()
        );
        Ok(Self {
            repo,
            index,
            staging,
            current: None,
        })
    }

    pub fn state(&self) -> SessionState {
        match &self.current {
            Some(entity) => SessionState::Held(entity.id()),
            None => SessionState::Empty,
        }
    }

    pub fn current(&self) -> Option<&Entity> {
        self.current.as_ref()
    }

    pub fn index(&self) -> &IdentityIndex {
        &self.index
    }

    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    /// Makes the entity under `id` current.
    ///
    /// The previously held entity is parked: staged if it is fresh or edited,
    /// released if it is durable and unchanged.
    ///
    /// An id left behind by an uncommitted edit resolves to the edited
    /// entity, held or staged, rather than to the row it came from.
    ///
    /// # Errors
    /// - `UnknownIdentifier` when neither store knows `id`.
    /// - `DuplicateIdentifierConflict` when parking collides; nothing changes.
    pub fn checkout(&mut self, id: EntityId) -> SessionResult<&Entity> {
        let held = self
            .current
            .as_ref()
            .is_some_and(|entity| entity.id() == id || entity.identity().stale_id() == Some(id));
        if held {
            return self.current.as_ref().ok_or(SessionError::NoCurrentEntity);
        }

        let id = match self.staging.rekeyed_from(id) {
            Some((rekeyed, kind)) => {
                debug!(
                    "event=entity_checkout module=service status=redirect kind={} from={} to={}",
                    kind, id, rekeyed
                );
                rekeyed
            }
            None => id,
        };
        let kind = self.index.resolve(id)?;
        let staged = self.staging.contains(id, kind);
        let fetched = if staged {
            None
        } else {
            match self.repo.fetch(id, kind) {
                Ok(entity) => Some(entity),
                Err(RepoError::NotFound(_)) => return Err(SessionError::UnknownIdentifier(id)),
                Err(err) => return Err(err.into()),
            }
        };

        self.park()?;
        let entity = match fetched {
            Some(entity) => entity,
            None => self.take_staged(id, kind)?,
        };
        debug!(
            "event=entity_checkout module=service status=ok kind={} id={} from={}",
            kind,
            id,
            if staged { "staging" } else { "durable" }
        );
        Ok(&*self.current.insert(entity))
    }

    /// Holds a freshly constructed entity, parking the previous one.
    pub fn begin(&mut self, entity: impl Into<Entity>) -> SessionResult<&Entity> {
        self.park()?;
        Ok(&*self.current.insert(entity.into()))
    }

    /// Applies a textual field edit to the held entity.
    pub fn edit(&mut self, field: &str, value: &str) -> SessionResult<()> {
        let entity = self.current.as_mut().ok_or(SessionError::NoCurrentEntity)?;
        let before = entity.id();
        entity.edit(field, value)?;
        self.follow_current(before)
    }

    /// Saves the held entity. On success the session is empty again.
    ///
    /// # Errors
    /// - `NoCurrentEntity` when nothing is held.
    /// - `NoOpSave` when the entity is already stored unchanged; it stays held.
    pub fn save(&mut self) -> SessionResult<SaveReport> {
        let entity = self.current.as_mut().ok_or(SessionError::NoCurrentEntity)?;
        let report = self.repo.save(Some(entity), &mut self.index)?;
        self.current = None;
        self.settle_staging(&report)?;
        Ok(report)
    }

    /// Drops the held entity, if any.
    pub fn discard(&mut self) -> SessionResult<()> {
        if let Some(entity) = self.current.take() {
            info!(
                "event=entity_discard module=service status=ok kind={} id={}",
                entity.kind(),
                entity.id()
            );
        }
        Ok(())
    }

    /// Stages a new entity without making it current.
    pub fn stage_new(&mut self, entity: impl Into<Entity>) -> SessionResult<EntityId> {
        Ok(self.staging.put(entity.into(), &mut self.index)?)
    }

    pub fn list_all(&self, kind: EntityKind) -> SessionResult<Vec<String>> {
        Ok(self.repo.list_all(kind)?)
    }

    /// Deletes a durable entity, cascading as `policy` allows.
    pub fn delete(
        &mut self,
        id: EntityId,
        policy: &mut dyn CascadePolicy,
    ) -> SessionResult<DeleteReport> {
        let kind = self.index.resolve(id)?;
        Ok(self.repo.delete(id, kind, policy, &mut self.index)?)
    }

    /// Appends a known author to the held article.
    ///
    /// Returns `false` when the author is already listed.
    pub fn add_author(&mut self, author_id: EntityId) -> SessionResult<bool> {
        self.held_article_kind()?;
        let author = match self.lookup(author_id)? {
            Entity::Author(author) => author,
            _ => return Err(SessionError::NotFound(author_id)),
        };
        let entity = self.current.as_mut().ok_or(SessionError::NoCurrentEntity)?;
        let before = entity.id();
        let added = match entity {
            Entity::Article(article) => article.add_author(author),
            other => return Err(SessionError::NotArticle(other.kind())),
        };
        self.follow_current(before)?;
        Ok(added)
    }

    /// Removes an author from the held article by id.
    pub fn remove_author(&mut self, author_id: EntityId) -> SessionResult<bool> {
        let entity = self.current.as_mut().ok_or(SessionError::NoCurrentEntity)?;
        let before = entity.id();
        let removed = match entity {
            Entity::Article(article) => article.remove_author(author_id),
            other => return Err(SessionError::NotArticle(other.kind())),
        };
        self.follow_current(before)?;
        Ok(removed)
    }

    /// Stages a tag owned by the held entity.
    pub fn tag_current(&mut self, text: &str) -> SessionResult<EntityId> {
        let tag = Tag::new(self.current_owner()?, text)?;
        self.stage_new(tag)
    }

    /// Stages a file attachment owned by the held entity.
    pub fn attach_file_to_current(
        &mut self,
        file_name: &str,
        file_type: &str,
        description: &str,
        content: Vec<u8>,
    ) -> SessionResult<EntityId> {
        let file = FileAttachment::new(
            self.current_owner()?,
            file_name,
            file_type,
            description,
            content,
        )?;
        self.stage_new(file)
    }

    /// Reads `path` and stages it as an attachment of the held entity.
    pub fn attach_path_to_current(
        &mut self,
        path: impl AsRef<Path>,
        file_type: &str,
        description: &str,
    ) -> SessionResult<EntityId> {
        let file =
            FileAttachment::from_path(self.current_owner()?, path, file_type, description)?;
        self.stage_new(file)
    }

    /// Stages a reference from the held entity to a known target.
    pub fn reference_from_current(&mut self, target: EntityId) -> SessionResult<EntityId> {
        self.index.resolve(target)?;
        let reference = Reference::new(self.current_owner()?, target)?;
        self.stage_new(reference)
    }

    /// Irrevocably drops one staged entity.
    pub fn discard_staged(&mut self, id: EntityId) -> SessionResult<()> {
        let kind = self.index.resolve(id)?;
        self.staging.discard(id, kind, &mut self.index)?;
        Ok(())
    }

    pub fn discard_all_staged(&mut self) -> usize {
        self.staging.discard_all(&mut self.index)
    }

    /// Saves every staged entity, owners before what hangs off them.
    ///
    /// Stops at the first failure; the failing entity stays staged.
    pub fn commit_staged(&mut self) -> SessionResult<Vec<CommitOutcome>> {
        let mut outcomes = Vec::new();
        for kind in EntityKind::ALL {
            while let Some(id) = self.staging.entities(kind).first().map(Entity::id) {
                let mut entity = self.take_staged(id, kind)?;
                match self.repo.save(Some(&mut entity), &mut self.index) {
                    Ok(report) => {
                        self.settle_staging(&report)?;
                        outcomes.push(CommitOutcome::Saved(report));
                    }
                    Err(RepoError::NoOpSave(id)) => {
                        self.index.register(id, kind)?;
                        outcomes.push(CommitOutcome::Unchanged { id, kind });
                    }
                    Err(err) => {
                        warn!(
                            "event=staging_commit module=service status=error kind={} id={} error={}",
                            kind, id, err
                        );
                        self.staging.put(entity, &mut self.index)?;
                        return Err(err.into());
                    }
                }
            }
        }
        info!(
            "event=staging_commit module=service status=ok count={}",
            outcomes.len()
        );
        Ok(outcomes)
    }

    /// Rendered staged entities of one kind.
    pub fn pending(&self, kind: EntityKind) -> Vec<String> {
        self.staging.render(kind)
    }

    /// Ends the session. Returns how many staged entities were dropped.
    pub fn finish(mut self) -> usize {
        let dropped = self.staging.discard_all(&mut self.index);
        if dropped > 0 {
            warn!(
                "event=session_finish module=service status=ok dropped_staged={}",
                dropped
            );
        } else {
            info!("event=session_finish module=service status=ok dropped_staged=0");
        }
        dropped
    }

    /// Moves the held entity out of the way of a new checkout.
    fn park(&mut self) -> SessionResult<()> {
        let Some(entity) = self.current.take() else {
            return Ok(());
        };
        if entity.origin() == Origin::Durable && !entity.is_dirty() {
            debug!(
                "event=entity_park module=service status=skip reason=unchanged kind={} id={}",
                entity.kind(),
                entity.id()
            );
            return Ok(());
        }

        match self.staging.admits(&entity, &self.index) {
            Ok(()) => {
                let id = self.staging.put(entity, &mut self.index)?;
                debug!("event=entity_park module=service status=ok id={}", id);
                Ok(())
            }
            Err(StagingError::AlreadyStaged(id)) => {
                warn!(
                    "event=entity_park module=service status=skip reason=already_staged id={}",
                    id
                );
                Ok(())
            }
            Err(err) => {
                self.current = Some(entity);
                Err(err.into())
            }
        }
    }

    /// Takes a staged entity; a durable row with the same id keeps it indexed.
    fn take_staged(&mut self, id: EntityId, kind: EntityKind) -> SessionResult<Entity> {
        let entity = self.staging.take(id, kind, &mut self.index)?;
        if self.repo.exists(id, kind)? {
            self.index.register(id, kind)?;
        }
        Ok(entity)
    }

    /// Applies the aftermath of a successful durable save to staging.
    fn settle_staging(&mut self, report: &SaveReport) -> SessionResult<()> {
        for (id, kind) in &report.inserted {
            if self.staging.release(*id, *kind).is_some() {
                debug!(
                    "event=staging_release module=service status=ok kind={} id={}",
                    kind, id
                );
            }
        }
        for rekey in &report.rekeyed {
            self.staging
                .repoint_owner(rekey.old_id, rekey.new_id, &mut self.index)?;
        }
        Ok(())
    }

    /// Keeps staged dependents attached after the held entity re-keyed.
    /// A re-keyed author is also swapped into staged articles that list it.
    fn follow_current(&mut self, before: EntityId) -> SessionResult<()> {
        let Some(entity) = self.current.as_ref() else {
            return Ok(());
        };
        let after = entity.id();
        if after == before {
            return Ok(());
        }
        if let Entity::Author(author) = entity {
            self.staging.follow_author(before, author, &mut self.index)?;
        }
        self.staging.repoint_owner(before, after, &mut self.index)?;
        Ok(())
    }

    fn current_owner(&self) -> SessionResult<OwnerRef> {
        let entity = self.current.as_ref().ok_or(SessionError::NoCurrentEntity)?;
        Ok(OwnerRef::new(entity.id(), entity.kind()))
    }

    fn held_article_kind(&self) -> SessionResult<()> {
        match &self.current {
            None => Err(SessionError::NoCurrentEntity),
            Some(Entity::Article(_)) => Ok(()),
            Some(other) => Err(SessionError::NotArticle(other.kind())),
        }
    }

    /// Finds an entity in staging or the durable store without moving it.
    fn lookup(&self, id: EntityId) -> SessionResult<Entity> {
        let kind = self.index.resolve(id)?;
        match self.staging.fetch(id, kind) {
            Ok(entity) => Ok(entity.clone()),
            Err(_) => Ok(self.repo.fetch(id, kind)?),
        }
    }
}
