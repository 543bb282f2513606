//! In-memory holding area for entities not yet committed.
//!
//! # Responsibility
//! - Keep created or edited entities, partitioned by kind, until they are
//!   saved or discarded.
//! - Keep the identity index in step with what is staged.
//!
//! # Invariants
//! - At most one staged entity per identifier.
//! - Every staged id is registered in the index; discarding forgets it.
//! - Discarding an owner does not cascade to staged decorators; they stay
//!   staged as orphans until discarded on their own.
//! - Staged file bytes never exceed the configured quota.

use crate::index::identity_index::{IdentityIndex, IndexError};
use crate::model::author::Author;
use crate::model::entity::Entity;
use crate::model::identity::{EntityId, EntityKind, Rekey};
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashSet};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type StagingResult<T> = Result<T, StagingError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StagingError {
    /// An entity with this identifier is already staged.
    AlreadyStaged(EntityId),
    /// Nothing of that kind is staged under this identifier.
    NotStaged { id: EntityId, kind: EntityKind },
    /// Staging the file would exceed the memory quota.
    QuotaExceeded {
        id: EntityId,
        requested: u64,
        available: u64,
    },
    /// Identity index rejected the registration.
    Index(IndexError),
}

impl Display for StagingError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyStaged(id) => write!(f, "entity already staged: {id}"),
            Self::NotStaged { id, kind } => write!(f, "no staged {kind} with id {id}"),
            Self::QuotaExceeded {
                id,
                requested,
                available,
            } => write!(
                f,
                "staging file {id} needs {requested} bytes but only {available} remain in quota"
            ),
            Self::Index(err) => write!(f, "{err}"),
        }
    }
}

impl Error for StagingError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Index(err) => Some(err),
            _ => None,
        }
    }
}

impl From<IndexError> for StagingError {
    fn from(value: IndexError) -> Self {
        Self::Index(value)
    }
}

/// Pending entities, one partition per kind.
#[derive(Debug, Default)]
pub struct StagingStore {
    partitions: BTreeMap<EntityKind, Vec<Entity>>,
    quota_bytes: Option<u64>,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Staging store that refuses files once `quota_bytes` of content is held.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            partitions: BTreeMap::new(),
            quota_bytes: Some(quota_bytes),
        }
    }

    /// Stages `entity` and registers its id.
    ///
    /// # Errors
    /// - `AlreadyStaged` when the id is already present.
    /// - `QuotaExceeded` for files beyond the memory quota.
    /// - `Index` when the id is registered to another kind.
    pub fn put(&mut self, entity: Entity, index: &mut IdentityIndex) -> StagingResult<EntityId> {
        self.admits(&entity, index)?;
        let id = entity.id();
        let kind = entity.kind();
        index.register(id, kind)?;
        self.partitions.entry(kind).or_default().push(entity);
        debug!(
            "event=staging_put module=staging status=ok kind={} id={}",
            kind, id
        );
        Ok(id)
    }

    /// Checks whether `put` would accept `entity`, without staging it.
    pub fn admits(&self, entity: &Entity, index: &IdentityIndex) -> StagingResult<()> {
        let id = entity.id();
        if self.contains_id(id) {
            return Err(StagingError::AlreadyStaged(id));
        }
        if let Entity::File(file) = entity {
            self.ensure_quota(id, file.size())?;
        }
        index.check(id, entity.kind())?;
        Ok(())
    }

    pub fn fetch(&self, id: EntityId, kind: EntityKind) -> StagingResult<&Entity> {
        self.partitions
            .get(&kind)
            .and_then(|entities| entities.iter().find(|entity| entity.id() == id))
            .ok_or(StagingError::NotStaged { id, kind })
    }

    /// Removes an entity for checkout and forgets its id.
    pub fn take(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        index: &mut IdentityIndex,
    ) -> StagingResult<Entity> {
        let entity = self.remove(id, kind)?;
        index.forget(id);
        Ok(entity)
    }

    /// Irrevocably drops a staged entity and forgets its id.
    ///
    /// Staged decorators owned by the entity are left in place.
    pub fn discard(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        index: &mut IdentityIndex,
    ) -> StagingResult<()> {
        self.remove(id, kind)?;
        index.forget(id);

        let orphans = self.owned_by(id);
        if orphans > 0 {
            warn!(
                "event=staging_discard module=staging status=ok kind={} id={} orphaned_decorators={}",
                kind, id, orphans
            );
        } else {
            info!(
                "event=staging_discard module=staging status=ok kind={} id={}",
                kind, id
            );
        }
        Ok(())
    }

    /// Drops every staged entity of one kind. Returns how many were dropped.
    pub fn discard_kind(&mut self, kind: EntityKind, index: &mut IdentityIndex) -> usize {
        let dropped = self.partitions.remove(&kind).unwrap_or_default();
        for entity in &dropped {
            index.forget(entity.id());
        }
        info!(
            "event=staging_discard_kind module=staging status=ok kind={} count={}",
            kind,
            dropped.len()
        );
        dropped.len()
    }

    /// Drops everything staged. Returns how many entities were dropped.
    pub fn discard_all(&mut self, index: &mut IdentityIndex) -> usize {
        let mut count = 0;
        for (_, entities) in std::mem::take(&mut self.partitions) {
            for entity in entities {
                index.forget(entity.id());
                count += 1;
            }
        }
        info!(
            "event=staging_discard_all module=staging status=ok count={}",
            count
        );
        count
    }

    /// Drops a staged copy whose id has just been committed durably.
    ///
    /// The id stays registered because it now lives in the durable store.
    pub fn release(&mut self, id: EntityId, kind: EntityKind) -> Option<Entity> {
        self.remove(id, kind).ok()
    }

    /// Re-points staged annotations/decorators owned by `prior` to `new_id`
    /// and staged references targeting `prior`, re-keying each. Entities
    /// hanging off a re-keyed annotation follow it in turn.
    ///
    /// A re-keyed entity that collides with one already staged is merged into
    /// it. On an index conflict nothing in the failing step is moved.
    pub fn repoint_owner(
        &mut self,
        prior: EntityId,
        new_id: EntityId,
        index: &mut IdentityIndex,
    ) -> StagingResult<Vec<Rekey>> {
        let mut pending = vec![(prior, new_id)];
        let mut seen = HashSet::new();
        let mut rekeys = Vec::new();
        while let Some((old_owner, new_owner)) = pending.pop() {
            if !seen.insert(old_owner) {
                continue;
            }
            let moves = self.dependents_of(old_owner, new_owner);
            let applied = self.apply_moves(moves, index)?;
            pending.extend(applied.iter().map(|rekey| (rekey.old_id, rekey.new_id)));
            rekeys.extend(applied);
        }

        if !rekeys.is_empty() {
            info!(
                "event=staging_repoint module=staging status=ok prior={} new={} count={}",
                prior,
                new_id,
                rekeys.len()
            );
        }
        Ok(rekeys)
    }

    /// Swaps a re-keyed author into every staged article listing `prior`,
    /// then re-points whatever hangs off those articles.
    pub fn follow_author(
        &mut self,
        prior: EntityId,
        author: &Author,
        index: &mut IdentityIndex,
    ) -> StagingResult<Vec<Rekey>> {
        let moves: Vec<(EntityId, Entity)> = self
            .entities(EntityKind::Article)
            .iter()
            .filter_map(|entity| match entity {
                Entity::Article(article) if article.author_ids().contains(&prior) => {
                    let mut moved = article.clone();
                    moved.replace_author(prior, author.clone());
                    Some((article.id(), Entity::from(moved)))
                }
                _ => None,
            })
            .collect();

        let applied = self.apply_moves(moves, index)?;
        let mut rekeys = applied.clone();
        for rekey in &applied {
            rekeys.extend(self.repoint_owner(rekey.old_id, rekey.new_id, index)?);
        }
        if !applied.is_empty() {
            info!(
                "event=staging_follow_author module=staging status=ok prior={} new={} articles={}",
                prior,
                author.id(),
                applied.len()
            );
        }
        Ok(rekeys)
    }

    /// Staged entity that replaced `prior` through a re-key, unless `prior`
    /// itself is still staged.
    pub fn rekeyed_from(&self, prior: EntityId) -> Option<(EntityId, EntityKind)> {
        if self.contains_id(prior) {
            return None;
        }
        self.partitions
            .values()
            .flatten()
            .find(|entity| entity.identity().stale_id() == Some(prior))
            .map(|entity| (entity.id(), entity.kind()))
    }

    pub fn contains(&self, id: EntityId, kind: EntityKind) -> bool {
        self.fetch(id, kind).is_ok()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.values().all(Vec::is_empty)
    }

    pub fn len(&self) -> usize {
        self.partitions.values().map(Vec::len).sum()
    }

    /// Staged entities of one kind, in staging order.
    pub fn entities(&self, kind: EntityKind) -> &[Entity] {
        self.partitions
            .get(&kind)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Human-readable rendering of staged entities of one kind.
    pub fn render(&self, kind: EntityKind) -> Vec<String> {
        self.entities(kind)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    /// Ids of every staged entity, owners first.
    pub fn staged_ids(&self) -> Vec<(EntityId, EntityKind)> {
        EntityKind::ALL
            .iter()
            .flat_map(|kind| {
                self.entities(*kind)
                    .iter()
                    .map(move |entity| (entity.id(), *kind))
            })
            .collect()
    }

    fn remove(&mut self, id: EntityId, kind: EntityKind) -> StagingResult<Entity> {
        let entities = self
            .partitions
            .get_mut(&kind)
            .ok_or(StagingError::NotStaged { id, kind })?;
        let position = entities
            .iter()
            .position(|entity| entity.id() == id)
            .ok_or(StagingError::NotStaged { id, kind })?;
        Ok(entities.remove(position))
    }

    /// Updated copies of staged entities owned by, or targeting, `old_owner`.
    fn dependents_of(&self, old_owner: EntityId, new_owner: EntityId) -> Vec<(EntityId, Entity)> {
        self.partitions
            .values()
            .flatten()
            .filter_map(|entity| {
                let mut moved = entity.clone();
                if entity.owner().is_some_and(|owner| owner.id == old_owner) {
                    moved.follow_owner(new_owner);
                }
                if let Entity::Reference(reference) = &mut moved {
                    if reference.target() == old_owner {
                        reference.set_target(new_owner);
                    }
                }
                (moved.id() != entity.id()).then(|| (entity.id(), moved))
            })
            .collect()
    }

    /// Replaces each staged entity `old_id` by its updated copy.
    ///
    /// Every new id is checked against the index before anything moves.
    fn apply_moves(
        &mut self,
        moves: Vec<(EntityId, Entity)>,
        index: &mut IdentityIndex,
    ) -> StagingResult<Vec<Rekey>> {
        for (_, moved) in &moves {
            index.check(moved.id(), moved.kind())?;
        }

        let mut rekeys = Vec::with_capacity(moves.len());
        for (old_id, moved) in moves {
            let kind = moved.kind();
            let new_id = moved.id();
            self.remove(old_id, kind)?;
            index.forget(old_id);
            rekeys.push(Rekey {
                kind,
                old_id,
                new_id,
            });
            if self.contains_id(new_id) {
                debug!(
                    "event=staging_repoint module=staging status=merged kind={} id={}",
                    kind, new_id
                );
                continue;
            }
            index.register(new_id, kind)?;
            self.partitions.entry(kind).or_default().push(moved);
        }
        Ok(rekeys)
    }

    fn contains_id(&self, id: EntityId) -> bool {
        self.partitions
            .values()
            .any(|entities| entities.iter().any(|entity| entity.id() == id))
    }

    fn owned_by(&self, owner_id: EntityId) -> usize {
        self.partitions
            .values()
            .flatten()
            .filter(|entity| entity.owner().is_some_and(|owner| owner.id == owner_id))
            .count()
    }

    fn staged_file_bytes(&self) -> u64 {
        self.entities(EntityKind::File)
            .iter()
            .map(|entity| match entity {
                Entity::File(file) => file.size(),
                _ => 0,
            })
            .sum()
    }

    fn ensure_quota(&self, id: EntityId, requested: u64) -> StagingResult<()> {
        let Some(quota) = self.quota_bytes else {
            return Ok(());
        };
        let available = quota.saturating_sub(self.staged_file_bytes());
        if requested > available {
            warn!(
                "event=staging_put module=staging status=error error_code=quota_exceeded id={} requested={} available={}",
                id, requested, available
            );
            return Err(StagingError::QuotaExceeded {
                id,
                requested,
                available,
            });
        }
        Ok(())
    }
}
