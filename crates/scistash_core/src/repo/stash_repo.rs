//! Durable stash repository contract and SQLite implementation.
//!
//! # Responsibility
//! - Persist entities under their content-derived identifiers.
//! - Reconcile re-keyed entities: move the row, re-point everything that
//!   refers to the old identifier, keep the identity index in step.
//! - Delete with policy-driven cascades.
//!
//! # Invariants
//! - Every save and delete runs in one IMMEDIATE transaction.
//! - The identity index is checked before commit and mutated only after a
//!   successful commit.
//! - A dependent whose re-keyed identifier already exists is merged into the
//!   existing row.

use crate::db::DbError;
use crate::index::identity_index::{IdentityIndex, IndexError};
use crate::model::author::Author;
use crate::model::entity::Entity;
use crate::model::identity::{EntityId, EntityKind, Origin, Rekey};
use crate::model::owner::OwnerRef;
use crate::repo::cascade::{CascadeClass, CascadePolicy};
use crate::repo::listing::{short_label, ListRenderer, ListRow, PlainListRenderer, Related};
use crate::repo::rows;
use log::{debug, info, warn};
use rusqlite::{Connection, TransactionBehavior};
use std::collections::HashSet;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

const REQUIRED_TABLES: [&str; 7] = [
    "authors",
    "articles",
    "article_authors",
    "annotations",
    "tags",
    "files",
    "refs",
];

pub type RepoResult<T> = Result<T, RepoError>;

/// Durable store error.
#[derive(Debug)]
pub enum RepoError {
    NotFound(EntityId),
    /// `save` was handed no entity.
    NullEntity,
    /// Nothing to write: the row is already stored under this identifier.
    NoOpSave(EntityId),
    Db(DbError),
    InvalidData(String),
    Index(IndexError),
    MissingRequiredTable(&'static str),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(id) => write!(f, "entity not found: {id}"),
            Self::NullEntity => write!(f, "no entity to save"),
            Self::NoOpSave(id) => write!(f, "entity {id} is already stored unchanged"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted stash data: {message}"),
            Self::Index(err) => write!(f, "{err}"),
            Self::MissingRequiredTable(table) => write!(f, "missing required table `{table}`"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Index(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<IndexError> for RepoError {
    fn from(value: IndexError) -> Self {
        Self::Index(value)
    }
}

/// What a successful save wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveReport {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Row the entity was stored under before this save, if it moved.
    pub replaced: Option<EntityId>,
    /// Rows written, including missing article authors and moved dependents.
    pub inserted: Vec<(EntityId, EntityKind)>,
    /// Every identifier change, the saved entity's first.
    pub rekeyed: Vec<Rekey>,
}

/// What a delete removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteReport {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Every row removed, the entity itself last.
    pub removed: Vec<(EntityId, EntityKind)>,
}

/// Durable store operations used by the session.
pub trait StashRepository {
    fn exists(&self, id: EntityId, kind: EntityKind) -> RepoResult<bool>;
    /// Hydrates the row stored under `id`.
    fn fetch(&self, id: EntityId, kind: EntityKind) -> RepoResult<Entity>;
    /// Writes `entity` under its current id and reconciles its prior id.
    fn save(
        &mut self,
        entity: Option<&mut Entity>,
        index: &mut IdentityIndex,
    ) -> RepoResult<SaveReport>;
    fn delete(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        policy: &mut dyn CascadePolicy,
        index: &mut IdentityIndex,
    ) -> RepoResult<DeleteReport>;
    /// One rendered line per stored row of `kind`.
    fn list_all(&self, kind: EntityKind) -> RepoResult<Vec<String>>;
    /// Every stored `(id, kind)`, used to seed the identity index.
    fn identities(&self) -> RepoResult<Vec<(EntityId, EntityKind)>>;
}

/// SQLite-backed stash repository.
pub struct SqliteStashRepository<'conn> {
    conn: &'conn mut Connection,
    renderer: Box<dyn ListRenderer>,
}

impl<'conn> SqliteStashRepository<'conn> {
    /// Wraps a migrated connection.
    ///
    /// # Errors
    /// - `MissingRequiredTable` when the schema is not in place.
    pub fn try_new(conn: &'conn mut Connection) -> RepoResult<Self> {
        for table in REQUIRED_TABLES {
            if !table_exists(conn, table)? {
                return Err(RepoError::MissingRequiredTable(table));
            }
        }
        Ok(Self {
            conn,
            renderer: Box::new(PlainListRenderer),
        })
    }

    /// Replaces the renderer used by `list_all`.
    pub fn with_renderer(mut self, renderer: Box<dyn ListRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    fn related(&self, id: EntityId, kind: Option<EntityKind>) -> RepoResult<Related> {
        let kind = match kind {
            Some(kind) => Some(kind),
            None => rows::find_kind(self.conn, id)?,
        };
        let loaded = match kind {
            Some(kind) => rows::load(self.conn, id, kind)?,
            None => None,
        };
        Ok(match loaded {
            Some(entity) => Related::Present {
                id,
                kind: entity.kind(),
                label: short_label(&entity),
            },
            None => Related::Missing { id, kind },
        })
    }
}

impl StashRepository for SqliteStashRepository<'_> {
    fn exists(&self, id: EntityId, kind: EntityKind) -> RepoResult<bool> {
        rows::row_exists(self.conn, id, kind)
    }

    fn fetch(&self, id: EntityId, kind: EntityKind) -> RepoResult<Entity> {
        rows::load(self.conn, id, kind)?.ok_or(RepoError::NotFound(id))
    }

    fn save(
        &mut self,
        entity: Option<&mut Entity>,
        index: &mut IdentityIndex,
    ) -> RepoResult<SaveReport> {
        let Some(entity) = entity else {
            warn!("event=entity_save module=repo status=error error_code=null_entity");
            return Err(RepoError::NullEntity);
        };
        let started_at = Instant::now();
        let id = entity.id();
        let kind = entity.kind();
        if entity.origin() == Origin::Durable && entity.prior() == Some(id) {
            debug!(
                "event=entity_save module=repo status=skip reason=unchanged kind={} id={}",
                kind, id
            );
            return Err(RepoError::NoOpSave(id));
        }

        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut work = Reconciliation::default();

        if let Entity::Article(article) = &*entity {
            for author in article.authors() {
                if !rows::row_exists(&tx, author.id(), EntityKind::Author)? {
                    rows::insert(&tx, &Entity::from(author.clone()))?;
                    work.inserted.push((author.id(), EntityKind::Author));
                }
            }
        }

        let stale = match entity.identity().stale_id() {
            Some(prior) if has_trace(&tx, prior, kind)? => Some(prior),
            _ => None,
        };
        let already_stored = rows::row_exists(&tx, id, kind)?;
        if already_stored && stale.is_none() && work.inserted.is_empty() {
            debug!(
                "event=entity_save module=repo status=skip reason=already_stored kind={} id={}",
                kind, id
            );
            return Err(RepoError::NoOpSave(id));
        }

        if let Some(prior) = stale {
            work.visited.insert(prior);
            let author = match &*entity {
                Entity::Author(author) => Some(author),
                _ => None,
            };
            work.rekeyed.push(Rekey {
                kind,
                old_id: prior,
                new_id: id,
            });
            rekey_dependents(&tx, OwnerRef::new(prior, kind), id, author, &mut work)?;
            if rows::delete_row(&tx, prior, kind)? {
                work.removed.push(prior);
            }
            if kind == EntityKind::Article {
                rows::delete_article_links(&tx, prior)?;
            }
        }
        if !already_stored {
            rows::insert(&tx, entity)?;
            work.inserted.push((id, kind));
        }

        for (new_id, new_kind) in &work.inserted {
            index.check(*new_id, *new_kind)?;
        }
        tx.commit()?;

        for removed in &work.removed {
            index.forget(*removed);
        }
        for (new_id, new_kind) in &work.inserted {
            index.register(*new_id, *new_kind)?;
        }
        entity.mark_persisted();

        info!(
            "event=entity_save module=repo status=ok kind={} id={} inserted={} rekeyed={} duration_ms={}",
            kind,
            id,
            work.inserted.len(),
            work.rekeyed.len(),
            started_at.elapsed().as_millis()
        );
        Ok(SaveReport {
            id,
            kind,
            replaced: stale,
            inserted: work.inserted,
            rekeyed: work.rekeyed,
        })
    }

    fn delete(
        &mut self,
        id: EntityId,
        kind: EntityKind,
        policy: &mut dyn CascadePolicy,
        index: &mut IdentityIndex,
    ) -> RepoResult<DeleteReport> {
        let started_at = Instant::now();
        let tx = self
            .conn
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        if !rows::row_exists(&tx, id, kind)? {
            return Err(RepoError::NotFound(id));
        }

        let mut removed = Vec::new();
        match kind {
            EntityKind::Author | EntityKind::Article => {
                if policy.confirm(kind, id, CascadeClass::Attached) {
                    remove_attached(&tx, OwnerRef::new(id, kind), &mut removed)?;
                }
                if policy.confirm(kind, id, CascadeClass::IncomingReferences) {
                    for reference in rows::references_to(&tx, id)? {
                        if rows::delete_row(&tx, reference, EntityKind::Reference)? {
                            removed.push((reference, EntityKind::Reference));
                        }
                    }
                }
                if policy.confirm(kind, id, CascadeClass::Associations) {
                    rows::delete_links_touching(&tx, id)?;
                }
            }
            EntityKind::Annotation => {
                if policy.confirm(kind, id, CascadeClass::Attached) {
                    remove_attached(&tx, OwnerRef::new(id, kind), &mut removed)?;
                }
            }
            EntityKind::Tag | EntityKind::File | EntityKind::Reference => {}
        }
        rows::delete_row(&tx, id, kind)?;
        removed.push((id, kind));
        tx.commit()?;

        for (removed_id, _) in &removed {
            index.forget(*removed_id);
        }
        info!(
            "event=entity_delete module=repo status=ok kind={} id={} removed={} duration_ms={}",
            kind,
            id,
            removed.len(),
            started_at.elapsed().as_millis()
        );
        Ok(DeleteReport { id, kind, removed })
    }

    fn list_all(&self, kind: EntityKind) -> RepoResult<Vec<String>> {
        let ids = rows::ids_of_kind(self.conn, kind)?;
        let mut lines = Vec::with_capacity(ids.len());
        for id in ids {
            let Some(entity) = rows::load(self.conn, id, kind)? else {
                continue;
            };
            let owner = match entity.owner() {
                Some(owner) => Some(self.related(owner.id, Some(owner.kind))?),
                None => None,
            };
            let target = match &entity {
                Entity::Reference(reference) => Some(self.related(reference.target(), None)?),
                _ => None,
            };
            lines.push(self.renderer.render(&ListRow {
                entity,
                owner,
                target,
            }));
        }
        debug!(
            "event=entity_list module=repo status=ok kind={} count={}",
            kind,
            lines.len()
        );
        Ok(lines)
    }

    fn identities(&self) -> RepoResult<Vec<(EntityId, EntityKind)>> {
        let mut all = Vec::new();
        for kind in EntityKind::ALL {
            all.extend(
                rows::ids_of_kind(self.conn, kind)?
                    .into_iter()
                    .map(|id| (id, kind)),
            );
        }
        Ok(all)
    }
}

/// Bookkeeping for one save transaction.
#[derive(Debug, Default)]
struct Reconciliation {
    inserted: Vec<(EntityId, EntityKind)>,
    removed: Vec<EntityId>,
    rekeyed: Vec<Rekey>,
    /// Stored ids already moved; breaks reference cycles.
    visited: HashSet<EntityId>,
}

/// Whether anything durable still refers to `prior`.
fn has_trace(conn: &Connection, prior: EntityId, kind: EntityKind) -> RepoResult<bool> {
    if rows::row_exists(conn, prior, kind)?
        || !rows::owned_by(conn, OwnerRef::new(prior, kind))?.is_empty()
        || !rows::references_to(conn, prior)?.is_empty()
    {
        return Ok(true);
    }
    if kind == EntityKind::Author {
        return Ok(!rows::articles_by(conn, prior)?.is_empty());
    }
    Ok(false)
}

/// Re-points rows that refer to `old` so they refer to `new_id`.
///
/// Owned annotations and decorators follow their owner, references follow
/// their target, and an author's articles swap in the re-keyed author.
fn rekey_dependents(
    conn: &Connection,
    old: OwnerRef,
    new_id: EntityId,
    author: Option<&Author>,
    work: &mut Reconciliation,
) -> RepoResult<()> {
    let old_id = old.id;
    for (stored_id, kind) in rows::owned_by(conn, old)? {
        if !work.visited.insert(stored_id) {
            continue;
        }
        let Some(mut dependent) = rows::load(conn, stored_id, kind)? else {
            continue;
        };
        dependent.follow_owner(new_id);
        move_row(conn, stored_id, dependent, work)?;
    }

    for stored_id in rows::references_to(conn, old_id)? {
        if !work.visited.insert(stored_id) {
            continue;
        }
        let Some(mut dependent) = rows::load(conn, stored_id, EntityKind::Reference)? else {
            continue;
        };
        if let Entity::Reference(reference) = &mut dependent {
            reference.set_target(new_id);
        }
        move_row(conn, stored_id, dependent, work)?;
    }

    if let Some(author) = author {
        for stored_id in rows::articles_by(conn, old_id)? {
            if !work.visited.insert(stored_id) {
                continue;
            }
            let Some(mut dependent) = rows::load(conn, stored_id, EntityKind::Article)? else {
                continue;
            };
            if let Entity::Article(article) = &mut dependent {
                article.replace_author(old_id, author.clone());
            }
            move_row(conn, stored_id, dependent, work)?;
        }
    }

    Ok(())
}

/// Moves one dependent row from `stored_id` to its re-derived id.
fn move_row(
    conn: &Connection,
    stored_id: EntityId,
    dependent: Entity,
    work: &mut Reconciliation,
) -> RepoResult<()> {
    let kind = dependent.kind();
    let new_id = dependent.id();
    if new_id == stored_id {
        return Ok(());
    }

    rekey_dependents(conn, OwnerRef::new(stored_id, kind), new_id, None, work)?;
    rows::delete_row(conn, stored_id, kind)?;
    if kind == EntityKind::Article {
        rows::delete_article_links(conn, stored_id)?;
    }
    work.removed.push(stored_id);
    work.inserted.retain(|(id, _)| *id != stored_id);

    if rows::row_exists(conn, new_id, kind)? {
        debug!(
            "event=entity_rekey module=repo status=merged kind={} old_id={} new_id={}",
            kind, stored_id, new_id
        );
    } else {
        rows::insert(conn, &dependent)?;
        work.inserted.push((new_id, kind));
    }
    work.rekeyed.push(Rekey {
        kind,
        old_id: stored_id,
        new_id,
    });
    Ok(())
}

/// Removes everything owned by `owner`, recursing into annotations.
fn remove_attached(
    conn: &Connection,
    owner: OwnerRef,
    removed: &mut Vec<(EntityId, EntityKind)>,
) -> RepoResult<()> {
    for (id, kind) in rows::owned_by(conn, owner)? {
        if kind == EntityKind::Annotation {
            remove_attached(conn, OwnerRef::new(id, kind), removed)?;
        }
        if rows::delete_row(conn, id, kind)? {
            removed.push((id, kind));
        }
    }
    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}
