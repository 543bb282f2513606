//! Row-level SQL for every entity kind.
//!
//! Helpers take `&Connection` so they run inside a transaction as well as on
//! the bare connection. Nothing here touches the identity index.

use crate::model::annotation::Annotation;
use crate::model::article::{Article, ArticleDraft};
use crate::model::author::Author;
use crate::model::decorator::{FileAttachment, Reference, Tag};
use crate::model::entity::Entity;
use crate::model::identity::{EntityId, EntityKind};
use crate::model::owner::OwnerRef;
use crate::repo::stash_repo::{RepoError, RepoResult};
use log::warn;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

/// Kinds that hang off an owner, in the order their tables are scanned.
const OWNED_KINDS: [EntityKind; 4] = [
    EntityKind::Annotation,
    EntityKind::Tag,
    EntityKind::File,
    EntityKind::Reference,
];

pub(crate) fn row_exists(conn: &Connection, id: EntityId, kind: EntityKind) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        &format!(
            "SELECT EXISTS(SELECT 1 FROM {} WHERE uuid = ?1);",
            kind.table()
        ),
        [id.to_string()],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Loads and hydrates one row; `None` when absent.
pub(crate) fn load(conn: &Connection, id: EntityId, kind: EntityKind) -> RepoResult<Option<Entity>> {
    let key = id.to_string();
    let entity = match kind {
        EntityKind::Author => conn
            .query_row(
                "SELECT first_name, last_name FROM authors WHERE uuid = ?1;",
                [key.as_str()],
                |row| Ok(Author::hydrate(id, row.get(0)?, row.get(1)?)),
            )
            .optional()?
            .map(Entity::from),
        EntityKind::Article => load_article(conn, id)?.map(Entity::from),
        EntityKind::Annotation => conn
            .query_row(
                "SELECT owner_uuid, owner_kind, summary, body FROM annotations WHERE uuid = ?1;",
                [key.as_str()],
                |row| {
                    Ok((
                        read_owner_columns(row)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?
            .map(|(owner, summary, body)| -> RepoResult<Entity> {
                Ok(Annotation::hydrate(id, parse_owner(owner)?, summary, body).into())
            })
            .transpose()?,
        EntityKind::Tag => conn
            .query_row(
                "SELECT owner_uuid, owner_kind, text FROM tags WHERE uuid = ?1;",
                [key.as_str()],
                |row| Ok((read_owner_columns(row)?, row.get::<_, String>(2)?)),
            )
            .optional()?
            .map(|(owner, text)| -> RepoResult<Entity> {
                Ok(Tag::hydrate(id, parse_owner(owner)?, text).into())
            })
            .transpose()?,
        EntityKind::File => conn
            .query_row(
                "SELECT owner_uuid, owner_kind, file_name, file_type, description, content
                 FROM files
                 WHERE uuid = ?1;",
                [key.as_str()],
                |row| {
                    Ok((
                        read_owner_columns(row)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, Vec<u8>>(5)?,
                    ))
                },
            )
            .optional()?
            .map(
                |(owner, name, file_type, description, content)| -> RepoResult<Entity> {
                    Ok(FileAttachment::hydrate(
                        id,
                        parse_owner(owner)?,
                        name,
                        file_type,
                        description,
                        content,
                    )
                    .into())
                },
            )
            .transpose()?,
        EntityKind::Reference => conn
            .query_row(
                "SELECT owner_uuid, owner_kind, target_uuid FROM refs WHERE uuid = ?1;",
                [key.as_str()],
                |row| Ok((read_owner_columns(row)?, row.get::<_, String>(2)?)),
            )
            .optional()?
            .map(|(owner, target)| -> RepoResult<Entity> {
                let target = parse_uuid(&target, "refs.target_uuid")?;
                Ok(Reference::hydrate(id, parse_owner(owner)?, target).into())
            })
            .transpose()?,
    };
    Ok(entity)
}

fn load_article(conn: &Connection, id: EntityId) -> RepoResult<Option<Article>> {
    let key = id.to_string();
    let draft = conn
        .query_row(
            "SELECT refkey, title, year, journal, volume, number, page_start, page_end, retracted
             FROM articles
             WHERE uuid = ?1;",
            [key.as_str()],
            |row| {
                Ok(ArticleDraft {
                    refkey: row.get(0)?,
                    authors: Vec::new(),
                    title: row.get(1)?,
                    year: row.get(2)?,
                    journal: row.get(3)?,
                    volume: row.get(4)?,
                    number: row.get(5)?,
                    pages: (row.get(6)?, row.get(7)?),
                    retracted: row.get(8)?,
                })
            },
        )
        .optional()?;
    let Some(mut draft) = draft else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT aa.author_uuid, a.first_name, a.last_name
         FROM article_authors aa
         LEFT JOIN authors a ON a.uuid = aa.author_uuid
         WHERE aa.article_uuid = ?1
         ORDER BY aa.position ASC;",
    )?;
    let mut rows = stmt.query([key.as_str()])?;
    while let Some(row) = rows.next()? {
        let author_text: String = row.get(0)?;
        let author_id = parse_uuid(&author_text, "article_authors.author_uuid")?;
        let first: Option<String> = row.get(1)?;
        let last: Option<String> = row.get(2)?;
        match (first, last) {
            (Some(first), Some(last)) => draft.authors.push(Author::hydrate(author_id, first, last)),
            _ => warn!(
                "event=article_load module=repo status=skip reason=missing_author article={} author={}",
                id, author_id
            ),
        }
    }

    Ok(Some(Article::hydrate(id, draft)))
}

/// Writes `entity` under its current id; articles also write their author
/// links. The caller makes sure no row exists under that id.
pub(crate) fn insert(conn: &Connection, entity: &Entity) -> RepoResult<()> {
    let key = entity.id().to_string();
    match entity {
        Entity::Author(author) => {
            conn.execute(
                "INSERT INTO authors (uuid, first_name, last_name) VALUES (?1, ?2, ?3);",
                params![key, author.first_name(), author.last_name()],
            )?;
        }
        Entity::Article(article) => {
            let (page_start, page_end) = article.pages();
            conn.execute(
                "INSERT INTO articles (
                    uuid, refkey, title, year, journal, volume, number, page_start, page_end, retracted
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10);",
                params![
                    key,
                    article.refkey(),
                    article.title(),
                    article.year(),
                    article.journal(),
                    article.volume(),
                    article.number(),
                    page_start,
                    page_end,
                    article.retracted(),
                ],
            )?;
            for (position, author_id) in article.author_ids().into_iter().enumerate() {
                conn.execute(
                    "INSERT OR REPLACE INTO article_authors (article_uuid, author_uuid, position)
                     VALUES (?1, ?2, ?3);",
                    params![key, author_id.to_string(), position as i64],
                )?;
            }
        }
        Entity::Annotation(annotation) => {
            let owner = annotation.owner();
            conn.execute(
                "INSERT INTO annotations (uuid, owner_uuid, owner_kind, summary, body)
                 VALUES (?1, ?2, ?3, ?4, ?5);",
                params![
                    key,
                    owner.id.to_string(),
                    owner.kind.as_str(),
                    annotation.summary(),
                    annotation.body(),
                ],
            )?;
        }
        Entity::Tag(tag) => {
            let owner = tag.owner();
            conn.execute(
                "INSERT INTO tags (uuid, owner_uuid, owner_kind, text) VALUES (?1, ?2, ?3, ?4);",
                params![key, owner.id.to_string(), owner.kind.as_str(), tag.text()],
            )?;
        }
        Entity::File(file) => {
            let owner = file.owner();
            conn.execute(
                "INSERT INTO files (
                    uuid, owner_uuid, owner_kind, file_name, file_type, description, size, content
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8);",
                params![
                    key,
                    owner.id.to_string(),
                    owner.kind.as_str(),
                    file.file_name(),
                    file.file_type(),
                    file.description(),
                    file.content().len() as i64,
                    file.content(),
                ],
            )?;
        }
        Entity::Reference(reference) => {
            let owner = reference.owner();
            conn.execute(
                "INSERT INTO refs (uuid, owner_uuid, owner_kind, target_uuid) VALUES (?1, ?2, ?3, ?4);",
                params![
                    key,
                    owner.id.to_string(),
                    owner.kind.as_str(),
                    reference.target().to_string(),
                ],
            )?;
        }
    }
    Ok(())
}

/// Deletes the entity row only. Returns whether a row was removed.
pub(crate) fn delete_row(conn: &Connection, id: EntityId, kind: EntityKind) -> RepoResult<bool> {
    let changed = conn.execute(
        &format!("DELETE FROM {} WHERE uuid = ?1;", kind.table()),
        [id.to_string()],
    )?;
    Ok(changed > 0)
}

/// Deletes association rows of an article.
pub(crate) fn delete_article_links(conn: &Connection, article_id: EntityId) -> RepoResult<usize> {
    Ok(conn.execute(
        "DELETE FROM article_authors WHERE article_uuid = ?1;",
        [article_id.to_string()],
    )?)
}

/// Deletes association rows that mention `id` on either side.
pub(crate) fn delete_links_touching(conn: &Connection, id: EntityId) -> RepoResult<usize> {
    Ok(conn.execute(
        "DELETE FROM article_authors WHERE article_uuid = ?1 OR author_uuid = ?1;",
        [id.to_string()],
    )?)
}

/// Annotations and decorators hanging off `owner`, matched on id and kind.
pub(crate) fn owned_by(
    conn: &Connection,
    owner: OwnerRef,
) -> RepoResult<Vec<(EntityId, EntityKind)>> {
    let key = owner.id.to_string();
    let mut owned = Vec::new();
    for kind in OWNED_KINDS {
        if !kind.may_be_owned_by(owner.kind) {
            continue;
        }
        let column = format!("{}.uuid", kind.table());
        let mut stmt = conn.prepare(&format!(
            "SELECT uuid FROM {} WHERE owner_uuid = ?1 AND owner_kind = ?2 ORDER BY uuid ASC;",
            kind.table()
        ))?;
        let mut rows = stmt.query(params![key, owner.kind.as_str()])?;
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            owned.push((parse_uuid(&text, &column)?, kind));
        }
    }
    Ok(owned)
}

/// References whose target is `target_id`.
pub(crate) fn references_to(conn: &Connection, target_id: EntityId) -> RepoResult<Vec<EntityId>> {
    collect_ids(
        conn,
        "SELECT uuid FROM refs WHERE target_uuid = ?1 ORDER BY uuid ASC;",
        target_id,
        "refs.uuid",
    )
}

/// Articles listing `author_id` among their authors.
pub(crate) fn articles_by(conn: &Connection, author_id: EntityId) -> RepoResult<Vec<EntityId>> {
    collect_ids(
        conn,
        "SELECT article_uuid FROM article_authors WHERE author_uuid = ?1 ORDER BY article_uuid ASC;",
        author_id,
        "article_authors.article_uuid",
    )
}

/// Every row id of one kind.
pub(crate) fn ids_of_kind(conn: &Connection, kind: EntityKind) -> RepoResult<Vec<EntityId>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT uuid FROM {} ORDER BY rowid ASC;",
        kind.table()
    ))?;
    let column = format!("{}.uuid", kind.table());
    let mut rows = stmt.query([])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let text: String = row.get(0)?;
        ids.push(parse_uuid(&text, &column)?);
    }
    Ok(ids)
}

/// Kind of the row stored under `id`, searching every table.
pub(crate) fn find_kind(conn: &Connection, id: EntityId) -> RepoResult<Option<EntityKind>> {
    for kind in EntityKind::ALL {
        if row_exists(conn, id, kind)? {
            return Ok(Some(kind));
        }
    }
    Ok(None)
}

fn collect_ids(
    conn: &Connection,
    sql: &str,
    key: EntityId,
    column: &str,
) -> RepoResult<Vec<EntityId>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([key.to_string()])?;
    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let text: String = row.get(0)?;
        ids.push(parse_uuid(&text, column)?);
    }
    Ok(ids)
}

fn read_owner_columns(row: &Row<'_>) -> rusqlite::Result<(String, String)> {
    Ok((row.get(0)?, row.get(1)?))
}

fn parse_owner((id, kind): (String, String)) -> RepoResult<OwnerRef> {
    let owner_id = parse_uuid(&id, "owner_uuid")?;
    let owner_kind = EntityKind::parse(&kind)
        .ok_or_else(|| RepoError::InvalidData(format!("invalid owner_kind value `{kind}`")))?;
    Ok(OwnerRef::new(owner_id, owner_kind))
}

pub(crate) fn parse_uuid(value: &str, column: &str) -> RepoResult<EntityId> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid value `{value}` in {column}")))
}
