//! One-line rendering of durable rows for `list_all`.
//!
//! Rows arrive already joined against their owner (and reference target);
//! a missing counterpart is carried as `Related::Missing` so orphans still
//! list.

use crate::model::entity::Entity;
use crate::model::identity::{EntityId, EntityKind};

/// Counterpart of a listed row: its owner, or a reference's target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Related {
    Present {
        id: EntityId,
        kind: EntityKind,
        label: String,
    },
    Missing {
        id: EntityId,
        kind: Option<EntityKind>,
    },
}

impl Related {
    pub fn id(&self) -> EntityId {
        match self {
            Self::Present { id, .. } | Self::Missing { id, .. } => *id,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Self::Missing { .. })
    }
}

/// A durable row plus the rows it points at.
#[derive(Debug, Clone)]
pub struct ListRow {
    pub entity: Entity,
    pub owner: Option<Related>,
    /// Set for references only.
    pub target: Option<Related>,
}

/// Turns a listed row into display text.
pub trait ListRenderer {
    fn render(&self, row: &ListRow) -> String;
}

/// Compact, tab-free rendering used by default.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainListRenderer;

impl ListRenderer for PlainListRenderer {
    fn render(&self, row: &ListRow) -> String {
        let head = match &row.entity {
            Entity::Author(author) => author.formal_name(),
            Entity::Article(article) => format!(
                "[{}] {} ({}) {}",
                article.refkey(),
                article.title(),
                article.year(),
                if article.retracted() { "RETRACTED" } else { "" }
            )
            .trim_end()
            .to_string(),
            Entity::Annotation(annotation) => annotation.summary().to_string(),
            Entity::Tag(tag) => format!("#{}", tag.text()),
            Entity::File(file) => format!("{} ({} bytes)", file.file_name(), file.size()),
            Entity::Reference(_) => String::from("reference"),
        };

        let mut line = format!("{}  {}", row.entity.id(), head);
        if let Some(owner) = &row.owner {
            line.push_str("  on ");
            line.push_str(&related_label(owner));
        }
        if let Some(target) = &row.target {
            line.push_str("  -> ");
            line.push_str(&related_label(target));
        }
        line
    }
}

/// `kind "label"` for a present counterpart, a marker for a missing one.
pub fn related_label(related: &Related) -> String {
    match related {
        Related::Present { kind, label, .. } => format!("{kind} \"{label}\""),
        Related::Missing {
            id,
            kind: Some(kind),
        } => format!("<missing {kind} {id}>"),
        Related::Missing { id, kind: None } => format!("<missing {id}>"),
    }
}

/// Short label naming an entity inside someone else's row.
pub(crate) fn short_label(entity: &Entity) -> String {
    match entity {
        Entity::Author(author) => author.formal_name(),
        Entity::Article(article) => article.refkey().to_string(),
        Entity::Annotation(annotation) => annotation.summary().to_string(),
        Entity::Tag(tag) => tag.text().to_string(),
        Entity::File(file) => file.file_name().to_string(),
        Entity::Reference(reference) => reference.target().to_string(),
    }
}
