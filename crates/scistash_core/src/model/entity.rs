//! Closed sum over every stash entity kind.
//!
//! # Responsibility
//! - Give stores and the session one value type to hold, regardless of kind.
//! - Dispatch textual field edits to the typed setters.
//!
//! # Invariants
//! - Every edit goes through a typed setter, so it always re-keys.
//! - Rendering (`Display`) never mutates.

use crate::model::annotation::Annotation;
use crate::model::article::Article;
use crate::model::author::Author;
use crate::model::decorator::{FileAttachment, Reference, Tag};
use crate::model::identity::{EntityId, EntityKind, Identity, Origin};
use crate::model::owner::OwnerRef;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

static PAGE_RANGE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*-{1,2}\s*(\d+)\s*$").expect("valid page range regex"));

/// Rejected textual edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    /// The entity kind has no editable field with this name.
    UnknownField { kind: EntityKind, field: String },
    /// The field exists but the value does not parse.
    InvalidValue {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownField { kind, field } => {
                write!(f, "unrecognized {kind} field `{field}`")
            }
            Self::InvalidValue {
                field,
                value,
                expected,
            } => write!(f, "invalid value `{value}` for `{field}`: expected {expected}"),
        }
    }
}

impl Error for FieldError {}

/// Any stash entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Entity {
    Author(Author),
    Article(Article),
    Annotation(Annotation),
    Tag(Tag),
    File(FileAttachment),
    Reference(Reference),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Author(_) => EntityKind::Author,
            Self::Article(_) => EntityKind::Article,
            Self::Annotation(_) => EntityKind::Annotation,
            Self::Tag(_) => EntityKind::Tag,
            Self::File(_) => EntityKind::File,
            Self::Reference(_) => EntityKind::Reference,
        }
    }

    pub fn identity(&self) -> &Identity {
        match self {
            Self::Author(inner) => inner.identity(),
            Self::Article(inner) => inner.identity(),
            Self::Annotation(inner) => inner.identity(),
            Self::Tag(inner) => inner.identity(),
            Self::File(inner) => inner.identity(),
            Self::Reference(inner) => inner.identity(),
        }
    }

    pub fn id(&self) -> EntityId {
        self.identity().id()
    }

    pub fn prior(&self) -> Option<EntityId> {
        self.identity().prior()
    }

    pub fn origin(&self) -> Origin {
        self.identity().origin()
    }

    pub fn is_dirty(&self) -> bool {
        self.identity().is_dirty()
    }

    /// Recomputes the identifier from the current fields.
    pub fn derive_id(&self) -> EntityId {
        match self {
            Self::Author(inner) => inner.derive_id(),
            Self::Article(inner) => inner.derive_id(),
            Self::Annotation(inner) => inner.derive_id(),
            Self::Tag(inner) => inner.derive_id(),
            Self::File(inner) => inner.derive_id(),
            Self::Reference(inner) => inner.derive_id(),
        }
    }

    /// Owner for annotations and decorators; `None` for authors and articles.
    pub fn owner(&self) -> Option<OwnerRef> {
        match self {
            Self::Author(_) | Self::Article(_) => None,
            Self::Annotation(inner) => Some(inner.owner()),
            Self::Tag(inner) => Some(inner.owner()),
            Self::File(inner) => Some(inner.owner()),
            Self::Reference(inner) => Some(inner.owner()),
        }
    }

    /// Applies a textual edit through the matching typed setter.
    ///
    /// # Errors
    /// - `FieldError::UnknownField` when the kind has no such field.
    /// - `FieldError::InvalidValue` when the value does not parse.
    pub fn edit(&mut self, field: &str, value: &str) -> Result<(), FieldError> {
        let kind = self.kind();
        let normalized = field.trim().to_ascii_lowercase();
        let unknown = || FieldError::UnknownField {
            kind,
            field: field.to_string(),
        };

        match self {
            Self::Author(author) => match normalized.as_str() {
                "firstname" | "first_name" => author.set_first_name(value),
                "lastname" | "last_name" => author.set_last_name(value),
                _ => return Err(unknown()),
            },
            Self::Article(article) => match normalized.as_str() {
                "refkey" => article.set_refkey(value),
                "title" => article.set_title(value),
                "year" => article.set_year(parse_number("year", value)?),
                "journal" => article.set_journal(value),
                "volume" => article.set_volume(parse_number("volume", value)?),
                "number" => article.set_number(parse_number("number", value)?),
                "pages" => {
                    let (start, end) = parse_pages(value)?;
                    article.set_pages(start, end);
                }
                "retracted" => article.set_retracted(parse_flag(value)?),
                _ => return Err(unknown()),
            },
            Self::Annotation(annotation) => match normalized.as_str() {
                "summary" => annotation.set_summary(value),
                "body" | "info" => annotation.set_body(value),
                _ => return Err(unknown()),
            },
            Self::Tag(tag) => match normalized.as_str() {
                "text" | "content" => tag.set_text(value),
                _ => return Err(unknown()),
            },
            Self::File(file) => match normalized.as_str() {
                "filename" | "fname" => file.set_file_name(value),
                "filetype" | "ftype" => file.set_file_type(value),
                "description" | "desc" => file.set_description(value),
                _ => return Err(unknown()),
            },
            Self::Reference(reference) => match normalized.as_str() {
                "target" => {
                    let target =
                        Uuid::parse_str(value.trim()).map_err(|_| FieldError::InvalidValue {
                            field: "target",
                            value: value.to_string(),
                            expected: "an entity identifier",
                        })?;
                    reference.set_target(target);
                }
                _ => return Err(unknown()),
            },
        }

        Ok(())
    }

    pub(crate) fn mark_persisted(&mut self) {
        match self {
            Self::Author(inner) => inner.mark_persisted(),
            Self::Article(inner) => inner.mark_persisted(),
            Self::Annotation(inner) => inner.mark_persisted(),
            Self::Tag(inner) => inner.mark_persisted(),
            Self::File(inner) => inner.mark_persisted(),
            Self::Reference(inner) => inner.mark_persisted(),
        }
    }

    /// Re-points an annotation or decorator to a re-keyed owner.
    ///
    /// Returns `false` for kinds that have no owner.
    pub(crate) fn follow_owner(&mut self, owner_id: EntityId) -> bool {
        match self {
            Self::Author(_) | Self::Article(_) => return false,
            Self::Annotation(inner) => inner.set_owner_id(owner_id),
            Self::Tag(inner) => inner.set_owner_id(owner_id),
            Self::File(inner) => inner.set_owner_id(owner_id),
            Self::Reference(inner) => inner.set_owner_id(owner_id),
        }
        true
    }
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Author(inner) => inner.fmt(f),
            Self::Article(inner) => inner.fmt(f),
            Self::Annotation(inner) => inner.fmt(f),
            Self::Tag(inner) => inner.fmt(f),
            Self::File(inner) => inner.fmt(f),
            Self::Reference(inner) => inner.fmt(f),
        }
    }
}

macro_rules! entity_from {
    ($($variant:ident => $ty:ty),+) => {
        $(
            impl From<$ty> for Entity {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )+
    };
}

entity_from!(
    Author => Author,
    Article => Article,
    Annotation => Annotation,
    Tag => Tag,
    File => FileAttachment,
    Reference => Reference
);

fn parse_number<T: std::str::FromStr>(field: &'static str, value: &str) -> Result<T, FieldError> {
    value.trim().parse().map_err(|_| FieldError::InvalidValue {
        field,
        value: value.to_string(),
        expected: "a whole number",
    })
}

fn parse_pages(value: &str) -> Result<(u32, u32), FieldError> {
    let invalid = || FieldError::InvalidValue {
        field: "pages",
        value: value.to_string(),
        expected: "a range like `12-34` or `12--34`",
    };
    let caps = PAGE_RANGE_RE.captures(value).ok_or_else(invalid)?;
    let start = caps[1].parse().map_err(|_| invalid())?;
    let end = caps[2].parse().map_err(|_| invalid())?;
    Ok((start, end))
}

fn parse_flag(value: &str) -> Result<bool, FieldError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "y" | "1" => Ok(true),
        "false" | "no" | "n" | "0" => Ok(false),
        _ => Err(FieldError::InvalidValue {
            field: "retracted",
            value: value.to_string(),
            expected: "yes or no",
        }),
    }
}
