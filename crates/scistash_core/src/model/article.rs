//! Article entity.
//!
//! # Invariants
//! - Author order is significant and part of the identifier.
//! - An author appears at most once per article.
//! - Authors are persisted through the association table, never embedded in
//!   the article row.

use crate::model::author::Author;
use crate::model::identity::{derive_id, EntityId, EntityKind, Identity, Origin};
use serde::Serialize;
use std::fmt::{Display, Formatter};
use std::hash::{Hash, Hasher};

/// Field values used to construct a fresh article.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleDraft {
    /// Citation key, e.g. `lovelace1843`.
    pub refkey: String,
    pub authors: Vec<Author>,
    pub title: String,
    pub year: i32,
    pub journal: String,
    pub volume: u32,
    pub number: u32,
    /// Inclusive page range `(start, end)`.
    pub pages: (u32, u32),
    pub retracted: bool,
}

/// A citable journal article.
#[derive(Debug, Clone, Serialize)]
pub struct Article {
    #[serde(flatten)]
    identity: Identity,
    refkey: String,
    authors: Vec<Author>,
    title: String,
    year: i32,
    journal: String,
    volume: u32,
    number: u32,
    pages: (u32, u32),
    retracted: bool,
}

impl Article {
    pub fn new(draft: ArticleDraft) -> Self {
        let mut authors: Vec<Author> = Vec::with_capacity(draft.authors.len());
        for author in draft.authors {
            if !authors.iter().any(|known| known.id() == author.id()) {
                authors.push(author);
            }
        }

        let mut article = Self {
            identity: Identity::fresh(EntityId::nil()),
            refkey: draft.refkey,
            authors,
            title: draft.title,
            year: draft.year,
            journal: draft.journal,
            volume: draft.volume,
            number: draft.number,
            pages: draft.pages,
            retracted: draft.retracted,
        };
        article.identity = Identity::fresh(article.derive_id());
        article
    }

    pub(crate) fn hydrate(stored_id: EntityId, draft: ArticleDraft) -> Self {
        let mut article = Self::new(draft);
        article.identity = Identity::hydrated(article.derive_id(), stored_id);
        article
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

    pub fn refkey(&self) -> &str {
        &self.refkey
    }

    pub fn authors(&self) -> &[Author] {
        &self.authors
    }

    pub fn author_ids(&self) -> Vec<EntityId> {
        self.authors.iter().map(Author::id).collect()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn journal(&self) -> &str {
        &self.journal
    }

    pub fn volume(&self) -> u32 {
        self.volume
    }

    pub fn number(&self) -> u32 {
        self.number
    }

    pub fn pages(&self) -> (u32, u32) {
        self.pages
    }

    pub fn retracted(&self) -> bool {
        self.retracted
    }

    pub fn set_refkey(&mut self, value: impl Into<String>) {
        self.refkey = value.into();
        self.rekey();
    }

    pub fn set_title(&mut self, value: impl Into<String>) {
        self.title = value.into();
        self.rekey();
    }

    pub fn set_year(&mut self, value: i32) {
        self.year = value;
        self.rekey();
    }

    pub fn set_journal(&mut self, value: impl Into<String>) {
        self.journal = value.into();
        self.rekey();
    }

    pub fn set_volume(&mut self, value: u32) {
        self.volume = value;
        self.rekey();
    }

    pub fn set_number(&mut self, value: u32) {
        self.number = value;
        self.rekey();
    }

    pub fn set_pages(&mut self, start: u32, end: u32) {
        self.pages = (start, end);
        self.rekey();
    }

    pub fn set_retracted(&mut self, value: bool) {
        self.retracted = value;
        self.rekey();
    }

    /// Marks the article as retracted.
    pub fn retract(&mut self) {
        self.set_retracted(true);
    }

    /// Appends an author. Returns `false` when the author is already listed.
    pub fn add_author(&mut self, author: Author) -> bool {
        if self.authors.iter().any(|known| known.id() == author.id()) {
            return false;
        }
        self.authors.push(author);
        self.rekey();
        true
    }

    /// Removes an author by id. Returns whether anything was removed.
    pub fn remove_author(&mut self, author_id: EntityId) -> bool {
        let before = self.authors.len();
        self.authors.retain(|author| author.id() != author_id);
        if self.authors.len() == before {
            return false;
        }
        self.rekey();
        true
    }

    /// Swaps a re-keyed author in place, keeping its position.
    pub(crate) fn replace_author(&mut self, old_id: EntityId, author: Author) -> bool {
        let Some(slot) = self.authors.iter_mut().find(|known| known.id() == old_id) else {
            return false;
        };
        *slot = author;
        self.rekey();
        true
    }

    /// Recomputes the identifier from current fields.
    pub fn derive_id(&self) -> EntityId {
        derive_id(EntityKind::Article, self.content().as_bytes())
    }

    pub(crate) fn mark_persisted(&mut self) {
        self.identity.mark_persisted();
    }

    fn content(&self) -> String {
        let authors: String = self
            .authors
            .iter()
            .map(|author| author.id().to_string())
            .collect();
        format!(
            "{}{}{}{}{}{}{}{}{}{}",
            self.refkey,
            authors,
            self.title,
            self.year,
            self.journal,
            self.volume,
            self.number,
            self.pages.0,
            self.pages.1,
            self.retracted
        )
    }

    fn rekey(&mut self) {
        let next = self.derive_id();
        self.identity.rekey(next);
    }
}

impl PartialEq for Article {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Article {}

impl Hash for Article {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl Display for Article {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let byline = match self.authors.split_last() {
            None => String::from("(no authors)"),
            Some((last, [])) => last.formal_name(),
            Some((last, rest)) => {
                let head: Vec<String> = rest.iter().map(Author::formal_name).collect();
                format!("{} and {}", head.join("; "), last.formal_name())
            }
        };
        write!(
            f,
            "==> Article: {}\n\tKey: {}\n\tYear: {}\n\tAuthors: {}\n\tTitle: {}\n\tJournal: {}\n\tVolume: {}\n\tNumber: {}\n\tPages: {}--{}\n\tRetracted: {}",
            self.id(),
            self.refkey,
            self.year,
            byline,
            self.title,
            self.journal,
            self.volume,
            self.number,
            self.pages.0,
            self.pages.1,
            if self.retracted { "yes" } else { "no" }
        )
    }
}
