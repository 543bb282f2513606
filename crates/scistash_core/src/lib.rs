//! Staging-and-identity core for SciStash.
//! Entities get content-derived identifiers; edits are staged in memory and
//! reconciled against a SQLite stash on save.

pub mod config;
pub mod db;
pub mod index;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod staging;

pub use config::StashConfig;
pub use db::{close_db, open_db, open_db_in_memory, open_stash, Connection, DbError, DbResult};
pub use index::identity_index::{IdentityIndex, IndexError, IndexResult};
pub use logging::{default_log_level, init_from_config, init_logging, logging_status, LoggingError};
pub use model::annotation::Annotation;
pub use model::article::{Article, ArticleDraft};
pub use model::author::Author;
pub use model::decorator::{FileAttachment, Reference, Tag};
pub use model::entity::{Entity, FieldError};
pub use model::identity::{derive_id, EntityId, EntityKind, Identity, Origin, Rekey};
pub use model::owner::{ModelError, OwnerRef};
pub use repo::cascade::{CascadeAll, CascadeClass, CascadeNone, CascadePolicy};
pub use repo::listing::{ListRenderer, ListRow, PlainListRenderer, Related};
pub use repo::stash_repo::{
    DeleteReport, RepoError, RepoResult, SaveReport, SqliteStashRepository, StashRepository,
};
pub use service::session::{
    CommitOutcome, SessionError, SessionResult, SessionState, StashSession,
};
pub use staging::staging_store::{StagingError, StagingResult, StagingStore};

/// Minimal health-check API for early integration.
pub fn ping() -> &'static str {
    "pong"
}

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
