//! Durable store: SQLite persistence for stash entities.
//!
//! # Responsibility
//! - Define the repository contract used by the session.
//! - Keep SQL, re-keying and cascade mechanics out of the session layer.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `NoOpSave`) in
//!   addition to storage errors.
//! - Rows are keyed by content-derived identifiers stored as hyphenated text.

pub mod cascade;
pub mod listing;
mod rows;
pub mod stash_repo;
