//! Stash entity model.
//!
//! # Responsibility
//! - Define value types for authors, articles, annotations and decorators.
//! - Own the content-hash identity contract shared by all of them.
//!
//! # Invariants
//! - Every entity's identifier is derived from its identity-relevant fields.
//! - Mutation happens only through typed setters, which re-key.
//! - Entity equality is identifier equality.

pub mod annotation;
pub mod article;
pub mod author;
pub mod decorator;
pub mod entity;
pub mod identity;
pub mod owner;
