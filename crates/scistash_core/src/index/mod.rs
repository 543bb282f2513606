//! Process-wide identifier registry.
//!
//! # Responsibility
//! - Answer "what kind is this id" without scanning every store.
//!
//! # Invariants
//! - A registered id lives in exactly one of {staging, durable store}.
//! - Cross-kind collisions are surfaced, never overwritten.

pub mod identity_index;
