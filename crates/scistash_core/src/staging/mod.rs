//! Session-scoped staging of uncommitted entities.
//!
//! # Responsibility
//! - Hold fresh or parked entities in memory until the session commits or
//!   discards them.
//! - Never touch the durable store.

pub mod staging_store;
