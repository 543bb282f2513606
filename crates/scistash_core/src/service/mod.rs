//! Session-level orchestration.
//!
//! # Responsibility
//! - Hold at most one current entity and move entities between staging and
//!   the durable store.
//! - Translate store errors into protocol errors for callers.

pub mod session;
