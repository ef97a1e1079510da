//! User domain model.
//!
//! # Responsibility
//! - Define the canonical data structures used by core business logic.
//!
//! # Invariants
//! - Every stored user is identified by a store-assigned `UserId`.
//! - Deletion is permanent; there are no tombstones.

pub mod user;
