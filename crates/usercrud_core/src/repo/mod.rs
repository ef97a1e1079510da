//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the storage capability for user records.
//! - Isolate SQLite query details from service/boundary orchestration.
//!
//! # Invariants
//! - Repository APIs return semantic errors (`NotFound`, `AlreadyExists`)
//!   in addition to storage transport errors.
//! - Backends are interchangeable behind `UserRepository`.

pub mod memory_repo;
pub mod user_repo;
