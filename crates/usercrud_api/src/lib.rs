//! Request boundary for the user record service.
//!
//! Turns decoded request input into core calls and core results into
//! status + JSON responses. Transport wiring lives with the caller.

pub mod api;

pub use api::{ApiResponse, UserApi};
