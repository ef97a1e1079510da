//! Caller-driven cancellation signal.
//!
//! # Responsibility
//! - Let request handlers abort in-flight storage work (e.g. on client
//!   disconnect).
//!
//! # Invariants
//! - Cancellation is one-way; a fired token never resets.
//! - Clones observe the same signal.
//! - Only the synchronous half of the token is used, so no async runtime is
//!   required.

pub use tokio_util::sync::CancellationToken;
