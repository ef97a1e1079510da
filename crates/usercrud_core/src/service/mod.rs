//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate validation and repository calls into use-case level APIs.
//! - Keep boundary layers decoupled from storage details.

pub mod user_service;
