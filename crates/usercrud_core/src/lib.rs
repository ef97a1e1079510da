//! Core domain logic for the user record service.
//! This crate is the single source of truth for user invariants.

pub mod cancel;
pub mod config;
pub mod db;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;
pub mod validation;

pub use cancel::CancellationToken;
pub use config::{AppConfig, ConfigError};
pub use db::{ConnectionPool, DbError, PoolOptions};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::user::{User, UserId, UserStatus};
pub use repo::memory_repo::InMemoryUserRepository;
pub use repo::user_repo::{RepoError, RepoResult, SqliteUserRepository, UserRepository};
pub use service::user_service::{ServiceResult, UserService, UserServiceError};
pub use validation::{
    user_validator, UserValidator, ValidationErrors, Violation, ViolationReason,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }
}
