//! User use-case service.
//!
//! # Responsibility
//! - Gate writes with the shared validator before any storage access.
//! - Fold repository errors into the caller-facing error taxonomy.
//!
//! # Invariants
//! - Invalid input never reaches the repository.
//! - Service layer remains storage-agnostic.

use crate::cancel::CancellationToken;
use crate::model::user::{User, UserId};
use crate::repo::user_repo::{RepoError, UserRepository};
use crate::validation::{user_validator, UserValidator, ValidationErrors};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Caller-facing errors for user operations.
#[derive(Debug)]
pub enum UserServiceError {
    /// Input failed field validation; storage was not touched.
    Validation(ValidationErrors),
    /// `user_name` is held by another record.
    AlreadyExists(String),
    /// No record with this id.
    NotFound(UserId),
    /// Caller cancelled the operation.
    Cancelled,
    /// Storage failure. Details are for logs, not for clients.
    Storage(RepoError),
}

impl Display for UserServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validation(err) => write!(f, "{err}"),
            Self::AlreadyExists(user_name) => write!(f, "username already in use: {user_name}"),
            Self::NotFound(id) => write!(f, "user not found: {id}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Storage(err) => write!(f, "{err}"),
        }
    }
}

impl Error for UserServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Validation(err) => Some(err),
            Self::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for UserServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::AlreadyExists(user_name) => Self::AlreadyExists(user_name),
            RepoError::NotFound(id) => Self::NotFound(id),
            RepoError::Cancelled => Self::Cancelled,
            other => Self::Storage(other),
        }
    }
}

impl From<ValidationErrors> for UserServiceError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

pub type ServiceResult<T> = Result<T, UserServiceError>;

/// Use-case facade over a user repository.
pub struct UserService<R: UserRepository> {
    repo: R,
    validator: &'static UserValidator,
}

impl<R: UserRepository> UserService<R> {
    /// Creates a service using the process-wide validator.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            validator: user_validator(),
        }
    }

    pub fn repository(&self) -> &R {
        &self.repo
    }

    pub fn list(&self, cancel: &CancellationToken) -> ServiceResult<Vec<User>> {
        Ok(self.repo.list(cancel)?)
    }

    /// Fetches one user, failing with `NotFound` when absent.
    pub fn get(&self, cancel: &CancellationToken, id: UserId) -> ServiceResult<User> {
        self.repo
            .get(cancel, id)?
            .ok_or(UserServiceError::NotFound(id))
    }

    /// Validates and stores a new user. Any client-supplied id is ignored.
    pub fn create(&self, cancel: &CancellationToken, user: &mut User) -> ServiceResult<()> {
        self.validator.validate(user)?;
        user.id = None;
        Ok(self.repo.create(cancel, user)?)
    }

    /// Validates and replaces user `id` wholesale.
    pub fn update(
        &self,
        cancel: &CancellationToken,
        id: UserId,
        user: &mut User,
    ) -> ServiceResult<()> {
        self.validator.validate(user)?;
        Ok(self.repo.update(cancel, id, user)?)
    }

    pub fn delete(&self, cancel: &CancellationToken, id: UserId) -> ServiceResult<()> {
        Ok(self.repo.delete(cancel, id)?)
    }
}
