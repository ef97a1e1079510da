//! In-memory user repository.
//!
//! # Responsibility
//! - Provide a storage-free `UserRepository` for callers and tests that do
//!   not need SQLite.
//!
//! # Invariants
//! - The state mutex is the transaction: each operation checks and writes
//!   under one guard, and error paths return before touching the map.
//! - Ids come from a monotonic counter and are never reused.

use crate::cancel::CancellationToken;
use crate::model::user::{User, UserId};
use crate::repo::user_repo::{RepoError, RepoResult, UserRepository};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct MemoryState {
    rows: BTreeMap<UserId, User>,
    last_id: UserId,
}

impl MemoryState {
    fn holder_of(&self, user_name: &str) -> Option<UserId> {
        self.rows
            .values()
            .find(|row| row.user_name == user_name)
            .and_then(|row| row.id)
    }
}

/// `BTreeMap`-backed repository guarded by a mutex.
#[derive(Default)]
pub struct InMemoryUserRepository {
    state: Mutex<MemoryState>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self, cancel: &CancellationToken) -> RepoResult<MutexGuard<'_, MemoryState>> {
        if cancel.is_cancelled() {
            return Err(RepoError::Cancelled);
        }
        Ok(self.state.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl UserRepository for InMemoryUserRepository {
    fn list(&self, cancel: &CancellationToken) -> RepoResult<Vec<User>> {
        let state = self.lock(cancel)?;
        Ok(state.rows.values().cloned().collect())
    }

    fn get(&self, cancel: &CancellationToken, id: UserId) -> RepoResult<Option<User>> {
        let state = self.lock(cancel)?;
        Ok(state.rows.get(&id).cloned())
    }

    fn create(&self, cancel: &CancellationToken, user: &mut User) -> RepoResult<()> {
        let mut state = self.lock(cancel)?;
        if state.holder_of(user.user_name.as_str()).is_some() {
            return Err(RepoError::AlreadyExists(user.user_name.clone()));
        }

        state.last_id += 1;
        let id = state.last_id;
        user.id = Some(id);
        state.rows.insert(id, user.clone());
        Ok(())
    }

    fn update(&self, cancel: &CancellationToken, id: UserId, user: &mut User) -> RepoResult<()> {
        let mut state = self.lock(cancel)?;
        if !state.rows.contains_key(&id) {
            return Err(RepoError::NotFound(id));
        }
        if let Some(holder) = state.holder_of(user.user_name.as_str()) {
            if holder != id {
                return Err(RepoError::AlreadyExists(user.user_name.clone()));
            }
        }

        user.id = Some(id);
        state.rows.insert(id, user.clone());
        Ok(())
    }

    fn delete(&self, cancel: &CancellationToken, id: UserId) -> RepoResult<()> {
        let mut state = self.lock(cancel)?;
        match state.rows.remove(&id) {
            Some(_) => Ok(()),
            None => Err(RepoError::NotFound(id)),
        }
    }
}
