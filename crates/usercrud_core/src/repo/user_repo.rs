//! User repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide List/Get/Create/Update/Delete over canonical `users` storage.
//! - Enforce `user_name` uniqueness and id existence under concurrent access.
//! - Keep SQL details inside the core persistence boundary.
//!
//! # Invariants
//! - Every mutation runs check-then-write inside one `BEGIN IMMEDIATE`
//!   transaction. SQLite admits one writer at a time, so racing writers are
//!   serialized and the later one observes the earlier one's commit.
//! - Every error path returns before `commit`; dropping the transaction
//!   rolls it back.
//! - Waiting for the write lock stays cancellable; only the `BEGIN` is
//!   re-attempted, never a statement that could have written.
//! - No operation is otherwise retried.
//! - Read paths reject invalid persisted state instead of masking it.

use crate::cancel::CancellationToken;
use crate::db::{ConnectionPool, DbError, PooledConnection};
use crate::model::user::{User, UserId, UserStatus};
use log::{debug, error, info, warn};
use rusqlite::ffi::ErrorCode;
use rusqlite::{params, Connection, Params, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::{Duration, Instant};

// Slice of the busy timeout spent blocked in SQLite per lock attempt.
const LOCK_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(20);

const USER_COLUMNS: &str = "id, user_name, first_name, last_name, email, user_status, department";

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository error for user persistence operations.
#[derive(Debug)]
pub enum RepoError {
    /// Another live record already holds this `user_name`.
    AlreadyExists(String),
    /// No live record has this id.
    NotFound(UserId),
    /// Caller cancelled; any open transaction was rolled back.
    Cancelled,
    /// Storage unreachable or a query failed unexpectedly.
    Db(DbError),
    /// A stored row cannot be converted to a valid `User`.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyExists(user_name) => write!(f, "username already in use: {user_name}"),
            Self::NotFound(id) => write!(f, "user not found: {id}"),
            Self::Cancelled => write!(f, "operation cancelled"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted user data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::AlreadyExists(_) => None,
            Self::NotFound(_) => None,
            Self::Cancelled => None,
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        match value {
            DbError::Cancelled => Self::Cancelled,
            other => Self::Db(other),
        }
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Storage capability for user records.
///
/// Implementations must be safe to call from many threads at once and must
/// honour the uniqueness/existence contracts atomically.
pub trait UserRepository: Send + Sync {
    /// Returns all live records ordered by id.
    fn list(&self, cancel: &CancellationToken) -> RepoResult<Vec<User>>;

    /// Returns one record, or `None` when no live record has `id`.
    fn get(&self, cancel: &CancellationToken, id: UserId) -> RepoResult<Option<User>>;

    /// Inserts `user` and writes the stored values (including the new id)
    /// back into it.
    ///
    /// # Errors
    /// - `AlreadyExists` when `user.user_name` is taken.
    fn create(&self, cancel: &CancellationToken, user: &mut User) -> RepoResult<()>;

    /// Replaces every mutable field of record `id` and writes the stored
    /// values back into `user`.
    ///
    /// # Errors
    /// - `NotFound` when `id` has no live record.
    /// - `AlreadyExists` when another record holds `user.user_name`.
    fn update(&self, cancel: &CancellationToken, id: UserId, user: &mut User) -> RepoResult<()>;

    /// Permanently removes record `id`.
    ///
    /// # Errors
    /// - `NotFound` when `id` has no live record.
    fn delete(&self, cancel: &CancellationToken, id: UserId) -> RepoResult<()>;
}

impl<R: UserRepository + ?Sized> UserRepository for Arc<R> {
    fn list(&self, cancel: &CancellationToken) -> RepoResult<Vec<User>> {
        (**self).list(cancel)
    }

    fn get(&self, cancel: &CancellationToken, id: UserId) -> RepoResult<Option<User>> {
        (**self).get(cancel, id)
    }

    fn create(&self, cancel: &CancellationToken, user: &mut User) -> RepoResult<()> {
        (**self).create(cancel, user)
    }

    fn update(&self, cancel: &CancellationToken, id: UserId, user: &mut User) -> RepoResult<()> {
        (**self).update(cancel, id, user)
    }

    fn delete(&self, cancel: &CancellationToken, id: UserId) -> RepoResult<()> {
        (**self).delete(cancel, id)
    }
}

/// SQLite-backed user repository over a shared connection pool.
#[derive(Clone)]
pub struct SqliteUserRepository {
    pool: ConnectionPool,
}

impl SqliteUserRepository {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    fn busy_timeout(&self) -> Duration {
        self.pool.options().busy_timeout
    }

    fn checkout(&self, cancel: &CancellationToken) -> RepoResult<PooledConnection> {
        let conn = self.pool.acquire(cancel)?;
        conn.interrupt_on(cancel);
        Ok(conn)
    }
}

impl UserRepository for SqliteUserRepository {
    fn list(&self, cancel: &CancellationToken) -> RepoResult<Vec<User>> {
        let started_at = Instant::now();
        let result = self.checkout(cancel).and_then(|conn| {
            let mut stmt = conn.prepare(&format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC;"))?;
            let mut rows = stmt.query([])?;
            let mut users = Vec::new();
            while let Some(row) = rows.next()? {
                users.push(parse_user_row(row)?);
            }
            Ok(users)
        });
        finish("user_list", None, cancel, started_at, result)
    }

    fn get(&self, cancel: &CancellationToken, id: UserId) -> RepoResult<Option<User>> {
        let started_at = Instant::now();
        let result = self
            .checkout(cancel)
            .and_then(|conn| get_by_id(&conn, id));
        finish("user_get", Some(id), cancel, started_at, result)
    }

    fn create(&self, cancel: &CancellationToken, user: &mut User) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = self.checkout(cancel).and_then(|conn| {
            let tx = begin(&conn, cancel, self.busy_timeout())?;

            if find_by_user_name(&tx, user.user_name.as_str())?.is_some() {
                return Err(RepoError::AlreadyExists(user.user_name.clone()));
            }
            ensure_active(cancel)?;

            let stored = fetch_optional(
                &tx,
                &format!(
                    "INSERT INTO users (user_name, first_name, last_name, email, user_status, department)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                     RETURNING {USER_COLUMNS};"
                ),
                params![
                    user.user_name.as_str(),
                    user.first_name.as_str(),
                    user.last_name.as_str(),
                    user.email.as_str(),
                    user.status.as_str(),
                    user.department.as_deref(),
                ],
            )
            .map_err(|err| unique_violation_as_conflict(err, user.user_name.as_str()))?
            .ok_or_else(|| RepoError::InvalidData("insert returned no row".to_string()))?;

            commit(tx, cancel)?;
            *user = stored;
            Ok(())
        });
        let assigned = result.as_ref().ok().and(user.id);
        finish("user_create", assigned, cancel, started_at, result)
    }

    fn update(&self, cancel: &CancellationToken, id: UserId, user: &mut User) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = self.checkout(cancel).and_then(|conn| {
            let tx = begin(&conn, cancel, self.busy_timeout())?;

            let target = get_by_id(&tx, id)?.ok_or(RepoError::NotFound(id))?;
            ensure_active(cancel)?;

            // Keeping one's own name is not a conflict.
            if let Some(holder) = find_by_user_name(&tx, user.user_name.as_str())? {
                if holder.id != target.id {
                    return Err(RepoError::AlreadyExists(user.user_name.clone()));
                }
            }
            ensure_active(cancel)?;

            let stored = fetch_optional(
                &tx,
                &format!(
                    "UPDATE users
                     SET
                        user_name = ?1,
                        first_name = ?2,
                        last_name = ?3,
                        email = ?4,
                        user_status = ?5,
                        department = ?6
                     WHERE id = ?7
                     RETURNING {USER_COLUMNS};"
                ),
                params![
                    user.user_name.as_str(),
                    user.first_name.as_str(),
                    user.last_name.as_str(),
                    user.email.as_str(),
                    user.status.as_str(),
                    user.department.as_deref(),
                    id,
                ],
            )
            .map_err(|err| unique_violation_as_conflict(err, user.user_name.as_str()))?
            .ok_or(RepoError::NotFound(id))?;

            commit(tx, cancel)?;
            *user = stored;
            Ok(())
        });
        finish("user_update", Some(id), cancel, started_at, result)
    }

    fn delete(&self, cancel: &CancellationToken, id: UserId) -> RepoResult<()> {
        let started_at = Instant::now();
        let result = self.checkout(cancel).and_then(|conn| {
            let tx = begin(&conn, cancel, self.busy_timeout())?;

            if !user_exists(&tx, id)? {
                return Err(RepoError::NotFound(id));
            }
            ensure_active(cancel)?;

            tx.execute("DELETE FROM users WHERE id = ?1;", [id])?;

            commit(tx, cancel)?;
            Ok(())
        });
        finish("user_delete", Some(id), cancel, started_at, result)
    }
}

fn ensure_active(cancel: &CancellationToken) -> RepoResult<()> {
    if cancel.is_cancelled() {
        return Err(RepoError::Cancelled);
    }
    Ok(())
}

/// Opens a `BEGIN IMMEDIATE` transaction, waiting at most `busy_timeout`
/// for the write lock.
///
/// SQLite's own busy handler never yields to the progress handler, so the
/// wait is split into short attempts with a token check in between.
fn begin<'conn>(
    conn: &'conn Connection,
    cancel: &CancellationToken,
    busy_timeout: Duration,
) -> RepoResult<Transaction<'conn>> {
    ensure_active(cancel)?;
    let deadline = Instant::now() + busy_timeout;

    conn.busy_timeout(LOCK_ATTEMPT_TIMEOUT.min(busy_timeout))?;
    let opened = loop {
        match Transaction::new_unchecked(conn, TransactionBehavior::Immediate) {
            Ok(tx) => break Ok(tx),
            Err(err) if is_busy(&err) && !cancel.is_cancelled() && Instant::now() < deadline => {
                continue
            }
            Err(err) => break Err(err),
        }
    };
    conn.busy_timeout(busy_timeout)?;

    let tx = opened?;
    ensure_active(cancel)?;
    Ok(tx)
}

fn is_busy(err: &rusqlite::Error) -> bool {
    err.sqlite_error_code() == Some(ErrorCode::DatabaseBusy)
}

fn commit(tx: Transaction<'_>, cancel: &CancellationToken) -> RepoResult<()> {
    // Last chance to abort: past this point the write is durable.
    ensure_active(cancel)?;
    tx.commit()?;
    Ok(())
}

fn finish<T>(
    event: &str,
    user_id: Option<UserId>,
    cancel: &CancellationToken,
    started_at: Instant,
    result: RepoResult<T>,
) -> RepoResult<T> {
    let result = result.map_err(|err| interrupted_as_cancelled(err, cancel));
    let duration_ms = started_at.elapsed().as_millis();
    let user_id = user_id.map_or_else(|| "none".to_string(), |id| id.to_string());

    match &result {
        Ok(_) => debug!(
            "event={event} module=repo status=ok user_id={user_id} duration_ms={duration_ms}"
        ),
        Err(RepoError::AlreadyExists(_)) => info!(
            "event={event} module=repo status=rejected user_id={user_id} duration_ms={duration_ms} reason=already_exists"
        ),
        Err(RepoError::NotFound(_)) => info!(
            "event={event} module=repo status=rejected user_id={user_id} duration_ms={duration_ms} reason=not_found"
        ),
        Err(RepoError::Cancelled) => warn!(
            "event={event} module=repo status=cancelled user_id={user_id} duration_ms={duration_ms}"
        ),
        Err(err) => error!(
            "event={event} module=repo status=error user_id={user_id} duration_ms={duration_ms} error_code=storage_failed error={err}"
        ),
    }

    result
}

fn interrupted_as_cancelled(err: RepoError, cancel: &CancellationToken) -> RepoError {
    match err {
        RepoError::Db(DbError::Sqlite(ref inner))
            if cancel.is_cancelled()
                && matches!(
                    inner.sqlite_error_code(),
                    Some(ErrorCode::OperationInterrupted | ErrorCode::DatabaseBusy)
                ) =>
        {
            RepoError::Cancelled
        }
        other => other,
    }
}

fn unique_violation_as_conflict(err: RepoError, user_name: &str) -> RepoError {
    match err {
        RepoError::Db(DbError::Sqlite(rusqlite::Error::SqliteFailure(ref code, _)))
            if code.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE =>
        {
            RepoError::AlreadyExists(user_name.to_string())
        }
        other => other,
    }
}

fn fetch_optional<P: Params>(conn: &Connection, sql: &str, params: P) -> RepoResult<Option<User>> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query(params)?;
    let user = match rows.next()? {
        Some(row) => Some(parse_user_row(row)?),
        None => None,
    };
    Ok(user)
}

fn get_by_id(conn: &Connection, id: UserId) -> RepoResult<Option<User>> {
    fetch_optional(
        conn,
        &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1;"),
        [id],
    )
}

fn find_by_user_name(conn: &Connection, user_name: &str) -> RepoResult<Option<User>> {
    fetch_optional(
        conn,
        &format!("SELECT {USER_COLUMNS} FROM users WHERE user_name = ?1;"),
        [user_name],
    )
}

fn user_exists(conn: &Connection, id: UserId) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1);",
        [id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn parse_user_row(row: &Row<'_>) -> RepoResult<User> {
    let id: UserId = row.get("id")?;
    let status: String = row.get("user_status")?;
    if UserStatus::from_code(status.as_str()).is_none() {
        return Err(RepoError::InvalidData(format!(
            "invalid status `{status}` in users.user_status for id {id}"
        )));
    }

    Ok(User {
        id: Some(id),
        user_name: row.get("user_name")?,
        first_name: row.get("first_name")?,
        last_name: row.get("last_name")?,
        email: row.get("email")?,
        status,
        department: row.get("department")?,
    })
}
