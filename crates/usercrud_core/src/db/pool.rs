//! Bounded SQLite connection pool.
//!
//! # Responsibility
//! - Share a fixed maximum of connections to one database between threads.
//! - Hand connections back automatically when the caller is done.
//!
//! # Invariants
//! - At most `max_size` connections are open at any time.
//! - Only connections in autocommit mode (no open transaction) return to the
//!   idle set; anything else is closed.
//! - An in-memory pool holds exactly one connection, since every in-memory
//!   connection is a separate database.
//! - Waiting for a connection honours the caller's cancellation token.

use super::open::{open_db_in_memory, open_db_with_timeout, DEFAULT_BUSY_TIMEOUT};
use super::{DbError, DbResult};
use crate::cancel::CancellationToken;
use log::{debug, warn};
use rusqlite::Connection;
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(25);
// SQLite VM instructions between progress callbacks.
const PROGRESS_OPS: i32 = 1_000;

/// Pool sizing and timeout knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolOptions {
    pub max_size: usize,
    /// Per-connection SQLite busy timeout.
    pub busy_timeout: Duration,
    /// Upper bound on waiting for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_size: 4,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            acquire_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug)]
enum Source {
    File(PathBuf),
    Memory,
}

struct PoolState {
    idle: Vec<Connection>,
    open: usize,
}

struct PoolInner {
    source: Source,
    options: PoolOptions,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl PoolInner {
    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn connect(&self) -> DbResult<Connection> {
        match &self.source {
            Source::File(path) => open_db_with_timeout(path, self.options.busy_timeout),
            Source::Memory => open_db_in_memory(),
        }
    }

    fn release(&self, conn: Connection) {
        let mut state = self.lock();
        if conn.is_autocommit() {
            state.idle.push(conn);
        } else {
            warn!("event=pool_release module=db status=error error_code=open_transaction");
            state.open -= 1;
            drop(conn);
        }
        drop(state);
        self.available.notify_one();
    }
}

/// Cloneable handle to a shared connection pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Creates a pool over a database file.
    ///
    /// One connection is opened eagerly so schema bootstrap runs (and fails)
    /// at construction time rather than on the first request.
    pub fn open(path: impl AsRef<Path>, options: PoolOptions) -> DbResult<Self> {
        let options = PoolOptions {
            max_size: options.max_size.max(1),
            ..options
        };
        Self::with_source(Source::File(path.as_ref().to_path_buf()), options)
    }

    /// Creates a single-connection pool over a private in-memory database.
    pub fn in_memory() -> DbResult<Self> {
        let options = PoolOptions {
            max_size: 1,
            ..PoolOptions::default()
        };
        Self::with_source(Source::Memory, options)
    }

    fn with_source(source: Source, options: PoolOptions) -> DbResult<Self> {
        let inner = PoolInner {
            source,
            options,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                open: 0,
            }),
            available: Condvar::new(),
        };
        let first = inner.connect()?;
        {
            let mut state = inner.lock();
            state.idle.push(first);
            state.open = 1;
        }
        debug!(
            "event=pool_init module=db status=ok source={:?} max_size={}",
            inner.source, inner.options.max_size
        );
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    pub fn options(&self) -> PoolOptions {
        self.inner.options
    }

    /// Number of connections currently open (idle or checked out).
    pub fn open_connections(&self) -> usize {
        self.inner.lock().open
    }

    /// Checks out a connection, opening a new one or waiting as needed.
    ///
    /// # Errors
    /// - `DbError::Cancelled` when `cancel` fires before a connection is free.
    /// - `DbError::PoolTimeout` when none frees up within `acquire_timeout`.
    /// - Any bootstrap error from opening a fresh connection.
    pub fn acquire(&self, cancel: &CancellationToken) -> DbResult<PooledConnection> {
        let acquire_timeout = self.inner.options.acquire_timeout;
        let deadline = Instant::now() + acquire_timeout;
        let mut state = self.inner.lock();

        loop {
            if cancel.is_cancelled() {
                return Err(DbError::Cancelled);
            }

            if let Some(conn) = state.idle.pop() {
                return Ok(self.guard(conn));
            }

            if state.open < self.inner.options.max_size {
                state.open += 1;
                drop(state);
                return match self.inner.connect() {
                    Ok(conn) => Ok(self.guard(conn)),
                    Err(err) => {
                        self.inner.lock().open -= 1;
                        self.inner.available.notify_one();
                        Err(err)
                    }
                };
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(DbError::PoolTimeout(acquire_timeout));
            }
            let wait = (deadline - now).min(CANCEL_POLL_INTERVAL);
            state = self
                .inner
                .available
                .wait_timeout(state, wait)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    fn guard(&self, conn: Connection) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            pool: Arc::clone(&self.inner),
        }
    }
}

/// Connection checked out of a [`ConnectionPool`]; returned on drop.
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: Arc<PoolInner>,
}

impl PooledConnection {
    /// Interrupts running statements once `cancel` fires.
    ///
    /// The hook stays installed until the connection goes back to the pool.
    pub fn interrupt_on(&self, cancel: &CancellationToken) {
        let token = cancel.clone();
        self.progress_handler(PROGRESS_OPS, Some(move || token.is_cancelled()));
    }
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn
            .as_ref()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn
            .as_mut()
            .unwrap_or_else(|| unreachable!("pooled connection used after release"))
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            conn.progress_handler(0, None::<fn() -> bool>);
            self.pool.release(conn);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ConnectionPool, PoolOptions};
    use crate::cancel::CancellationToken;
    use crate::db::DbError;
    use std::time::Duration;

    fn small_pool(dir: &tempfile::TempDir, max_size: usize) -> ConnectionPool {
        ConnectionPool::open(
            dir.path().join("pool.db"),
            PoolOptions {
                max_size,
                acquire_timeout: Duration::from_millis(100),
                ..PoolOptions::default()
            },
        )
        .unwrap()
    }

    #[test]
    fn reuses_released_connections() {
        let dir = tempfile::tempdir().unwrap();
        let pool = small_pool(&dir, 2);
        let cancel = CancellationToken::new();

        drop(pool.acquire(&cancel).unwrap());
        drop(pool.acquire(&cancel).unwrap());
        assert_eq!(pool.open_connections(), 1);
    }

    #[test]
    fn opens_up_to_max_size_then_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let pool = small_pool(&dir, 2);
        let cancel = CancellationToken::new();

        let first = pool.acquire(&cancel).unwrap();
        let second = pool.acquire(&cancel).unwrap();
        assert_eq!(pool.open_connections(), 2);

        let err = pool.acquire(&cancel).err().unwrap();
        assert!(matches!(err, DbError::PoolTimeout(_)));

        drop(first);
        drop(second);
        assert!(pool.acquire(&cancel).is_ok());
    }

    #[test]
    fn cancelled_token_fails_acquire() {
        let dir = tempfile::tempdir().unwrap();
        let pool = small_pool(&dir, 1);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = pool.acquire(&cancel).err().unwrap();
        assert!(matches!(err, DbError::Cancelled));
    }

    #[test]
    fn waiter_is_woken_by_release() {
        let dir = tempfile::tempdir().unwrap();
        let pool = ConnectionPool::open(
            dir.path().join("pool.db"),
            PoolOptions {
                max_size: 1,
                acquire_timeout: Duration::from_secs(5),
                ..PoolOptions::default()
            },
        )
        .unwrap();
        let held = pool.acquire(&CancellationToken::new()).unwrap();

        let waiter_pool = pool.clone();
        let waiter = std::thread::spawn(move || {
            waiter_pool
                .acquire(&CancellationToken::new())
                .map(|_| ())
                .is_ok()
        });
        std::thread::sleep(Duration::from_millis(50));
        drop(held);

        assert!(waiter.join().unwrap());
    }

    #[test]
    fn in_memory_pool_has_single_connection() {
        let pool = ConnectionPool::in_memory().unwrap();
        assert_eq!(pool.options().max_size, 1);
        assert_eq!(pool.open_connections(), 1);
    }
}
