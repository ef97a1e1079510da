use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use usercrud_core::db::open_db;
use usercrud_core::{
    CancellationToken, ConnectionPool, PoolOptions, RepoError, SqliteUserRepository, User,
    UserRepository, UserStatus,
};

const RACERS: usize = 8;

fn file_repo(dir: &tempfile::TempDir, max_size: usize) -> Arc<SqliteUserRepository> {
    let pool = ConnectionPool::open(
        dir.path().join("users.db"),
        PoolOptions {
            max_size,
            ..PoolOptions::default()
        },
    )
    .unwrap();
    Arc::new(SqliteUserRepository::new(pool))
}

fn user(user_name: &str, first_name: &str) -> User {
    User::new(
        user_name,
        first_name,
        "Doe",
        "johndoe@yahoo.com",
        UserStatus::Active,
    )
}

#[test]
fn concurrent_creates_with_same_user_name_yield_exactly_one_success() {
    let dir = tempfile::tempdir().unwrap();
    let repo = file_repo(&dir, RACERS);
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles = (0..RACERS)
        .map(|index| {
            let repo = Arc::clone(&repo);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut candidate = user("JohnDoe", &format!("John{index}"));
                barrier.wait();
                repo.create(&CancellationToken::new(), &mut candidate)
            })
        })
        .collect::<Vec<_>>();

    let results = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();

    let successes = results.iter().filter(|result| result.is_ok()).count();
    let conflicts = results
        .iter()
        .filter(|result| matches!(result, Err(RepoError::AlreadyExists(_))))
        .count();
    assert_eq!(successes, 1, "{results:?}");
    assert_eq!(conflicts, RACERS - 1, "{results:?}");

    let stored = repo.list(&CancellationToken::new()).unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].user_name, "JohnDoe");
}

#[test]
fn concurrent_renames_to_same_user_name_yield_exactly_one_success() {
    let dir = tempfile::tempdir().unwrap();
    let repo = file_repo(&dir, RACERS);
    let cancel = CancellationToken::new();

    let ids = (0..RACERS)
        .map(|index| {
            let mut created = user(&format!("user{index}"), "Racer");
            repo.create(&cancel, &mut created).unwrap();
            created.id.unwrap()
        })
        .collect::<Vec<_>>();

    let barrier = Arc::new(Barrier::new(RACERS));
    let handles = ids
        .iter()
        .copied()
        .map(|id| {
            let repo = Arc::clone(&repo);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut rename = user("Winner", "Racer");
                barrier.wait();
                repo.update(&CancellationToken::new(), id, &mut rename)
            })
        })
        .collect::<Vec<_>>();

    let results = handles
        .into_iter()
        .map(|handle| handle.join().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);

    let winners = repo
        .list(&cancel)
        .unwrap()
        .into_iter()
        .filter(|stored| stored.user_name == "Winner")
        .count();
    assert_eq!(winners, 1);
}

#[test]
fn concurrent_creates_with_distinct_names_all_succeed() {
    let dir = tempfile::tempdir().unwrap();
    let repo = file_repo(&dir, 4);
    let barrier = Arc::new(Barrier::new(RACERS));

    let handles = (0..RACERS)
        .map(|index| {
            let repo = Arc::clone(&repo);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut candidate = user(&format!("distinct{index}"), "Solo");
                barrier.wait();
                repo.create(&CancellationToken::new(), &mut candidate)
                    .map(|()| candidate.id)
            })
        })
        .collect::<Vec<_>>();

    let mut ids = handles
        .into_iter()
        .map(|handle| handle.join().unwrap().unwrap().unwrap())
        .collect::<Vec<_>>();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), RACERS);
}

#[test]
fn cancellation_while_waiting_for_storage_aborts_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let repo = file_repo(&dir, 1);
    let cancel = CancellationToken::new();

    let mut existing = user("JohnDoe", "John");
    repo.create(&cancel, &mut existing).unwrap();
    let id = existing.id.unwrap();

    // Occupy the only connection so the delete has to wait.
    let held = repo.pool().acquire(&cancel).unwrap();

    let token = CancellationToken::new();
    let worker = {
        let repo = Arc::clone(&repo);
        let token = token.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let result = repo.delete(&token, id);
            (result, started.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    token.cancel();
    let (result, waited) = worker.join().unwrap();
    drop(held);

    assert!(matches!(result, Err(RepoError::Cancelled)));
    assert!(waited < Duration::from_secs(2));
    assert_eq!(repo.get(&cancel, id).unwrap(), Some(existing));
}

#[test]
fn cancellation_while_waiting_for_write_lock_aborts_promptly() {
    let dir = tempfile::tempdir().unwrap();
    let repo = file_repo(&dir, 2);
    let cancel = CancellationToken::new();

    let mut existing = user("JohnDoe", "John");
    repo.create(&cancel, &mut existing).unwrap();
    let id = existing.id.unwrap();

    // Another process-level writer holds the database write lock.
    let holder = open_db(dir.path().join("users.db")).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let token = CancellationToken::new();
    let worker = {
        let repo = Arc::clone(&repo);
        let token = token.clone();
        thread::spawn(move || {
            let started = Instant::now();
            let result = repo.delete(&token, id);
            (result, started.elapsed())
        })
    };

    thread::sleep(Duration::from_millis(50));
    token.cancel();
    let (result, waited) = worker.join().unwrap();
    holder.execute_batch("ROLLBACK;").unwrap();

    assert!(matches!(result, Err(RepoError::Cancelled)), "{result:?}");
    assert!(waited < Duration::from_secs(1), "waited {waited:?}");
    assert_eq!(repo.get(&cancel, id).unwrap(), Some(existing));
}

#[test]
fn write_lock_wait_succeeds_when_lock_frees_before_busy_timeout() {
    let dir = tempfile::tempdir().unwrap();
    let repo = file_repo(&dir, 2);
    let cancel = CancellationToken::new();

    let mut existing = user("JohnDoe", "John");
    repo.create(&cancel, &mut existing).unwrap();
    let id = existing.id.unwrap();

    let holder = open_db(dir.path().join("users.db")).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let worker = {
        let repo = Arc::clone(&repo);
        thread::spawn(move || repo.delete(&CancellationToken::new(), id))
    };

    thread::sleep(Duration::from_millis(200));
    holder.execute_batch("COMMIT;").unwrap();

    worker.join().unwrap().unwrap();
    assert_eq!(repo.get(&cancel, id).unwrap(), None);
}
