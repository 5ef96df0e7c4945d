mod common;

use common::{ctx, setup_file_db, user, user_handlers, User};
use repokit_core::query::select_by;
use repokit_core::{Database, RepoOptions, Repository};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use uuid::Uuid;

/// Repository whose lookup resolver lets a second connection insert the
/// same email after the identifier lookup missed, before the insert runs.
fn racing_repo(db: &Database, rival: Database, rival_id: Uuid) -> Repository<User> {
    let fired = Arc::new(AtomicBool::new(false));
    let handlers = user_handlers().with_lookup_resolver(move |_, record: &User| {
        if !fired.swap(true, Ordering::SeqCst) {
            rival
                .execute_batch(&format!(
                    "INSERT INTO users (id, email, name, tenant_id, age, created_by)
                     VALUES ('{rival_id}', '{}', 'Winner', 'acme', 41, 'rival')",
                    record.email
                ))
                .expect("rival insert");
        }
        Vec::new()
    });
    Repository::try_new(db.clone(), handlers, RepoOptions::default()).expect("racing repo")
}

#[test]
fn get_or_create_returns_the_row_a_delayed_rival_inserted() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.sqlite3");
    let db = setup_file_db(&path);
    let rival = Database::open(&path).unwrap();
    let rival_id = Uuid::new_v4();

    let repo = racing_repo(&db, rival, rival_id);
    let loser = repo.get_or_create(&ctx(), user("ada@x.io", "Ada")).unwrap();
    assert_eq!(loser.id, rival_id);
    assert_eq!(loser.name, "Winner");

    let again = repo.get_or_create(&ctx(), user("ada@x.io", "Ada")).unwrap();
    assert_eq!(again.id, rival_id);
    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 1);
}

#[test]
fn upsert_returns_the_race_winner_instead_of_the_duplicate_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.sqlite3");
    let db = setup_file_db(&path);
    let rival = Database::open(&path).unwrap();
    let rival_id = Uuid::new_v4();

    let repo = racing_repo(&db, rival, rival_id);
    let stored = repo.upsert(&ctx(), user("ada@x.io", "Ada"), &[]).unwrap();
    assert_eq!(stored.id, rival_id);
    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 1);
}

#[test]
fn duplicate_without_a_resolvable_winner_is_propagated() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("race.sqlite3");
    let db = setup_file_db(&path);

    // No identifier getters: after the insert fails on the email column the
    // retry lookup has nothing to find the existing row by.
    let handlers = repokit_core::ModelHandlers::new(
        User::default,
        |u: &User| u.id,
        |u: &mut User, id| u.id = id,
    );
    let repo = Repository::try_new(db.clone(), handlers, RepoOptions::default()).unwrap();
    repo.create(&ctx(), user("ada@x.io", "Ada"), &[]).unwrap();

    let err = repo
        .get_or_create(&ctx(), user("ada@x.io", "Ada"))
        .unwrap_err();
    assert!(err.is_duplicate());
}

#[test]
fn lookup_resolver_finds_rows_without_key_or_identifier() {
    let dir = tempfile::tempdir().unwrap();
    let db = setup_file_db(&dir.path().join("lookup.sqlite3"));
    let handlers = repokit_core::ModelHandlers::new(
        User::default,
        |u: &User| u.id,
        |u: &mut User, id| u.id = id,
    )
    .with_lookup_resolver(|_, record: &User| vec![select_by("email", "=", record.email.as_str())]);
    let repo = Repository::try_new(db, handlers, RepoOptions::default()).unwrap();

    let first = repo.get_or_create(&ctx(), user("kay@x.io", "Kay")).unwrap();
    let second = repo.get_or_create(&ctx(), user("kay@x.io", "Other")).unwrap();
    assert_eq!(first.id, second.id);
}

#[test]
fn concurrent_get_or_create_yields_one_row() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threads.sqlite3");
    setup_file_db(&path);

    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let handles: Vec<_> = (0..workers)
        .map(|index| {
            let path = path.clone();
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let db = Database::open(&path).expect("worker db");
                let repo = Repository::try_new(db, user_handlers(), RepoOptions::default())
                    .expect("worker repo");
                barrier.wait();
                repo.get_or_create(&ctx(), user("shared@x.io", &format!("worker-{index}")))
                    .expect("get_or_create")
                    .id
            })
        })
        .collect();

    let ids: Vec<Uuid> = handles
        .into_iter()
        .map(|handle| handle.join().expect("worker panicked"))
        .collect();
    assert!(ids.windows(2).all(|pair| pair[0] == pair[1]));

    let db = Database::open(&path).unwrap();
    let repo = Repository::try_new(db, user_handlers(), RepoOptions::default()).unwrap();
    assert_eq!(repo.count(&ctx(), &[]).unwrap(), 1);
}
