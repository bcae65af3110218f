use specboard_core::db::open_db;
use specboard_core::{
    open_db_with_busy_timeout, CoreConfig, CoreError, CoreRuntime, LockKey, RequestScope, SpecId,
    StaticIdentityVerifier, VerifiedIdentity,
};
use std::path::{Path, PathBuf};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use uuid::Uuid;

struct Shared {
    _dir: TempDir,
    path: PathBuf,
    runtime: CoreRuntime,
    scope: RequestScope,
    project_id: i64,
    spec_id: SpecId,
}

fn shared(config: CoreConfig) -> Shared {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("specboard.db");
    let runtime = CoreRuntime::new(config);
    let verifier = StaticIdentityVerifier::new().with_identity(
        "token",
        VerifiedIdentity {
            user_id: Uuid::new_v4(),
            email: "owner@example.com".to_string(),
            display_name: "Owner".to_string(),
        },
    );

    let conn = open_db(&path).unwrap();
    let c = runtime.coordinator(&conn).unwrap();
    let (_, scope) = c.authenticate(&verifier, "token").unwrap();
    let project = c.create_project(&scope, "P").unwrap();
    let spec = c.create_specification(&scope, project.project_id, "S").unwrap();

    Shared {
        _dir: dir,
        path,
        runtime,
        scope,
        project_id: project.project_id,
        spec_id: spec.spec_id,
    }
}

fn seed_items(
    path: &Path,
    runtime: &CoreRuntime,
    scope: &RequestScope,
    spec_id: SpecId,
    n: usize,
) -> Vec<i64> {
    let conn = open_db(path).unwrap();
    let c = runtime.coordinator(&conn).unwrap();
    (0..n)
        .map(|index| {
            c.insert_item(scope, spec_id, &format!("item {index}"), None)
                .unwrap()
                .item_id
        })
        .collect()
}

fn live_orders(
    path: &Path,
    runtime: &CoreRuntime,
    scope: &RequestScope,
    spec_id: SpecId,
) -> Vec<(i64, i64)> {
    let conn = open_db(path).unwrap();
    runtime
        .coordinator(&conn)
        .unwrap()
        .list_items(scope, spec_id)
        .unwrap()
        .into_iter()
        .map(|item| (item.item_id, item.order))
        .collect()
}

#[test]
fn concurrent_reorders_on_one_specification_serialize() {
    let s = shared(CoreConfig::default());
    let ids = seed_items(&s.path, &s.runtime, &s.scope, s.spec_id, 4);

    let forward = ids
        .iter()
        .enumerate()
        .map(|(index, id)| (*id, index as i64))
        .collect::<Vec<_>>();
    let backward = ids
        .iter()
        .enumerate()
        .map(|(index, id)| (*id, (ids.len() - 1 - index) as i64))
        .collect::<Vec<_>>();

    let barrier = Arc::new(Barrier::new(2));
    let handles = [forward.clone(), backward.clone()].map(|assignments| {
        let barrier = Arc::clone(&barrier);
        let runtime = s.runtime.clone();
        let path = s.path.clone();
        let scope = s.scope;
        let spec_id = s.spec_id;
        thread::spawn(move || {
            let conn = open_db(&path).unwrap();
            let c = runtime.coordinator(&conn).unwrap();
            barrier.wait();
            let mut outcomes = Vec::new();
            for _ in 0..20 {
                outcomes.push(c.reorder_items(&scope, spec_id, &assignments).map(|_| ()));
            }
            outcomes
        })
    });

    for handle in handles {
        for outcome in handle.join().unwrap() {
            match outcome {
                Ok(()) => {}
                Err(err) => assert!(err.is_retryable(), "unexpected failure: {err}"),
            }
        }
    }

    let mut orders = live_orders(&s.path, &s.runtime, &s.scope, s.spec_id);
    orders.sort_unstable();
    let mut expected_forward = forward.clone();
    expected_forward.sort_unstable();
    let mut expected_backward = backward.clone();
    expected_backward.sort_unstable();
    assert!(
        orders == expected_forward || orders == expected_backward,
        "final state must be one committed permutation, got {orders:?}"
    );
    assert_eq!(s.runtime.locks().tracked_len(), 0);
}

#[test]
fn concurrent_inserts_on_one_specification_fill_exactly_to_the_limit() {
    let s = shared(CoreConfig::default());
    let barrier = Arc::new(Barrier::new(3));

    let handles = (0..3)
        .map(|worker| {
            let barrier = Arc::clone(&barrier);
            let runtime = s.runtime.clone();
            let path = s.path.clone();
            let scope = s.scope;
            let spec_id = s.spec_id;
            thread::spawn(move || {
                let conn = open_db(&path).unwrap();
                let c = runtime.coordinator(&conn).unwrap();
                barrier.wait();
                (0..5)
                    .map(|index| {
                        c.insert_item(&scope, spec_id, &format!("w{worker}-{index}"), Some(0))
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect::<Vec<_>>();

    let mut inserted = 0;
    for handle in handles {
        for outcome in handle.join().unwrap() {
            match outcome {
                Ok(_) => inserted += 1,
                Err(CoreError::LimitExceeded { .. }) => {}
                Err(err) => panic!("unexpected failure: {err}"),
            }
        }
    }

    assert_eq!(inserted, 10);
    let orders = live_orders(&s.path, &s.runtime, &s.scope, s.spec_id)
        .into_iter()
        .map(|(_, order)| order)
        .collect::<Vec<_>>();
    assert_eq!(orders, (0..10).collect::<Vec<_>>());
}

#[test]
fn different_specifications_proceed_independently() {
    let s = shared(CoreConfig::default());
    let other_spec = {
        let conn = open_db(&s.path).unwrap();
        s.runtime
            .coordinator(&conn)
            .unwrap()
            .create_specification(&s.scope, s.project_id, "other")
            .unwrap()
            .spec_id
    };

    // Holding one specification's slot must not block the other.
    let _held = s
        .runtime
        .locks()
        .acquire(&[LockKey::Specification(s.spec_id)], Duration::from_millis(10))
        .unwrap();
    let ids = seed_items(&s.path, &s.runtime, &s.scope, other_spec, 3);
    assert_eq!(ids.len(), 3);
}

#[test]
fn held_lock_times_out_as_retryable_conflict() {
    let config = CoreConfig {
        lock_timeout: Duration::from_millis(50),
        ..CoreConfig::default()
    };
    let s = shared(config);
    let ids = seed_items(&s.path, &s.runtime, &s.scope, s.spec_id, 2);
    let before = live_orders(&s.path, &s.runtime, &s.scope, s.spec_id);

    let held = s
        .runtime
        .locks()
        .acquire(&[LockKey::Specification(s.spec_id)], Duration::from_millis(10))
        .unwrap();
    let conn = open_db(&s.path).unwrap();
    let c = s.runtime.coordinator(&conn).unwrap();

    let started = Instant::now();
    let err = c
        .reorder_items(&s.scope, s.spec_id, &[(ids[0], 1), (ids[1], 0)])
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)));
    assert!(err.is_retryable());
    assert!(started.elapsed() < Duration::from_secs(2));

    // Reads never wait for the lock.
    assert_eq!(live_orders(&s.path, &s.runtime, &s.scope, s.spec_id), before);

    drop(held);
    c.reorder_items(&s.scope, s.spec_id, &[(ids[0], 1), (ids[1], 0)])
        .unwrap();
}

#[test]
fn project_cascade_waits_for_specification_writers() {
    let config = CoreConfig {
        lock_timeout: Duration::from_millis(50),
        ..CoreConfig::default()
    };
    let s = shared(config);
    let held = s
        .runtime
        .locks()
        .acquire(&[LockKey::Specification(s.spec_id)], Duration::from_millis(10))
        .unwrap();

    let conn = open_db(&s.path).unwrap();
    let c = s.runtime.coordinator(&conn).unwrap();
    assert!(matches!(
        c.delete_project(&s.scope, s.project_id),
        Err(CoreError::Conflict(_))
    ));
    drop(held);

    let summary = c.delete_project(&s.scope, s.project_id).unwrap();
    assert_eq!(summary.specifications, 1);
}

#[test]
fn deadline_shorter_than_lock_wait_is_reported_as_deadline() {
    let s = shared(CoreConfig::default());
    let _held = s
        .runtime
        .locks()
        .acquire(&[LockKey::Specification(s.spec_id)], Duration::from_millis(10))
        .unwrap();
    let conn = open_db(&s.path).unwrap();
    let c = s.runtime.coordinator(&conn).unwrap();

    let scope = s.scope.with_timeout(Duration::from_millis(30));
    let err = c.insert_item(&scope, s.spec_id, "late", None).unwrap_err();
    assert!(matches!(err, CoreError::DeadlineExceeded));
    assert!(!err.is_retryable());
}

#[test]
fn expired_deadline_aborts_without_side_effects() {
    let s = shared(CoreConfig::default());
    let conn = open_db(&s.path).unwrap();
    let c = s.runtime.coordinator(&conn).unwrap();

    let expired = s.scope.with_deadline(Instant::now());
    assert!(matches!(
        c.insert_item(&expired, s.spec_id, "never", None),
        Err(CoreError::DeadlineExceeded)
    ));
    assert!(live_orders(&s.path, &s.runtime, &s.scope, s.spec_id).is_empty());
}

#[test]
fn deadline_passing_inside_the_transaction_rolls_back() {
    let s = shared(CoreConfig::default());
    let ids = seed_items(&s.path, &s.runtime, &s.scope, s.spec_id, 2);
    let before = live_orders(&s.path, &s.runtime, &s.scope, s.spec_id);

    // The in-process lock is free, so the request gets past it and then waits
    // on SQLite's write lock until well after its deadline.
    let conn = open_db_with_busy_timeout(&s.path, Duration::from_secs(5)).unwrap();
    let c = s.runtime.coordinator(&conn).unwrap();
    let (locked_tx, locked_rx) = mpsc::channel();
    let blocker = {
        let path = s.path.clone();
        thread::spawn(move || {
            let conn = open_db(&path).unwrap();
            conn.execute_batch("BEGIN IMMEDIATE;").unwrap();
            locked_tx.send(()).unwrap();
            thread::sleep(Duration::from_millis(400));
            conn.execute_batch("ROLLBACK;").unwrap();
        })
    };
    locked_rx.recv().unwrap();

    let scope = s.scope.with_timeout(Duration::from_millis(100));
    let err = c
        .reorder_items(&scope, s.spec_id, &[(ids[0], 1), (ids[1], 0)])
        .unwrap_err();
    blocker.join().unwrap();

    assert!(matches!(err, CoreError::DeadlineExceeded), "got {err:?}");
    assert_eq!(live_orders(&s.path, &s.runtime, &s.scope, s.spec_id), before);
    assert_eq!(s.runtime.locks().tracked_len(), 0);
}

#[test]
fn sqlite_write_lock_contention_is_conflict() {
    let s = shared(CoreConfig::default());
    let conn = open_db_with_busy_timeout(&s.path, Duration::from_millis(20)).unwrap();
    let c = s.runtime.coordinator(&conn).unwrap();

    let blocker = open_db(&s.path).unwrap();
    blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();
    let err = c.insert_item(&s.scope, s.spec_id, "blocked", None).unwrap_err();
    assert!(matches!(err, CoreError::Conflict(_)), "got {err:?}");
    assert!(err.is_retryable());

    blocker.execute_batch("ROLLBACK;").unwrap();
    c.insert_item(&s.scope, s.spec_id, "after", None).unwrap();
}
