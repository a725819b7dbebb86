use super::*;
use std::sync::mpsc;

fn pool(settings: PoolSettings) -> CachedThreadPool {
    CachedThreadPool::new("test-pool-", settings)
}

#[test]
fn submit_runs_the_task_and_join_waits() {
    let pool = pool(PoolSettings::default());
    let (tx, rx) = mpsc::channel();
    let handle = pool.submit(Box::new(move || {
        tx.send(42).unwrap();
    }));
    handle.join();
    assert_eq!(rx.try_recv().unwrap(), 42);
}

#[test]
fn workers_carry_the_pool_name_prefix() {
    let pool = pool(PoolSettings::default());
    let (tx, rx) = mpsc::channel();
    pool.submit(Box::new(move || {
        tx.send(thread::current().name().unwrap_or_default().to_string())
            .unwrap();
    }))
    .join();
    let name = rx.try_recv().unwrap();
    assert!(name.starts_with("test-pool-"), "unexpected name {name}");
}

#[test]
fn local_pools_get_a_pool_number() {
    let pool = CachedThreadPool::local(PoolSettings::default());
    let (tx, rx) = mpsc::channel();
    pool.submit(Box::new(move || {
        tx.send(thread::current().name().unwrap_or_default().to_string())
            .unwrap();
    }))
    .join();
    let name = rx.try_recv().unwrap();
    assert!(name.starts_with("cli-assert-io-"), "unexpected name {name}");
    let suffix = &name["cli-assert-io-".len()..];
    let mut parts = suffix.split('-');
    assert!(parts.next().unwrap().parse::<usize>().is_ok());
    assert!(parts.next().unwrap().parse::<usize>().is_ok());
}

#[test]
fn idle_workers_are_reused() {
    let pool = pool(PoolSettings {
        core_size: 1,
        max_size: 1,
        keep_alive: Duration::from_secs(60),
    });
    let (tx, rx) = mpsc::channel();
    for _ in 0..2 {
        let tx = tx.clone();
        pool.submit(Box::new(move || {
            tx.send(thread::current().name().unwrap_or_default().to_string())
                .unwrap();
        }))
        .join();
    }
    let first = rx.try_recv().unwrap();
    let second = rx.try_recv().unwrap();
    assert_eq!(first, second);
}

#[test]
fn join_survives_a_panicking_task() {
    let pool = pool(PoolSettings::default());
    let handle = pool.submit(Box::new(|| panic!("boom")));
    handle.join();
    let (tx, rx) = mpsc::channel();
    pool.submit(Box::new(move || tx.send(()).unwrap())).join();
    rx.try_recv().unwrap();
}

#[test]
fn global_pool_is_created_once_and_then_immutable() {
    let first = global_pool();
    assert!(global_pool_created());
    let _second = global_pool();

    let spec = GlobalThreadPoolSpec;
    assert!(matches!(
        spec.core_size(2),
        Err(Error::PoolAlreadyCreated)
    ));
    assert!(matches!(spec.max_size(2), Err(Error::PoolAlreadyCreated)));
    assert!(matches!(
        spec.keep_alive(Duration::from_secs(20)),
        Err(Error::PoolAlreadyCreated)
    ));

    let (tx, rx) = mpsc::channel();
    first
        .submit(Box::new(move || tx.send(()).unwrap()))
        .join();
    rx.try_recv().unwrap();
}
