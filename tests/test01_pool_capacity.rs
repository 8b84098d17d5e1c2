use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use sql_bridge::test_utils::MockDriver;
use sql_bridge::{ConnectionPool, PoolOptions, SqlBridgeError};

fn pool(max: usize) -> (MockDriver, ConnectionPool) {
    let driver = MockDriver::new();
    let pool = PoolOptions::builder()
        .max_connections(max)
        .idle_timeout(Duration::from_secs(60))
        .build(Arc::new(driver.clone()), "mock://capacity", None);
    (driver, pool)
}

#[test]
fn third_acquirer_waits_for_a_release() -> Result<(), SqlBridgeError> {
    let (driver, pool) = pool(2);
    let first = pool.acquire()?;
    let second = pool.acquire()?;
    assert_eq!(driver.stats().connects, 2);

    let (acquired_tx, acquired_rx) = mpsc::channel();
    let waiter_pool = pool.clone();
    let waiter = thread::spawn(move || -> Result<(), SqlBridgeError> {
        let conn = waiter_pool.acquire()?;
        acquired_tx.send(()).ok();
        drop(conn);
        Ok(())
    });

    assert!(
        acquired_rx.recv_timeout(Duration::from_millis(150)).is_err(),
        "third acquire must block while both connections are in use"
    );
    drop(first);
    assert!(
        acquired_rx.recv_timeout(Duration::from_secs(5)).is_ok(),
        "releasing a connection must unblock the waiter"
    );
    waiter.join().expect("waiter panicked")?;
    drop(second);

    assert_eq!(driver.stats().connects, 2);
    let status = pool.status();
    assert_eq!(status.total_created, 2);
    assert_eq!(status.idle, 2);
    assert_eq!(status.in_use, 0);
    Ok(())
}

#[test]
fn one_release_wakes_exactly_one_waiter() -> Result<(), SqlBridgeError> {
    let (driver, pool) = pool(1);
    let held = pool.acquire()?;

    let (acquired_tx, acquired_rx) = mpsc::channel();
    let mut releases = Vec::new();
    let mut waiters = Vec::new();
    for id in 0..2 {
        let (release_tx, release_rx) = mpsc::channel::<()>();
        releases.push(release_tx);
        let acquired_tx = acquired_tx.clone();
        let waiter_pool = pool.clone();
        waiters.push(thread::spawn(move || -> Result<(), SqlBridgeError> {
            let conn = waiter_pool.acquire()?;
            acquired_tx.send(id).ok();
            release_rx.recv().ok();
            drop(conn);
            Ok(())
        }));
    }

    thread::sleep(Duration::from_millis(100));
    drop(held);

    let first = acquired_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("one waiter should get the released connection");
    assert!(
        acquired_rx.recv_timeout(Duration::from_millis(150)).is_err(),
        "only one waiter may proceed per release"
    );

    releases[first].send(()).ok();
    let second = acquired_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("the other waiter should proceed after the next release");
    assert_ne!(first, second);
    releases[second].send(()).ok();

    for waiter in waiters {
        waiter.join().expect("waiter panicked")?;
    }
    assert_eq!(driver.stats().connects, 1);
    Ok(())
}

#[test]
fn zero_capacity_never_connects() {
    let driver = MockDriver::new();
    let pool = PoolOptions::builder()
        .max_connections(0)
        .acquire_timeout(Duration::from_millis(30))
        .build(Arc::new(driver.clone()), "mock://none", None);

    assert!(matches!(pool.acquire(), Err(SqlBridgeError::PoolTimeout(_))));
    assert_eq!(driver.stats().connects, 0);
}
