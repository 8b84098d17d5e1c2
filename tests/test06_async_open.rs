use std::sync::Arc;
use std::time::Duration;

use sql_bridge::test_utils::MockDriver;
use sql_bridge::{Connection, ConnectionPool, PoolOptions, SqlBridgeError};

#[tokio::test(flavor = "current_thread")]
async fn acquire_async_shares_pool_limits() -> Result<(), SqlBridgeError> {
    let driver = MockDriver::new();
    let pool = PoolOptions::builder()
        .max_connections(1)
        .acquire_timeout(Duration::from_millis(50))
        .build(Arc::new(driver.clone()), "mock://async", None);

    let held = pool.acquire_async(None).await?;
    let blocked = pool.acquire_async(None).await;
    assert!(matches!(blocked, Err(SqlBridgeError::PoolTimeout(_))));

    drop(held);
    drop(pool.acquire_async(None).await?);
    assert_eq!(driver.stats().connects, 1);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn open_async_direct_and_pooled() -> Result<(), SqlBridgeError> {
    let driver = MockDriver::new();

    let direct = Connection::new(Arc::new(driver.clone()), "mock://direct");
    direct.open_async().await?;
    assert!(direct.is_open());
    assert!(matches!(
        direct.open_async().await,
        Err(SqlBridgeError::InvalidState(_))
    ));

    let pool = ConnectionPool::new(
        Arc::new(driver.clone()),
        "mock://pooled",
        PoolOptions::default(),
    );
    let pooled = pool.create_connection();
    pooled.open_async().await?;
    assert_eq!(pool.status().in_use, 1);
    pooled.close()?;
    assert_eq!(pool.status().idle, 1);

    direct.close()?;
    assert_eq!(driver.stats().connects, 2);
    assert_eq!(driver.stats().closes, 1);
    Ok(())
}

#[tokio::test(flavor = "current_thread")]
async fn open_async_reports_connect_failure() {
    let driver = MockDriver::new();
    driver.fail_next_connect("server unreachable");
    let conn = Connection::new(Arc::new(driver.clone()), "mock://down");

    let err = conn.open_async().await.expect_err("connect should fail");
    assert!(matches!(err, SqlBridgeError::Connection(_)));
    assert!(!conn.is_open());
}

#[cfg(feature = "sqlite")]
#[tokio::test(flavor = "current_thread")]
async fn open_async_with_sqlite() -> Result<(), SqlBridgeError> {
    use sql_bridge::Value;
    use sql_bridge::sqlite::SqliteDriver;

    let conn = Connection::new(Arc::new(SqliteDriver::new()), ":memory:");
    conn.open_async().await?;
    let mut cmd = conn.create_command("SELECT @a + @b");
    cmd.parameters_mut().add_with_value("a", 20_i64);
    cmd.parameters_mut().add_with_value("b", 22_i64);
    assert_eq!(cmd.execute_scalar()?, Value::Int64(42));
    Ok(())
}
