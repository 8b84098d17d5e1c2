#![cfg(feature = "sqlite")]

use std::sync::Arc;

use chrono::NaiveDate;
use sql_bridge::prelude::*;

fn memory_pool() -> ConnectionPool {
    PoolOptions::builder()
        .max_connections(1)
        .build(Arc::new(SqliteDriver::new()), ":memory:", None)
}

fn create_people(conn: &Connection) -> Result<(), SqlBridgeError> {
    conn.create_command(
        "CREATE TABLE people (id INTEGER PRIMARY KEY, name TEXT NOT NULL, score REAL, born DATE)",
    )
    .execute_non_query()?;

    let mut insert = conn.create_command(
        "INSERT INTO people (id, name, score, born) VALUES (@id, @name, @score, @born)",
    );
    insert.parameters_mut().add_typed("id", DbType::Int64, 0_i64)?;
    insert.parameters_mut().add_with_value("name", "");
    insert.parameters_mut().add_with_value("score", Value::Null);
    insert.parameters_mut().add_with_value("born", Value::Null);

    let rows = [
        (1_i64, "ada", Some(91.5), NaiveDate::from_ymd_opt(1815, 12, 10)),
        (2, "brian", None, NaiveDate::from_ymd_opt(1942, 1, 8)),
        (3, "grace", Some(78.25), None),
    ];
    for (id, name, score, born) in rows {
        let params = insert.parameters_mut();
        params.set_value("id", id)?;
        params.set_value("name", name)?;
        params.set_value("score", score)?;
        params.set_value("born", born)?;
        assert_eq!(insert.execute_non_query()?, 1);
    }
    Ok(())
}

fn count(conn: &Connection) -> Result<Value, SqlBridgeError> {
    conn.create_command("SELECT count(*) FROM people").execute_scalar()
}

/// Named parameters, readers and scalars against a real SQLite connection.
#[test]
fn insert_and_read_back_through_named_parameters() -> Result<(), SqlBridgeError> {
    let pool = memory_pool();
    let conn = pool.create_connection();
    conn.open()?;
    create_people(&conn)?;

    assert_eq!(count(&conn)?, Value::Int64(3));

    let mut query = conn.create_command(
        "SELECT id, name, score, born FROM people WHERE id >= @min ORDER BY id",
    );
    query.parameters_mut().add_with_value("min", 2_i64);
    let mut reader = query.execute_reader()?.expect("a SELECT returns a reader");

    assert_eq!(reader.field_count(), 4);
    assert_eq!(reader.ordinal("NAME"), Some(1));
    assert_eq!(reader.column_type(0)?, DbType::Int64);
    assert_eq!(reader.column_type(3)?, DbType::Date);

    assert!(reader.read()?);
    assert_eq!(reader.get(0)?, Value::Int64(2));
    assert_eq!(reader.get_by_name("name")?, Value::Text("brian".into()));
    assert!(reader.is_null(2)?);
    assert_eq!(
        reader.get(3)?,
        Value::Date(NaiveDate::from_ymd_opt(1942, 1, 8).expect("valid date"))
    );

    assert!(reader.read()?);
    assert_eq!(reader.get(2)?, Value::Double(78.25));
    assert!(reader.is_null(3)?);
    assert!(!reader.read()?);
    reader.close()?;
    assert!(reader.is_closed());

    let mut lookup = conn.create_command("SELECT name FROM people WHERE id = @id");
    lookup.parameters_mut().add_with_value("id", 1_i64);
    assert_eq!(lookup.execute_scalar()?, Value::Text("ada".into()));
    lookup.parameters_mut().set_value("id", 99_i64)?;
    assert_eq!(lookup.execute_scalar()?, Value::Null);
    Ok(())
}

#[test]
fn updates_report_affected_rows() -> Result<(), SqlBridgeError> {
    let pool = memory_pool();
    let conn = pool.create_connection();
    conn.open()?;
    create_people(&conn)?;

    let mut bump = conn.create_command("UPDATE people SET score = @s WHERE score IS NOT NULL");
    bump.parameters_mut().add_with_value("s", 100.0_f64);
    assert_eq!(bump.execute_non_query()?, 2);
    assert!(bump.execute_reader()?.is_none());

    let mut sum = conn.create_command("SELECT sum(score) FROM people");
    assert_eq!(sum.execute_scalar()?, Value::Double(200.0));
    Ok(())
}

#[test]
fn transactions_commit_and_roll_back() -> Result<(), SqlBridgeError> {
    let pool = memory_pool();
    let conn = pool.create_connection();
    conn.open()?;
    create_people(&conn)?;

    let mut delete = conn.create_command("DELETE FROM people WHERE id = @id");
    delete.parameters_mut().add_with_value("id", 1_i64);

    let tx = conn.begin_transaction()?;
    assert!(conn.in_transaction());
    delete.execute_non_query()?;
    assert_eq!(count(&conn)?, Value::Int64(2));
    tx.rollback()?;
    assert!(!conn.in_transaction());
    assert_eq!(count(&conn)?, Value::Int64(3));

    {
        let _tx = conn.begin_transaction()?;
        delete.execute_non_query()?;
    }
    assert_eq!(count(&conn)?, Value::Int64(3));

    let tx = conn.begin_transaction_with(IsolationLevel::Serializable)?;
    assert_eq!(tx.isolation_level(), IsolationLevel::Serializable);
    delete.execute_non_query()?;
    tx.commit()?;
    assert_eq!(count(&conn)?, Value::Int64(2));

    let tx = conn.begin_transaction()?;
    assert!(matches!(
        conn.begin_transaction(),
        Err(SqlBridgeError::InvalidState(_))
    ));
    tx.commit()?;
    Ok(())
}

#[test]
fn syntax_errors_surface_as_compile_errors() -> Result<(), SqlBridgeError> {
    let conn = Connection::new(Arc::new(SqliteDriver::new()), ":memory:");
    conn.open()?;

    let err = conn
        .create_command("SELEC 1")
        .execute_scalar()
        .expect_err("invalid SQL must not prepare");
    assert!(matches!(err, SqlBridgeError::Compile(_)));
    assert!(err.native().is_some());

    let err = conn
        .create_command("SELECT * FROM missing_table")
        .execute_reader()
        .expect_err("unknown table must not prepare");
    assert!(matches!(err, SqlBridgeError::Compile(_)));
    Ok(())
}

#[test]
fn pooled_connection_survives_close_and_reopen() -> Result<(), SqlBridgeError> {
    let pool = memory_pool();
    let conn = pool.create_connection();
    conn.open()?;
    create_people(&conn)?;
    conn.close()?;
    assert_eq!(pool.status().idle, 1);

    // Same physical in-memory database comes back from the pool.
    conn.open()?;
    assert_eq!(count(&conn)?, Value::Int64(3));
    assert_eq!(pool.status().total_created, 1);
    Ok(())
}

#[test]
fn cancel_without_running_statement_is_harmless() -> Result<(), SqlBridgeError> {
    let conn = Connection::new(Arc::new(SqliteDriver::new()), ":memory:");
    conn.open()?;

    let mut cmd = conn.create_command("SELECT 40 + 2");
    cmd.cancel()?;
    assert_eq!(cmd.execute_scalar()?, Value::Int64(42));
    assert!(cmd.cancel_handle().is_some());
    cmd.cancel()?;
    Ok(())
}

/// Two pooled connections to one database file see each other's commits.
#[test]
fn file_database_is_shared_across_pooled_connections() -> Result<(), SqlBridgeError> {
    let dir = tempfile::tempdir().expect("temp dir");
    let path = dir.path().join("bridge.db");
    let pool = PoolOptions::builder().max_connections(2).build(
        Arc::new(SqliteDriver::new()),
        path.to_string_lossy(),
        None,
    );

    let writer = pool.create_connection();
    writer.open()?;
    create_people(&writer)?;

    let reader = pool.create_connection();
    reader.open()?;
    assert_eq!(pool.status().total_created, 2);
    assert_eq!(count(&reader)?, Value::Int64(3));
    Ok(())
}

/// Reopening a direct in-memory connection yields a new, empty database; a
/// command prepared before the reopen must not keep reading the old one.
#[test]
fn command_does_not_outlive_a_reopen() -> Result<(), SqlBridgeError> {
    let conn = Connection::new(Arc::new(SqliteDriver::new()), ":memory:");
    conn.open()?;
    conn.create_command("CREATE TABLE t (n INTEGER)").execute_non_query()?;
    conn.create_command("INSERT INTO t VALUES (1)").execute_non_query()?;

    let mut count = conn.create_command("SELECT count(*) FROM t");
    assert_eq!(count.execute_scalar()?, Value::Int64(1));

    conn.close()?;
    conn.open()?;
    let err = count
        .execute_scalar()
        .expect_err("the reopened database has no table t");
    assert!(matches!(err, SqlBridgeError::Compile(_)));
    assert!(err.to_string().contains("no such table"));
    Ok(())
}
