//! Tests against a real server. Skipped unless DATABASE_URL is set.

use std::env;

use actor_postgres::tokio::Connection;
use actor_postgres::{ConnectionState, Error, TransactionStatus, Value};

async fn get_conn() -> Option<Connection> {
    let mut db_url = env::var("DATABASE_URL").ok()?;
    if !db_url.contains("sslmode=") {
        if db_url.contains('?') {
            db_url.push_str("&sslmode=disable");
        } else {
            db_url.push_str("?sslmode=disable");
        }
    }
    Some(Connection::new(db_url.as_str()).await.expect("Failed to connect"))
}

#[tokio::test]
async fn weather_table_round_trip() {
    let Some(conn) = get_conn().await else {
        return;
    };

    conn.execute(
        "CREATE TEMP TABLE weather (city varchar(80), temp_lo int, temp_hi int, prcp real, date date)",
    )
    .await
    .unwrap();
    let insert = conn
        .prepare_statement("INSERT INTO weather VALUES ($1, $2, $3, $4, $5)")
        .await
        .unwrap();
    for (city, lo, hi, prcp, date) in [
        ("San Francisco", 46, 50, Some(0.25), "1994-11-27"),
        ("San Francisco", 43, 57, Some(0.0), "1994-11-29"),
        ("Hayward", 37, 54, None, "1994-11-29"),
    ] {
        let status = insert
            .execute(&[
                Value::from(city),
                Value::from(lo),
                Value::from(hi),
                Value::from(prcp),
                Value::from(date),
            ])
            .await
            .unwrap();
        assert_eq!(status.row_count(), Some(1));
    }

    let select = conn
        .prepare_statement("SELECT city, temp_lo FROM weather WHERE city = $1")
        .await
        .unwrap();
    let mut cursor = select.query(&[Value::from("San Francisco")]).await.unwrap();
    let mut count = 0;
    while let Some(row) = cursor.next().await.unwrap() {
        assert_eq!(row.get_by_name("city").unwrap().as_str().unwrap(), "San Francisco");
        count += 1;
    }
    assert_eq!(count, 2);
    assert_eq!(cursor.row_count(), Some(2));

    let rows = select
        .query(&[Value::from("NoSuchCity")])
        .await
        .unwrap()
        .collect()
        .await
        .unwrap();
    assert!(rows.is_empty());

    let names = conn.list_prepared_statements().await.unwrap();
    assert!(names.contains(&select.name().to_string()));
    select.close().await.unwrap();
    assert!(select.is_closed());

    conn.close().await;
}

#[tokio::test]
async fn failed_transaction_is_rolled_back() {
    let Some(conn) = get_conn().await else {
        return;
    };

    let err = conn
        .with_transaction(|conn| async move {
            conn.execute("INSERT INTO no_such_table VALUES (1)").await
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert_eq!(conn.state(), ConnectionState::Ready);

    conn.close().await;
}

#[tokio::test]
async fn recover_after_bad_parameter() {
    let Some(conn) = get_conn().await else {
        return;
    };

    let statement = conn.prepare_statement("SELECT $1::int").await.unwrap();
    assert!(statement.query(&[Value::from("not a number")]).await.is_err());
    conn.recover_if_needed().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Ready);

    let value = statement
        .single_value(&[Value::from(7)])
        .await
        .unwrap()
        .unwrap();
    assert_eq!(value.parse::<i32>().unwrap(), 7);

    conn.close().await;
}
