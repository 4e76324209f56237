//! Error recovery and transactions against a scripted backend.

mod common;

use actor_postgres::{ConnectionState, Error, TransactionStatus, Value};
use common::*;

#[tokio::test]
async fn recover_after_execute_error() {
    let (conn, script) = connect_with(|mut server| async move {
        server.handshake_trust().await;
        server.serve_parse().await;
        server.serve_bind().await;
        server.serve_describe(&["?column?"]).await;
        server.expect(b'E').await;
        server.expect(b'H').await;
        server
            .send(&[error_response("22012", "division by zero")])
            .await;
        server.serve_recover(IDLE).await;
        assert_eq!(server.serve_parse().await, "SELECT 2");
        server.serve_bind().await;
        server.serve_execute(&[&[Some("2")]], "SELECT 1").await;
        server.serve_portal_cleanup().await;
        server.expect_terminate().await;
    })
    .await;

    let statement = conn.prepare_statement("SELECT 1 / $1").await.unwrap();
    let err = statement.query(&[Value::from(0)]).await.unwrap_err();
    match err {
        Error::Protocol(message) => assert!(message.contains("division by zero"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(conn.state(), ConnectionState::ErrorReceived);

    conn.recover_if_needed().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Ready);
    let next = conn.prepare_statement("SELECT 2").await.unwrap();
    let value = next.single_value(&[]).await.unwrap().unwrap();
    assert_eq!(value.parse::<i32>().unwrap(), 2);

    // nothing to do on a ready connection
    conn.recover_if_needed().await.unwrap();

    conn.close().await;
    script.await.unwrap();
}

#[tokio::test]
async fn recover_after_abandoned_cursor() {
    let (conn, script) = connect_with(|mut server| async move {
        server.handshake_trust().await;
        server.serve_parse().await;
        server.serve_bind().await;
        server.serve_describe(&["n"]).await;
        server
            .serve_execute(&[&[Some("1")], &[Some("2")]], "SELECT 2")
            .await;
        server.serve_recover(IDLE).await;
        assert_eq!(server.serve_parse().await, "SELECT 3");
        server.serve_bind().await;
        server.serve_execute(&[&[Some("3")]], "SELECT 1").await;
        server.serve_portal_cleanup().await;
        server.expect_terminate().await;
    })
    .await;

    let statement = conn
        .prepare_statement("SELECT generate_series(1, 2) AS n")
        .await
        .unwrap();
    let mut cursor = statement.query(&[]).await.unwrap();
    assert!(cursor.next().await.unwrap().is_some());
    drop(cursor);

    assert_eq!(conn.state(), ConnectionState::AwaitingQueryResult);
    conn.recover_if_needed().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Ready);

    let next = conn.prepare_statement("SELECT 3").await.unwrap();
    let value = next.single_value(&[]).await.unwrap().unwrap();
    assert_eq!(value.parse::<i32>().unwrap(), 3);

    conn.close().await;
    script.await.unwrap();
}

#[tokio::test]
async fn recover_after_abandoned_simple_cursor() {
    let (conn, script) = connect_with(|mut server| async move {
        server.handshake_trust().await;
        assert_eq!(server.expect_query().await, "SELECT n FROM numbers");
        server
            .send(&[
                row_description(&["n"]),
                data_row(&[Some("1")]),
                data_row(&[Some("2")]),
                command_complete("SELECT 2"),
                ready(IDLE),
            ])
            .await;
        // no Sync: the query already carried its own ReadyForQuery
        assert_eq!(server.serve_parse().await, "SELECT 4");
        server.serve_bind().await;
        server.serve_execute(&[&[Some("4")]], "SELECT 1").await;
        server.serve_portal_cleanup().await;
        server.serve_command("SELECT 5", "SELECT 1", IDLE).await;
        server.expect_terminate().await;
    })
    .await;

    let mut cursor = conn.query("SELECT n FROM numbers").await.unwrap();
    assert!(cursor.next().await.unwrap().is_some());
    drop(cursor);
    assert_eq!(conn.state(), ConnectionState::AwaitingQueryResult);

    conn.recover_if_needed().await.unwrap();
    assert_eq!(conn.state(), ConnectionState::Ready);

    let statement = conn.prepare_statement("SELECT 4").await.unwrap();
    let value = statement.single_value(&[]).await.unwrap().unwrap();
    assert_eq!(value.parse::<i32>().unwrap(), 4);
    conn.execute("SELECT 5").await.unwrap();

    conn.close().await;
    script.await.unwrap();
}

#[tokio::test]
async fn with_transaction_commits() {
    let (conn, script) = connect_with(|mut server| async move {
        server.handshake_trust().await;
        server.serve_command("BEGIN", "BEGIN", IN_TRANSACTION).await;
        server
            .serve_command(
                "INSERT INTO weather VALUES ('Oakland', 48, 53)",
                "INSERT 0 1",
                IN_TRANSACTION,
            )
            .await;
        server.serve_command("COMMIT", "COMMIT", IDLE).await;
        server.expect_terminate().await;
    })
    .await;

    let rows = conn
        .with_transaction(|conn| async move {
            assert_eq!(conn.transaction_status(), TransactionStatus::InTransaction);
            let status = conn
                .execute("INSERT INTO weather VALUES ('Oakland', 48, 53)")
                .await?;
            Ok::<_, Error>(status.row_count())
        })
        .await
        .unwrap();
    assert_eq!(rows, Some(1));
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    conn.close().await;
    script.await.unwrap();
}

#[tokio::test]
async fn with_transaction_rolls_back_failed_statement() {
    let (conn, script) = connect_with(|mut server| async move {
        server.handshake_trust().await;
        server.serve_command("BEGIN", "BEGIN", IN_TRANSACTION).await;

        server.expect(b'P').await;
        server.expect(b'H').await;
        server
            .send(&[error_response(
                "42P01",
                "relation \"no_such_table\" does not exist",
            )])
            .await;
        server.serve_recover(FAILED).await;

        server.serve_command("ROLLBACK", "ROLLBACK", IDLE).await;
        server.expect_terminate().await;
    })
    .await;

    let err = conn
        .with_transaction(|conn| async move {
            let statement = conn
                .prepare_statement("INSERT INTO no_such_table VALUES (1)")
                .await?;
            statement.execute(&[]).await
        })
        .await
        .unwrap_err();
    match err {
        Error::Protocol(message) => assert!(message.contains("no_such_table"), "{message}"),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);
    assert_eq!(conn.state(), ConnectionState::Ready);

    conn.close().await;
    script.await.unwrap();
}

#[tokio::test]
async fn failed_transaction_status_is_tracked() {
    let (conn, script) = connect_with(|mut server| async move {
        server.handshake_trust().await;
        server.serve_command("BEGIN", "BEGIN", IN_TRANSACTION).await;
        assert_eq!(server.expect_query().await, "SELECT 1/0");
        server
            .send(&[error_response("22012", "division by zero"), ready(FAILED)])
            .await;
        server.serve_command("ROLLBACK", "ROLLBACK", IDLE).await;
        server.expect_terminate().await;
    })
    .await;

    conn.begin_transaction().await.unwrap();
    assert!(conn.in_transaction());
    assert!(conn.execute("SELECT 1/0").await.is_err());
    assert_eq!(conn.transaction_status(), TransactionStatus::Failed);
    assert_eq!(conn.state(), ConnectionState::Ready);
    conn.rollback_transaction().await.unwrap();
    assert_eq!(conn.transaction_status(), TransactionStatus::Idle);

    conn.close().await;
    script.await.unwrap();
}

#[tokio::test]
async fn close_fails_pending_and_later_operations() {
    let (seen_tx, seen_rx) = tokio::sync::oneshot::channel();
    let (conn, script) = connect_with(move |mut server| async move {
        server.handshake_trust().await;
        // never answer the query
        server.expect_query().await;
        seen_tx.send(()).unwrap();
        server.expect_terminate().await;
    })
    .await;

    let pending = {
        let conn = conn.clone();
        tokio::spawn(async move { conn.execute("SELECT pg_sleep(60)").await })
    };
    seen_rx.await.unwrap();

    conn.close().await;
    assert!(matches!(
        pending.await.unwrap().unwrap_err(),
        Error::ConnectionClosed
    ));
    assert!(!conn.connected());
    assert!(matches!(
        conn.execute("SELECT 1").await.unwrap_err(),
        Error::ConnectionClosed
    ));
    assert!(matches!(
        conn.recover_if_needed().await.unwrap_err(),
        Error::ConnectionClosed
    ));
    // closing twice is harmless
    conn.close().await;

    script.await.unwrap();
}

#[tokio::test]
async fn server_hang_up_closes_connection() {
    let (conn, script) = connect_with(|mut server| async move {
        server.handshake_trust().await;
        assert_eq!(server.expect_query().await, "SELECT 1");
        // drop the server end without answering
    })
    .await;

    let err = conn.execute("SELECT 1").await.unwrap_err();
    assert!(err.is_connection_broken(), "{err:?}");
    assert!(!conn.connected());
    script.await.unwrap();
}
