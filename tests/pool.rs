//! Connection pool against scripted backends.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use actor_postgres::tokio::{Connection, Pool};
use actor_postgres::{Credential, Error};
use common::*;

/// A pool whose factory authenticates against a fresh mock server that
/// answers `SELECT 1` any number of times.
fn mock_pool(max_connections: usize, opened: Arc<AtomicUsize>) -> Arc<Pool> {
    Pool::new(max_connections, move || {
        let opened = Arc::clone(&opened);
        async move {
            opened.fetch_add(1, Ordering::SeqCst);
            let (conn, mut server) = pair();
            tokio::spawn(async move {
                server.handshake_trust().await;
                loop {
                    let (tag, _) = server.read_frame().await;
                    match tag {
                        b'Q' => {
                            server
                                .send(&[command_complete("SELECT 1"), ready(IDLE)])
                                .await
                        }
                        b'X' => break,
                        other => panic!("unexpected frontend message {}", other as char),
                    }
                }
            });
            conn.authenticate("postgres", None, Credential::Trust).await?;
            Ok::<Connection, Error>(conn)
        }
    })
}

#[tokio::test]
async fn released_connections_are_reused() {
    let opened = Arc::new(AtomicUsize::new(0));
    let pool = mock_pool(2, Arc::clone(&opened));

    let lease = pool.lease().await.unwrap();
    lease.execute("SELECT 1").await.unwrap();
    lease.release().await;
    assert_eq!(pool.idle_count(), 1);

    let lease = pool.lease().await.unwrap();
    lease.execute("SELECT 1").await.unwrap();
    lease.release().await;
    assert_eq!(opened.load(Ordering::SeqCst), 1);

    pool.close().await;
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn waiters_are_served_in_order() {
    let opened = Arc::new(AtomicUsize::new(0));
    let pool = mock_pool(1, Arc::clone(&opened));
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let held = pool.lease().await.unwrap();
    let mut waiters = Vec::new();
    for id in 0..3 {
        let pool = Arc::clone(&pool);
        let order = Arc::clone(&order);
        waiters.push(tokio::spawn(async move {
            let lease = pool.lease().await.unwrap();
            order.lock().unwrap().push(id);
            lease.release().await;
        }));
        // let each waiter queue up before the next one
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(pool.available(), 0);

    held.release().await;
    for waiter in waiters {
        waiter.await.unwrap();
    }
    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2]);
    assert_eq!(opened.load(Ordering::SeqCst), 1);

    pool.close().await;
}

#[tokio::test]
async fn closed_pool_rejects_leases() {
    let opened = Arc::new(AtomicUsize::new(0));
    let pool = mock_pool(1, Arc::clone(&opened));

    let held = pool.lease().await.unwrap();
    let waiter = {
        let pool = Arc::clone(&pool);
        tokio::spawn(async move { pool.lease().await.map(drop) })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    pool.close().await;
    assert!(matches!(
        waiter.await.unwrap().unwrap_err(),
        Error::ConnectionClosed
    ));
    assert!(matches!(
        pool.lease().await.map(drop).unwrap_err(),
        Error::ConnectionClosed
    ));

    // returned after close: closed instead of kept idle
    let conn = Connection::clone(&held);
    held.release().await;
    assert!(!conn.connected());
    assert_eq!(pool.idle_count(), 0);
}

#[tokio::test]
async fn dropped_lease_closes_its_connection() {
    let opened = Arc::new(AtomicUsize::new(0));
    let pool = mock_pool(1, Arc::clone(&opened));

    let lease = pool.lease().await.unwrap();
    let conn = Connection::clone(&lease);
    drop(lease);
    while conn.connected() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    // the slot is free again and a new connection is opened
    let lease = pool.lease().await.unwrap();
    assert!(lease.connected());
    assert_eq!(opened.load(Ordering::SeqCst), 2);
    lease.release().await;
    pool.close().await;
}
