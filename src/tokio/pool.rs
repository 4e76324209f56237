//! Asynchronous connection pool.

use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::{Error, Result};
use crate::opts::Opts;

use super::Connection;

type ConnectFuture = Pin<Box<dyn Future<Output = Result<Connection>> + Send>>;
type Factory = Box<dyn Fn() -> ConnectFuture + Send + Sync>;

/// Leases authenticated connections, at most `max_connections` at a time.
///
/// Waiters are served in FIFO order. Leases must be returned with
/// [`Lease::release`].
pub struct Pool {
    idle: ArrayQueue<Connection>,
    semaphore: Arc<Semaphore>,
    factory: Factory,
}

impl Pool {
    /// Create a pool that opens connections with `factory`.
    pub fn new<F, Fut>(max_connections: usize, factory: F) -> Arc<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Connection>> + Send + 'static,
    {
        let max_connections = max_connections.max(1);
        Arc::new(Self {
            idle: ArrayQueue::new(max_connections),
            semaphore: Arc::new(Semaphore::new(max_connections)),
            factory: Box::new(move || Box::pin(factory())),
        })
    }

    /// Create a pool that connects with `opts`.
    pub fn with_opts(opts: Opts) -> Arc<Self> {
        Self::new(opts.pool_max_connections, move || {
            let opts = opts.clone();
            async move { Connection::new(opts).await }
        })
    }

    /// Wait for a free slot and lease a connection, reusing an idle one if possible.
    pub async fn lease(self: &Arc<Self>) -> Result<Lease> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_closed| Error::ConnectionClosed)?;

        let conn = loop {
            match self.idle.pop() {
                Some(conn) if conn.connected() => break conn,
                Some(_) => {}
                None => break (self.factory)().await?,
            }
        };
        Ok(Lease {
            pool: Arc::clone(self),
            conn,
            released: false,
            _permit: permit,
        })
    }

    /// Reject new leases, fail waiting ones, and close idle connections.
    pub async fn close(&self) {
        self.semaphore.close();
        while let Some(conn) = self.idle.pop() {
            conn.close().await;
        }
    }

    /// Number of idle connections.
    pub fn idle_count(&self) -> usize {
        self.idle.len()
    }

    /// Number of leases that could be granted right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn check_in(&self, conn: Connection) {
        if !conn.connected() {
            return;
        }
        if let Err(error) = conn.recover_if_needed().await {
            tracing::debug!(%error, "discarding connection that failed to recover");
            conn.close().await;
            return;
        }
        if self.semaphore.is_closed() {
            conn.close().await;
            return;
        }
        if let Err(conn) = self.idle.push(conn) {
            conn.close().await;
        }
    }
}

/// A leased connection.
pub struct Lease {
    pool: Arc<Pool>,
    conn: Connection,
    released: bool,
    _permit: OwnedSemaphorePermit,
}

impl Lease {
    /// Return the connection to the pool.
    pub async fn release(mut self) {
        self.released = true;
        self.pool.check_in(self.conn.clone()).await;
        // the permit is returned when `self` drops, after the connection is idle
    }
}

impl Deref for Lease {
    type Target = Connection;
    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        tracing::warn!("lease dropped without release, closing its connection");
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let conn = self.conn.clone();
            handle.spawn(async move { conn.close().await });
        }
    }
}
