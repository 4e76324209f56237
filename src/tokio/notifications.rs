//! Side channel for messages the server sends outside request/response pairs.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crossbeam_queue::SegQueue;
use tokio::sync::Notify;

use crate::state::AsyncMessage;

#[derive(Default)]
struct Shared {
    queue: SegQueue<AsyncMessage>,
    notify: Notify,
    closed: AtomicBool,
}

/// Unbounded stream of [`AsyncMessage`]s (LISTEN/NOTIFY payloads, notices,
/// parameter changes, backend key data).
///
/// Pushing never blocks the receive loop. Clones share one queue; each
/// message is delivered to exactly one consumer.
#[derive(Clone, Default)]
pub struct Notifications {
    shared: Arc<Shared>,
}

impl Notifications {
    pub(crate) fn push(&self, message: AsyncMessage) {
        self.shared.queue.push(message);
        self.shared.notify.notify_waiters();
    }

    pub(crate) fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_waiters();
    }

    /// Take a message if one is queued.
    pub fn try_recv(&self) -> Option<AsyncMessage> {
        self.shared.queue.pop()
    }

    /// Wait for the next message. Returns `None` once the connection is
    /// closed and the queue is drained.
    pub async fn recv(&self) -> Option<AsyncMessage> {
        loop {
            let notified = self.shared.notify.notified();
            let mut notified = std::pin::pin!(notified);
            // register before checking so a push in between is not missed
            notified.as_mut().enable();

            if let Some(message) = self.try_recv() {
                return Some(message);
            }
            if self.is_closed() {
                return None;
            }
            notified.await;
        }
    }

    /// Number of queued messages.
    pub fn len(&self) -> usize {
        self.shared.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.queue.is_empty()
    }

    /// Returns true once the owning connection closed.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Notifications {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifications")
            .field("queued", &self.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
