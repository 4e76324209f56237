//! FIFO hand-off between the receive task and callers awaiting responses.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::backend::BackendMessage;

type Delivery = Result<BackendMessage>;

/// Result of asking the mailbox for the next message.
pub(crate) enum Take {
    /// A buffered message (or the closed error)
    Ready(Delivery),
    /// Nothing buffered; await the receiver
    Wait(oneshot::Receiver<Delivery>),
}

/// Buffered messages and pending waiters.
///
/// At most one of the two queues is non-empty at a time: a message is only
/// buffered when nobody waits, and a waiter only registers when nothing is
/// buffered.
#[derive(Default)]
pub(crate) struct Mailbox {
    queue: VecDeque<Delivery>,
    waiters: VecDeque<oneshot::Sender<Delivery>>,
    closed: bool,
}

impl Mailbox {
    /// Hand a message to the oldest live waiter, or buffer it.
    pub fn deliver(&mut self, mut message: Delivery) {
        while let Some(waiter) = self.waiters.pop_front() {
            match waiter.send(message) {
                Ok(()) => return,
                // waiter gave up; try the next one
                Err(returned) => message = returned,
            }
        }
        self.queue.push_back(message);
    }

    /// Take the next buffered message, or register as a waiter.
    ///
    /// Messages buffered before the transport closed are still handed out.
    pub fn take(&mut self) -> Take {
        if let Some(message) = self.queue.pop_front() {
            return Take::Ready(message);
        }
        if self.closed {
            return Take::Ready(Err(Error::ConnectionClosed));
        }
        let (sender, receiver) = oneshot::channel();
        self.waiters.push_back(sender);
        Take::Wait(receiver)
    }

    /// Stop accepting waiters. Dropping the pending senders fails their receivers.
    pub fn close(&mut self) {
        self.closed = true;
        self.waiters.clear();
    }

    /// Discard buffered messages.
    pub fn clear(&mut self) {
        self.queue.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}
