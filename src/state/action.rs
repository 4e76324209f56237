//! Action and side-channel types produced by the state machines.

use crate::error::ErrorFields;
use crate::protocol::backend::BackendMessage;

/// Action requested by the authentication state machine.
///
/// The caller performs the requested I/O and feeds the next
/// authentication request back into the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Write the encoded response to the server, then read the next message.
    WriteAndReadMessage,

    /// Read the next message without writing anything.
    ReadMessage,

    /// Authentication succeeded; wait for ReadyForQuery.
    Finished,
}

/// Asynchronous message from the server.
///
/// These can arrive at any time and are routed to the notification
/// stream instead of the caller waiting for a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AsyncMessage {
    /// Notification from LISTEN/NOTIFY.
    Notification {
        /// PID of the notifying backend process
        pid: u32,
        /// Channel name
        channel: String,
        /// Notification payload
        payload: String,
    },

    /// Non-fatal notice/warning from server.
    Notice(ErrorFields),

    /// Server parameter value changed.
    ParameterChanged {
        /// Parameter name
        name: String,
        /// New value
        value: String,
    },

    /// Cancellation key for this session.
    BackendKey {
        /// Process ID of the backend
        process_id: u32,
        /// Secret key for cancellation
        secret_key: u32,
    },
}

impl AsyncMessage {
    /// Convert a side-channel backend message; other messages are handed back.
    pub fn from_backend(message: BackendMessage) -> Result<Self, BackendMessage> {
        match message {
            BackendMessage::Notification(n) => Ok(AsyncMessage::Notification {
                pid: n.pid,
                channel: n.channel,
                payload: n.payload,
            }),
            BackendMessage::Notice(notice) => Ok(AsyncMessage::Notice(notice.fields)),
            BackendMessage::ParameterStatus(p) => Ok(AsyncMessage::ParameterChanged {
                name: p.name,
                value: p.value,
            }),
            BackendMessage::BackendKeyData(key) => Ok(AsyncMessage::BackendKey {
                process_id: key.process_id,
                secret_key: key.secret_key,
            }),
            other => Err(other),
        }
    }
}
