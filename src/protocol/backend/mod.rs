//! PostgreSQL backend (server → client) messages.

pub mod auth;
pub mod error;
pub mod extended;
pub mod query;

pub use auth::{
    AuthenticationRequest, BackendKeyData, NotificationResponse, ParameterStatus, ReadyForQuery,
};
pub use error::{ErrorResponse, NoticeResponse};
pub use extended::{BindComplete, CloseComplete, NoData, ParseComplete};
pub use query::{
    CommandComplete, DataRow, EmptyQueryResponse, FieldDescription, RowDescription,
};

use crate::error::{Error, Result};

/// Backend message type bytes.
pub mod msg_type {
    /// Authentication message
    pub const AUTHENTICATION: u8 = b'R';
    /// BackendKeyData
    pub const BACKEND_KEY_DATA: u8 = b'K';
    /// ParameterStatus
    pub const PARAMETER_STATUS: u8 = b'S';
    /// ReadyForQuery
    pub const READY_FOR_QUERY: u8 = b'Z';
    /// RowDescription
    pub const ROW_DESCRIPTION: u8 = b'T';
    /// DataRow
    pub const DATA_ROW: u8 = b'D';
    /// CommandComplete
    pub const COMMAND_COMPLETE: u8 = b'C';
    /// EmptyQueryResponse
    pub const EMPTY_QUERY_RESPONSE: u8 = b'I';
    /// ErrorResponse
    pub const ERROR_RESPONSE: u8 = b'E';
    /// NoticeResponse
    pub const NOTICE_RESPONSE: u8 = b'N';
    /// NotificationResponse
    pub const NOTIFICATION_RESPONSE: u8 = b'A';
    /// ParseComplete
    pub const PARSE_COMPLETE: u8 = b'1';
    /// BindComplete
    pub const BIND_COMPLETE: u8 = b'2';
    /// CloseComplete
    pub const CLOSE_COMPLETE: u8 = b'3';
    /// NoData
    pub const NO_DATA: u8 = b'n';
}

/// Kind of a backend message, used in "expected X, got Y" diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    ParseComplete,
    BindComplete,
    CloseComplete,
    Notification,
    CommandComplete,
    DataRow,
    ErrorResponse,
    EmptyQuery,
    BackendKeyData,
    Notice,
    Authentication,
    ParameterStatus,
    RowDescription,
    ReadyForQuery,
    NoData,
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// A decoded backend message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendMessage {
    ParseComplete(ParseComplete),
    BindComplete(BindComplete),
    CloseComplete(CloseComplete),
    Notification(NotificationResponse),
    CommandComplete(CommandComplete),
    DataRow(DataRow),
    ErrorResponse(ErrorResponse),
    EmptyQuery(EmptyQueryResponse),
    BackendKeyData(BackendKeyData),
    Notice(NoticeResponse),
    Authentication(AuthenticationRequest),
    ParameterStatus(ParameterStatus),
    RowDescription(RowDescription),
    ReadyForQuery(ReadyForQuery),
    NoData(NoData),
}

/// Largest frame accepted from the server, length field included.
pub const MAX_FRAME_LEN: i32 = 1 << 30;

/// Length of the body that follows a frame's 4-byte length field.
pub fn body_len(length: [u8; 4]) -> Result<usize> {
    let length = i32::from_be_bytes(length);
    if !(4..=MAX_FRAME_LEN).contains(&length) {
        return Err(Error::Protocol(format!("invalid frame length {}", length)));
    }
    Ok(length as usize - 4)
}

impl BackendMessage {
    /// Decode one frame: type tag, 4-byte length (counting itself) and body.
    ///
    /// Unknown tags are a [`Error::Server`]; malformed bodies and length
    /// mismatches are [`Error::Protocol`].
    pub fn decode(type_byte: u8, length: [u8; 4], body: &[u8]) -> Result<Self> {
        let expected = body_len(length)?;
        if expected != body.len() {
            return Err(Error::Protocol(format!(
                "frame '{}' claims {} body bytes but carries {}",
                type_byte.escape_ascii(),
                expected,
                body.len()
            )));
        }
        if !type_byte.is_ascii() {
            return Err(Error::Protocol(format!(
                "non-ASCII message type 0x{:02x}",
                type_byte
            )));
        }

        let message = match type_byte {
            msg_type::PARSE_COMPLETE => Self::ParseComplete(ParseComplete::parse(body)?),
            msg_type::BIND_COMPLETE => Self::BindComplete(BindComplete::parse(body)?),
            msg_type::CLOSE_COMPLETE => Self::CloseComplete(CloseComplete::parse(body)?),
            msg_type::NOTIFICATION_RESPONSE => {
                Self::Notification(NotificationResponse::parse(body)?)
            }
            msg_type::COMMAND_COMPLETE => Self::CommandComplete(CommandComplete::parse(body)?),
            msg_type::DATA_ROW => Self::DataRow(DataRow::parse(body)?),
            msg_type::ERROR_RESPONSE => Self::ErrorResponse(ErrorResponse::parse(body)?),
            msg_type::EMPTY_QUERY_RESPONSE => Self::EmptyQuery(EmptyQueryResponse::parse(body)?),
            msg_type::BACKEND_KEY_DATA => Self::BackendKeyData(BackendKeyData::parse(body)?),
            msg_type::NOTICE_RESPONSE => Self::Notice(NoticeResponse::parse(body)?),
            msg_type::AUTHENTICATION => Self::Authentication(AuthenticationRequest::parse(body)?),
            msg_type::PARAMETER_STATUS => Self::ParameterStatus(ParameterStatus::parse(body)?),
            msg_type::ROW_DESCRIPTION => Self::RowDescription(RowDescription::parse(body)?),
            msg_type::READY_FOR_QUERY => Self::ReadyForQuery(ReadyForQuery::parse(body)?),
            msg_type::NO_DATA => Self::NoData(NoData::parse(body)?),
            other => {
                return Err(Error::Server(format!(
                    "unrecognized message type '{}'",
                    other as char
                )));
            }
        };
        Ok(message)
    }

    /// The kind of this message.
    pub fn kind(&self) -> MessageKind {
        match self {
            Self::ParseComplete(_) => MessageKind::ParseComplete,
            Self::BindComplete(_) => MessageKind::BindComplete,
            Self::CloseComplete(_) => MessageKind::CloseComplete,
            Self::Notification(_) => MessageKind::Notification,
            Self::CommandComplete(_) => MessageKind::CommandComplete,
            Self::DataRow(_) => MessageKind::DataRow,
            Self::ErrorResponse(_) => MessageKind::ErrorResponse,
            Self::EmptyQuery(_) => MessageKind::EmptyQuery,
            Self::BackendKeyData(_) => MessageKind::BackendKeyData,
            Self::Notice(_) => MessageKind::Notice,
            Self::Authentication(_) => MessageKind::Authentication,
            Self::ParameterStatus(_) => MessageKind::ParameterStatus,
            Self::RowDescription(_) => MessageKind::RowDescription,
            Self::ReadyForQuery(_) => MessageKind::ReadyForQuery,
            Self::NoData(_) => MessageKind::NoData,
        }
    }

    /// Check if this message can arrive at any time, outside request/response pairing.
    pub fn is_async(&self) -> bool {
        matches!(
            self,
            Self::Notification(_) | Self::ParameterStatus(_) | Self::BackendKeyData(_) | Self::Notice(_)
        )
    }
}

/// A message type that can be awaited as the response to a request.
pub trait ExpectedMessage: Sized {
    /// Kind reported when a different message arrives.
    const KIND: MessageKind;

    /// Extract this message, handing back any other message unchanged.
    fn from_message(message: BackendMessage) -> core::result::Result<Self, BackendMessage>;
}

macro_rules! expected_message {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl ExpectedMessage for $ty {
                const KIND: MessageKind = MessageKind::$variant;

                fn from_message(
                    message: BackendMessage,
                ) -> core::result::Result<Self, BackendMessage> {
                    match message {
                        BackendMessage::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )*
    };
}

expected_message! {
    ParseComplete => ParseComplete,
    BindComplete => BindComplete,
    CloseComplete => CloseComplete,
    CommandComplete => CommandComplete,
    EmptyQuery => EmptyQueryResponse,
    Authentication => AuthenticationRequest,
    RowDescription => RowDescription,
    ReadyForQuery => ReadyForQuery,
    NoData => NoData,
    DataRow => DataRow,
}
