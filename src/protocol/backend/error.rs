//! Error and notice response messages.

use crate::error::{Error, ErrorFields, Result};
use crate::protocol::codec::ResponseBody;

/// Error field type codes from PostgreSQL protocol.
pub mod field_type {
    /// Severity (localized)
    pub const SEVERITY: u8 = b'S';
    /// Severity (non-localized, PostgreSQL 9.6+)
    pub const SEVERITY_NON_LOCALIZED: u8 = b'V';
    /// SQLSTATE code
    pub const CODE: u8 = b'C';
    /// Message
    pub const MESSAGE: u8 = b'M';
    /// Detail
    pub const DETAIL: u8 = b'D';
    /// Hint
    pub const HINT: u8 = b'H';
    /// Position in query
    pub const POSITION: u8 = b'P';
    /// Where (context)
    pub const WHERE: u8 = b'W';
    /// Schema name
    pub const SCHEMA: u8 = b's';
    /// Table name
    pub const TABLE: u8 = b't';
    /// Column name
    pub const COLUMN: u8 = b'c';
    /// Constraint name
    pub const CONSTRAINT: u8 = b'n';
    /// Routine name
    pub const ROUTINE: u8 = b'R';
    /// Data type name
    pub const DATA_TYPE: u8 = b'd';
    /// Internal query position
    pub const INTERNAL_POSITION: u8 = b'p';
    /// Internal query text
    pub const INTERNAL_QUERY: u8 = b'q';
    /// Source file name
    pub const FILE: u8 = b'F';
    /// Source line number
    pub const LINE: u8 = b'L';
}

/// Parse error/notice fields from payload.
fn parse_fields(message: &'static str, payload: &[u8]) -> Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut body = ResponseBody::new(message, payload);

    loop {
        let field_type = body.read_ascii()?;
        if field_type == 0 {
            break;
        }
        let value = body.read_cstr()?;

        match field_type {
            field_type::SEVERITY => fields.severity = Some(value.to_string()),
            field_type::SEVERITY_NON_LOCALIZED => {
                fields.severity_non_localized = Some(value.to_string())
            }
            field_type::CODE => fields.code = Some(value.to_string()),
            field_type::MESSAGE => fields.message = Some(value.to_string()),
            field_type::DETAIL => fields.detail = Some(value.to_string()),
            field_type::HINT => fields.hint = Some(value.to_string()),
            field_type::POSITION => fields.position = value.parse().ok(),
            field_type::WHERE => fields.where_ = Some(value.to_string()),
            field_type::SCHEMA => fields.schema = Some(value.to_string()),
            field_type::TABLE => fields.table = Some(value.to_string()),
            field_type::COLUMN => fields.column = Some(value.to_string()),
            field_type::CONSTRAINT => fields.constraint = Some(value.to_string()),
            field_type::ROUTINE => fields.routine = Some(value.to_string()),
            field_type::DATA_TYPE
            | field_type::INTERNAL_POSITION
            | field_type::INTERNAL_QUERY
            | field_type::FILE
            | field_type::LINE => {}
            _ => {
                tracing::warn!(field = %(field_type as char), "skipping unknown error field");
            }
        }
    }

    body.finish()?;
    Ok(fields)
}

/// ErrorResponse message - error report from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponse {
    /// Parsed error fields
    pub fields: ErrorFields,
}

impl ErrorResponse {
    /// Parse an ErrorResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields("ErrorResponse", payload)?,
        })
    }

    /// Convert to the protocol error carrying the server's description.
    pub fn into_error(self) -> Error {
        Error::Protocol(self.fields.to_string())
    }

    /// Get the SQLSTATE code.
    pub fn code(&self) -> Option<&str> {
        self.fields.code.as_deref()
    }

    /// Get the primary message.
    pub fn message(&self) -> Option<&str> {
        self.fields.message.as_deref()
    }
}

/// NoticeResponse message - non-fatal warning/info from server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoticeResponse {
    /// Parsed notice fields
    pub fields: ErrorFields,
}

impl NoticeResponse {
    /// Parse a NoticeResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        Ok(Self {
            fields: parse_fields("NoticeResponse", payload)?,
        })
    }
}
