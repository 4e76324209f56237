//! Authentication-related backend messages and session side-channel messages.

use crate::error::{Error, Result};
use crate::protocol::codec::ResponseBody;

/// Authentication method constants.
pub mod auth_type {
    pub const OK: i32 = 0;
    pub const KERBEROS_V5: i32 = 2;
    pub const CLEARTEXT_PASSWORD: i32 = 3;
    pub const MD5_PASSWORD: i32 = 5;
    pub const GSS: i32 = 7;
    pub const GSS_CONTINUE: i32 = 8;
    pub const SSPI: i32 = 9;
    pub const SASL: i32 = 10;
    pub const SASL_CONTINUE: i32 = 11;
    pub const SASL_FINAL: i32 = 12;
}

/// Authentication request from the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationRequest {
    /// Authentication successful
    Ok,
    /// Cleartext password required
    CleartextPassword,
    /// MD5 password required (with 4-byte salt)
    Md5Password { salt: [u8; 4] },
    /// SASL authentication required (with list of mechanisms)
    Sasl { mechanisms: Vec<String> },
    /// SASL continue (with server-first-message)
    SaslContinue { data: Vec<u8> },
    /// SASL final (with server-final-message)
    SaslFinal { data: Vec<u8> },
}

impl AuthenticationRequest {
    /// Parse an Authentication message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut body = ResponseBody::new("Authentication", payload);
        let request = match body.read_i32()? {
            auth_type::OK => AuthenticationRequest::Ok,
            auth_type::CLEARTEXT_PASSWORD => AuthenticationRequest::CleartextPassword,
            auth_type::MD5_PASSWORD => {
                if body.remaining() != 4 {
                    return Err(Error::Protocol(format!(
                        "MD5Password: salt must be 4 bytes, got {}",
                        body.remaining()
                    )));
                }
                let mut salt = [0u8; 4];
                salt.copy_from_slice(body.read_bytes(4)?);
                AuthenticationRequest::Md5Password { salt }
            }
            auth_type::SASL => {
                let mut mechanisms = Vec::new();
                while body.peek_u8().is_some_and(|b| b != 0) {
                    mechanisms.push(body.read_cstr()?.to_string());
                }
                // list terminator
                body.read_u8()?;
                AuthenticationRequest::Sasl { mechanisms }
            }
            auth_type::SASL_CONTINUE => AuthenticationRequest::SaslContinue {
                data: body.read_remaining().to_vec(),
            },
            auth_type::SASL_FINAL => AuthenticationRequest::SaslFinal {
                data: body.read_remaining().to_vec(),
            },
            auth_type::KERBEROS_V5 => {
                return Err(Error::UnsupportedAuthenticationType("KerberosV5".into()));
            }
            auth_type::GSS | auth_type::GSS_CONTINUE => {
                return Err(Error::UnsupportedAuthenticationType("GSS".into()));
            }
            auth_type::SSPI => {
                return Err(Error::UnsupportedAuthenticationType("SSPI".into()));
            }
            other => {
                return Err(Error::UnsupportedAuthenticationType(format!(
                    "authentication code {}",
                    other
                )));
            }
        };
        body.finish()?;
        Ok(request)
    }

    /// Returns true if this request makes the client send a password or SASL response.
    pub fn requests_password(&self) -> bool {
        matches!(
            self,
            AuthenticationRequest::CleartextPassword
                | AuthenticationRequest::Md5Password { .. }
                | AuthenticationRequest::Sasl { .. }
        )
    }
}

/// BackendKeyData message - contains process ID and secret key for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendKeyData {
    /// Process ID of the backend
    pub process_id: u32,
    /// Secret key for cancellation
    pub secret_key: u32,
}

impl BackendKeyData {
    /// Parse a BackendKeyData message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut body = ResponseBody::new("BackendKeyData", payload);
        let process_id = body.read_u32()?;
        let secret_key = body.read_u32()?;
        body.finish()?;
        Ok(Self {
            process_id,
            secret_key,
        })
    }
}

/// ParameterStatus message - server parameter name and value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterStatus {
    /// Parameter name
    pub name: String,
    /// Parameter value
    pub value: String,
}

impl ParameterStatus {
    /// Parse a ParameterStatus message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut body = ResponseBody::new("ParameterStatus", payload);
        let name = body.read_cstr()?.to_string();
        let value = body.read_cstr()?.to_string();
        body.finish()?;
        Ok(Self { name, value })
    }
}

/// ReadyForQuery message - indicates server is ready for a new query.
///
/// The status byte is kept raw; the connection interprets it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadyForQuery {
    /// Transaction status byte
    pub status: u8,
}

impl ReadyForQuery {
    /// Parse a ReadyForQuery message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut body = ResponseBody::new("ReadyForQuery", payload);
        let status = body.read_u8()?;
        body.finish()?;
        Ok(Self { status })
    }
}

/// NotificationResponse message - asynchronous notification from LISTEN/NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationResponse {
    /// PID of the notifying backend
    pub pid: u32,
    /// Channel name
    pub channel: String,
    /// Notification payload
    pub payload: String,
}

impl NotificationResponse {
    /// Parse a NotificationResponse message from payload bytes.
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let mut body = ResponseBody::new("NotificationResponse", payload);
        let pid = body.read_u32()?;
        let channel = body.read_cstr()?.to_string();
        let payload = body.read_cstr()?.to_string();
        body.finish()?;
        Ok(Self {
            pid,
            channel,
            payload,
        })
    }
}
