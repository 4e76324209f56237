//! Error types for actor-postgres.

use thiserror::Error;

/// Result type for actor-postgres operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice field types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for actor-postgres.
#[derive(Debug, Error)]
pub enum Error {
    /// Transport is gone, cancelled, or the connection was closed
    #[error("Connection closed")]
    ConnectionClosed,

    /// Malformed frame, unexpected message, state violation or server error report
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Server sent an unrecognized or structurally invalid message
    #[error("Server error: {0}")]
    Server(String),

    /// Server asked for a cleartext password but a different credential was supplied
    #[error("Cleartext password credential required")]
    CleartextPasswordCredentialRequired,

    /// Server asked for an MD5 password but a different credential was supplied
    #[error("MD5 password credential required")]
    Md5PasswordCredentialRequired,

    /// Server asked for SASL but no SCRAM-SHA-256 credential was supplied
    #[error("SCRAM-SHA-256 credential required")]
    ScramSha256CredentialRequired,

    /// Authentication method or SASL mechanism not supported
    #[error("Unsupported authentication type: {0}")]
    UnsupportedAuthenticationType(String),

    /// Server trusted the connection but a password credential was supplied
    #[error("Trust credential required")]
    TrustCredentialRequired,

    /// Operation attempted outside the connection state it requires
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Statement was closed, either explicitly or with its connection
    #[error("Statement closed")]
    StatementClosed,

    /// Connection has not finished authenticating
    #[error("Connection is awaiting authentication")]
    AwaitingAuthentication,

    /// SCRAM exchange failed or the server refused a required TLS upgrade
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TLS error
    #[cfg(feature = "tokio-tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),

    /// Column value could not be converted
    #[error("Decode error: {0}")]
    Decode(String),

    /// Invalid usage (e.g., malformed connection URL)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),
}

impl From<core::convert::Infallible> for Error {
    fn from(never: core::convert::Infallible) -> Self {
        match never {}
    }
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ConnectionClosed | Error::Server(_))
    }

    /// Returns true if the error is a credential mismatch rather than a protocol failure.
    pub fn is_credential_mismatch(&self) -> bool {
        matches!(
            self,
            Error::CleartextPasswordCredentialRequired
                | Error::Md5PasswordCredentialRequired
                | Error::ScramSha256CredentialRequired
                | Error::TrustCredentialRequired
        )
    }
}
