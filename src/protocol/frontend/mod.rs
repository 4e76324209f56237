//! PostgreSQL frontend (client → server) messages.

pub mod auth;
pub mod extended;
pub mod simple;
pub mod startup;

pub use auth::{md5_password, write_password, write_sasl_initial_response, write_sasl_response};
pub use extended::{
    write_bind, write_close_portal, write_close_statement, write_describe_portal, write_execute,
    write_flush, write_parse, write_sync,
};
pub use simple::write_query;
pub use startup::{write_ssl_request, write_startup, write_terminate};

use crate::row::Value;

/// Frontend message type bytes.
pub mod msg_type {
    /// Password/SASL response (all auth response types use 'p')
    pub const PASSWORD: u8 = b'p';
    /// Query (simple query protocol)
    pub const QUERY: u8 = b'Q';
    /// Parse (extended query protocol)
    pub const PARSE: u8 = b'P';
    /// Bind (extended query protocol)
    pub const BIND: u8 = b'B';
    /// Execute (extended query protocol)
    pub const EXECUTE: u8 = b'E';
    /// Describe (extended query protocol)
    pub const DESCRIBE: u8 = b'D';
    /// Close (extended query protocol)
    pub const CLOSE: u8 = b'C';
    /// Sync (extended query protocol)
    pub const SYNC: u8 = b'S';
    /// Flush (extended query protocol)
    pub const FLUSH: u8 = b'H';
    /// Terminate
    pub const TERMINATE: u8 = b'X';
}

/// A request frame sent to the server.
#[derive(Debug, Clone, Copy)]
pub enum FrontendMessage<'a> {
    /// StartupMessage (no type byte)
    Startup { params: &'a [(&'a str, &'a str)] },
    /// PasswordMessage with a cleartext or MD5-hashed password
    Password(&'a str),
    /// SASLInitialResponse
    SaslInitial {
        mechanism: &'a str,
        response: &'a [u8],
    },
    /// SASLResponse
    Sasl(&'a [u8]),
    /// Parse into a named statement
    Parse { name: &'a str, query: &'a str },
    /// Bind text parameters into a named portal
    Bind {
        portal: &'a str,
        statement: &'a str,
        params: &'a [Value],
    },
    /// Describe a portal
    DescribePortal(&'a str),
    /// Execute a portal (0 = no row limit)
    Execute { portal: &'a str, max_rows: u32 },
    /// Close a prepared statement
    CloseStatement(&'a str),
    /// Close a portal
    ClosePortal(&'a str),
    Sync,
    Flush,
    /// Simple query
    Query(&'a str),
    Terminate,
}

impl FrontendMessage<'_> {
    /// Append the encoded frame to `buf`.
    pub fn encode(&self, buf: &mut Vec<u8>) {
        match *self {
            FrontendMessage::Startup { params } => write_startup(buf, params),
            FrontendMessage::Password(password) => write_password(buf, password),
            FrontendMessage::SaslInitial {
                mechanism,
                response,
            } => write_sasl_initial_response(buf, mechanism, response),
            FrontendMessage::Sasl(response) => write_sasl_response(buf, response),
            FrontendMessage::Parse { name, query } => write_parse(buf, name, query, &[]),
            FrontendMessage::Bind {
                portal,
                statement,
                params,
            } => write_bind(buf, portal, statement, params),
            FrontendMessage::DescribePortal(name) => write_describe_portal(buf, name),
            FrontendMessage::Execute { portal, max_rows } => write_execute(buf, portal, max_rows),
            FrontendMessage::CloseStatement(name) => write_close_statement(buf, name),
            FrontendMessage::ClosePortal(name) => write_close_portal(buf, name),
            FrontendMessage::Sync => write_sync(buf),
            FrontendMessage::Flush => write_flush(buf),
            FrontendMessage::Query(query) => write_query(buf, query),
            FrontendMessage::Terminate => write_terminate(buf),
        }
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::Startup { .. } => "Startup",
            FrontendMessage::Password(_) => "Password",
            FrontendMessage::SaslInitial { .. } => "SASLInitialResponse",
            FrontendMessage::Sasl(_) => "SASLResponse",
            FrontendMessage::Parse { .. } => "Parse",
            FrontendMessage::Bind { .. } => "Bind",
            FrontendMessage::DescribePortal(_) => "Describe",
            FrontendMessage::Execute { .. } => "Execute",
            FrontendMessage::CloseStatement(_) | FrontendMessage::ClosePortal(_) => "Close",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Query(_) => "Query",
            FrontendMessage::Terminate => "Terminate",
        }
    }
}

/// Encode a batch of messages into one buffer.
pub fn encode_all(messages: &[FrontendMessage<'_>]) -> Vec<u8> {
    let mut buf = Vec::new();
    for message in messages {
        message.encode(&mut buf);
    }
    buf
}
