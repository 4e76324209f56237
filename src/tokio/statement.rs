//! Prepared statements.

use std::sync::Weak;

use crate::command_status::CommandStatus;
use crate::error::{Error, Result};
use crate::row::Value;

use super::conn::{Connection, Inner};
use super::cursor::ResultCursor;
use super::portal::Portal;

/// A named prepared statement.
///
/// Holds a non-owning handle to its connection. Once the connection is
/// closed or dropped, every operation fails with [`Error::StatementClosed`].
pub struct Statement {
    conn: Weak<Inner>,
    name: String,
    text: String,
}

impl Statement {
    pub(crate) fn new(conn: Weak<Inner>, name: String, text: String) -> Self {
        Self { conn, name, text }
    }

    /// Server-side statement name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// SQL text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns true once the statement or its connection was closed.
    pub fn is_closed(&self) -> bool {
        match Connection::upgrade(&self.conn) {
            Ok(conn) => conn.is_statement_closed(&self.name),
            Err(_) => true,
        }
    }

    fn open_connection(&self) -> Result<Connection> {
        let conn = Connection::upgrade(&self.conn).map_err(|_closed| Error::StatementClosed)?;
        if conn.is_statement_closed(&self.name) {
            return Err(Error::StatementClosed);
        }
        Ok(conn)
    }

    /// Bind parameters into a new portal, optionally fetching column metadata.
    pub async fn bind(&self, params: &[Value], want_metadata: bool) -> Result<Portal> {
        self.open_connection()?
            .bind_portal(&self.name, params, want_metadata)
            .await
    }

    /// Bind with column metadata and start streaming rows.
    pub async fn query(&self, params: &[Value]) -> Result<ResultCursor> {
        self.bind(params, true).await?.query().await
    }

    /// Bind and run to completion, returning the command status.
    pub async fn execute(&self, params: &[Value]) -> Result<CommandStatus> {
        self.bind(params, false).await?.execute().await
    }

    /// First column of the only expected row.
    pub async fn single_value(&self, params: &[Value]) -> Result<Option<Value>> {
        self.bind(params, false).await?.single_value().await
    }

    /// Close the statement on the server. Closing twice is a no-op.
    pub async fn close(&self) -> Result<()> {
        match Connection::upgrade(&self.conn) {
            Ok(conn) if conn.connected() => conn.close_statement(&self.name).await,
            _ => Ok(()),
        }
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("name", &self.name)
            .field("text", &self.text)
            .finish()
    }
}
