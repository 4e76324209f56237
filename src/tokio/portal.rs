//! Bound portals.

use std::sync::{Arc, Weak};

use crate::command_status::CommandStatus;
use crate::error::Result;
use crate::protocol::backend::{BackendMessage, CommandComplete};
use crate::protocol::frontend::FrontendMessage;
use crate::row::{ColumnMetadata, RowDecoder, Value};
use crate::state::PortalStatus;

use super::conn::{Connection, Inner};
use super::cursor::ResultCursor;

/// A statement bound to parameters, ready to execute once.
pub struct Portal {
    conn: Weak<Inner>,
    name: String,
    decoder: Option<Arc<RowDecoder>>,
}

impl Portal {
    pub(crate) fn new(conn: Weak<Inner>, name: String, decoder: Option<Arc<RowDecoder>>) -> Self {
        Self {
            conn,
            name,
            decoder,
        }
    }

    /// Server-side portal name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Column metadata, if the portal was bound with metadata and returns rows.
    pub fn columns(&self) -> Option<&[ColumnMetadata]> {
        self.decoder.as_deref().map(RowDecoder::columns)
    }

    async fn start(&self, conn: &Connection) -> Result<()> {
        conn.with_state(|s| {
            s.query_sent();
            s.set_portal_status(&self.name, PortalStatus::Executing);
        });
        conn.send(&[
            FrontendMessage::Execute {
                portal: &self.name,
                max_rows: 0,
            },
            FrontendMessage::Flush,
        ])
        .await
    }

    /// Execute and stream the result rows.
    ///
    /// The first response is read eagerly; a statement that returns no rows
    /// is already complete (and its portal closed) when the cursor is returned.
    pub async fn query(self) -> Result<ResultCursor> {
        let conn = Connection::upgrade(&self.conn)?;
        self.start(&conn).await?;

        let first = conn.next_message().await?;
        let mut cursor = ResultCursor::extended(self.conn, self.name, self.decoder);
        match first {
            BackendMessage::ErrorResponse(error) => Err(error.into_error()),
            first => {
                cursor.seed(&conn, first).await?;
                Ok(cursor)
            }
        }
    }

    /// Execute a statement that returns no rows and return its command status.
    ///
    /// The response must be CommandComplete. Rows or an empty query are a
    /// [`crate::Error::Protocol`] mismatch; use [`Portal::query`] for those, or
    /// call [`Connection::recover_if_needed`] after the error.
    pub async fn execute(self) -> Result<CommandStatus> {
        let conn = Connection::upgrade(&self.conn)?;
        self.start(&conn).await?;

        let complete: CommandComplete = conn.receive_response().await?;
        conn.with_state(|s| s.set_portal_status(&self.name, PortalStatus::Drained));
        conn.cleanup_portal(&self.name).await?;
        Ok(complete.status())
    }

    /// First column of the first row, or `None` when there are no rows.
    ///
    /// More than one row is a caller mistake: the rest is discarded and the
    /// connection resynchronized.
    pub async fn single_value(self) -> Result<Option<Value>> {
        let conn = Connection::upgrade(&self.conn)?;
        let name = self.name.clone();
        let mut cursor = self.query().await?;

        let Some(first) = cursor.next().await? else {
            return Ok(None);
        };
        if !cursor.is_complete() && cursor.next().await?.is_some() {
            tracing::warn!(portal = %name, "single_value query returned more than one row");
            conn.recover_if_needed().await?;
            if conn.portal_status(&name).is_some() {
                conn.cleanup_portal(&name).await?;
            }
        }
        Ok(first.into_values().into_iter().next())
    }
}

impl std::fmt::Debug for Portal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Portal")
            .field("name", &self.name)
            .field("columns", &self.columns().map(<[_]>::len))
            .finish()
    }
}
