//! Streaming result rows.

use std::sync::{Arc, Weak};

use crate::command_status::CommandStatus;
use crate::error::{Error, Result};
use crate::protocol::backend::{BackendMessage, ReadyForQuery};
use crate::row::{ColumnMetadata, Row, RowDecoder};
use crate::state::PortalStatus;

use super::conn::{Connection, Inner};

/// Rows of one executing command.
///
/// Call [`ResultCursor::next`] until it returns `None`; the command status is
/// available afterwards. Abandoning a cursor early leaves the connection busy
/// until [`Connection::recover_if_needed`] is called.
pub struct ResultCursor {
    conn: Weak<Inner>,
    /// Portal name for the extended protocol, `None` for a simple query
    portal: Option<String>,
    decoder: Option<Arc<RowDecoder>>,
    pending: Option<BackendMessage>,
    command_status: Option<CommandStatus>,
    complete: bool,
}

impl ResultCursor {
    pub(crate) fn extended(
        conn: Weak<Inner>,
        portal: String,
        decoder: Option<Arc<RowDecoder>>,
    ) -> Self {
        Self {
            conn,
            portal: Some(portal),
            decoder,
            pending: None,
            command_status: None,
            complete: false,
        }
    }

    pub(crate) fn simple(conn: Weak<Inner>) -> Self {
        Self {
            conn,
            portal: None,
            decoder: None,
            pending: None,
            command_status: None,
            complete: false,
        }
    }

    /// Install the eagerly read first response. A completion message
    /// finishes the cursor right away.
    pub(crate) async fn seed(&mut self, conn: &Connection, first: BackendMessage) -> Result<()> {
        match first {
            BackendMessage::CommandComplete(complete) => {
                self.finish(conn, complete.status()).await
            }
            BackendMessage::EmptyQuery(_) => self.finish(conn, CommandStatus::Empty).await,
            other => {
                self.pending = Some(other);
                Ok(())
            }
        }
    }

    /// Next row, or `None` once the command completed.
    pub async fn next(&mut self) -> Result<Option<Row>> {
        if self.complete {
            return Ok(None);
        }
        let conn = Connection::upgrade(&self.conn)?;

        loop {
            let message = match self.pending.take() {
                Some(message) => message,
                None => conn.next_message().await?,
            };
            match message {
                BackendMessage::DataRow(row) => {
                    return Ok(Some(Row::new(row, self.decoder.clone())));
                }
                BackendMessage::CommandComplete(complete) => {
                    self.finish(&conn, complete.status()).await?;
                    return Ok(None);
                }
                BackendMessage::EmptyQuery(_) => {
                    self.finish(&conn, CommandStatus::Empty).await?;
                    return Ok(None);
                }
                BackendMessage::ErrorResponse(error) => {
                    self.complete = true;
                    if self.portal.is_none() {
                        // simple protocol: the server follows up with ReadyForQuery
                        let _: ReadyForQuery = conn.receive_response().await?;
                    }
                    return Err(error.into_error());
                }
                BackendMessage::RowDescription(description) if self.portal.is_none() => {
                    self.decoder = Some(Arc::new(RowDecoder::new(description.into_fields())));
                }
                other => {
                    self.complete = true;
                    return Err(Error::Server(format!(
                        "unexpected {} in result stream",
                        other.kind()
                    )));
                }
            }
        }
    }

    async fn finish(&mut self, conn: &Connection, status: CommandStatus) -> Result<()> {
        self.complete = true;
        self.command_status = Some(status);
        match &self.portal {
            Some(portal) => {
                if conn.portal_status(portal).is_some() {
                    conn.with_state(|s| s.set_portal_status(portal, PortalStatus::Drained));
                    conn.cleanup_portal(portal).await?;
                }
            }
            None => {
                // later statements of a multi-statement query are discarded
                let mut error = None;
                loop {
                    match conn.next_message().await? {
                        BackendMessage::ReadyForQuery(_) => break,
                        BackendMessage::ErrorResponse(response) => {
                            error.get_or_insert(response.into_error());
                        }
                        other => tracing::trace!(kind = %other.kind(), "discarding trailing result"),
                    }
                }
                if let Some(error) = error {
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Drain the remaining rows.
    pub async fn collect(mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }

    /// Returns true once the command completed.
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Command status, available once the cursor completed.
    pub fn command_status(&self) -> Option<&CommandStatus> {
        self.command_status.as_ref()
    }

    /// Row count from the command status.
    pub fn row_count(&self) -> Option<u64> {
        self.command_status.as_ref().and_then(CommandStatus::row_count)
    }

    /// Column metadata, when known.
    pub fn columns(&self) -> Option<&[ColumnMetadata]> {
        self.decoder.as_deref().map(RowDecoder::columns)
    }
}

impl std::fmt::Debug for ResultCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCursor")
            .field("portal", &self.portal)
            .field("complete", &self.complete)
            .field("command_status", &self.command_status)
            .finish()
    }
}
