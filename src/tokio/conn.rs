//! Asynchronous PostgreSQL connection.
//!
//! A [`Connection`] owns one transport. A background task reads and decodes
//! frames and hands them to callers in arrival order; callers write requests
//! through an async mutex. Clones share the same session.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::task::JoinHandle;

use crate::command_status::CommandStatus;
use crate::error::{Error, Result};
use crate::opts::{Credential, Opts};
use crate::protocol::backend::{
    AuthenticationRequest, BackendKeyData, BackendMessage, BindComplete, CloseComplete,
    ExpectedMessage, ParseComplete, ReadyForQuery, body_len,
};
use crate::protocol::frontend::{FrontendMessage, encode_all};
use crate::protocol::types::TransactionStatus;
use crate::row::{RowDecoder, Value};
use crate::state::{
    Action, AsyncMessage, AuthenticationStateMachine, ConnectionState, ConnectionStateMachine,
    PortalStatus, QueryMode,
};

use super::cursor::ResultCursor;
use super::mailbox::{Mailbox, Take};
use super::notifications::Notifications;
use super::portal::Portal;
use super::statement::Statement;
use super::stream;

type Writer = Box<dyn AsyncWrite + Send + Unpin>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Inner {
    writer: tokio::sync::Mutex<Option<Writer>>,
    mailbox: Mutex<Mailbox>,
    state: Mutex<ConnectionStateMachine>,
    certificate_hash: Option<Vec<u8>>,
    notifications: Notifications,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Publish side-channel messages directly; queue everything else for callers.
    fn dispatch(&self, message: BackendMessage) {
        if !message.is_async() {
            lock(&self.mailbox).deliver(Ok(message));
            return;
        }
        if let Err(error) = lock(&self.state).observe(&message) {
            lock(&self.mailbox).deliver(Err(error));
            return;
        }
        match AsyncMessage::from_backend(message) {
            Ok(side_channel) => self.notifications.push(side_channel),
            Err(message) => lock(&self.mailbox).deliver(Ok(message)),
        }
    }

    fn transport_closed(&self) {
        lock(&self.mailbox).close();
        lock(&self.state).close();
        self.notifications.close();
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let reader = self
            .reader
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = reader.take() {
            handle.abort();
        }
        self.mailbox
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .close();
        self.notifications.close();
    }
}

/// Read one backend frame: type byte, 4-byte length, body.
async fn read_message<R: AsyncRead + Unpin>(reader: &mut R) -> Result<BackendMessage> {
    let type_byte = match reader.read_u8().await {
        Ok(byte) => byte,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    };

    let mut length = [0u8; 4];
    reader.read_exact(&mut length).await.map_err(truncated)?;
    let mut body = vec![0u8; body_len(length)?];
    reader.read_exact(&mut body).await.map_err(truncated)?;

    BackendMessage::decode(type_byte, length, &body)
}

fn truncated(e: std::io::Error) -> Error {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        Error::Protocol("connection closed in the middle of a message".into())
    } else {
        e.into()
    }
}

async fn receive_loop<R: AsyncRead + Unpin>(mut reader: R, inner: Weak<Inner>) {
    loop {
        let result = read_message(&mut reader).await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        match result {
            Ok(message) => {
                tracing::trace!(kind = %message.kind(), "received message");
                inner.dispatch(message);
            }
            Err(Error::ConnectionClosed | Error::Io(_)) => {
                tracing::debug!("transport closed, receive loop exiting");
                inner.transport_closed();
                break;
            }
            Err(error) => {
                tracing::debug!(%error, "undecodable message, receive loop exiting");
                lock(&inner.mailbox).deliver(Err(error));
                inner.transport_closed();
                break;
            }
        }
    }
}

/// Asynchronous PostgreSQL connection.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl Connection {
    /// Connect and authenticate.
    pub async fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let conn = Self::connect(&opts).await?;
        if let Err(error) = conn.startup(&opts).await {
            conn.close().await;
            return Err(error);
        }
        Ok(conn)
    }

    /// Open the transport (with SSL negotiation) without authenticating.
    pub async fn connect(opts: &Opts) -> Result<Self> {
        let (stream, certificate_hash) = stream::connect(opts).await?;
        tracing::debug!(
            host = %opts.host,
            port = opts.port,
            tls = certificate_hash.is_some(),
            loopback = stream.is_tcp_loopback(),
            "transport established"
        );
        Ok(Self::with_stream(stream, certificate_hash))
    }

    /// Wrap an established duplex stream and start the receive task.
    ///
    /// `certificate_hash` is the SHA-256 hash of the server certificate for
    /// channel binding, if the stream is TLS. Must be called within a tokio
    /// runtime.
    pub fn with_stream<S>(stream: S, certificate_hash: Option<Vec<u8>>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let (read_half, write_half) = tokio::io::split(stream);
        let inner = Arc::new(Inner {
            writer: tokio::sync::Mutex::new(Some(Box::new(write_half))),
            mailbox: Mutex::new(Mailbox::default()),
            state: Mutex::new(ConnectionStateMachine::new()),
            certificate_hash,
            notifications: Notifications::default(),
            reader: Mutex::new(None),
        });
        let handle = tokio::spawn(receive_loop(
            BufReader::new(read_half),
            Arc::downgrade(&inner),
        ));
        *lock(&inner.reader) = Some(handle);
        Self { inner }
    }

    pub(crate) fn upgrade(inner: &Weak<Inner>) -> Result<Self> {
        inner
            .upgrade()
            .map(|inner| Self { inner })
            .ok_or(Error::ConnectionClosed)
    }

    pub(crate) fn downgrade(&self) -> Weak<Inner> {
        Arc::downgrade(&self.inner)
    }

    /// Send the startup message and run the authentication exchange.
    pub async fn startup(&self, opts: &Opts) -> Result<()> {
        let params = opts.startup_params();
        self.send(&[FrontendMessage::Startup { params: &params }])
            .await?;

        let mut machine = AuthenticationStateMachine::new(
            &opts.user,
            opts.credential.clone(),
            self.inner.certificate_hash.clone(),
        );
        let mut buf = Vec::new();
        loop {
            let request: AuthenticationRequest = self.receive_response().await?;
            match machine.step(request, &mut buf)? {
                Action::WriteAndReadMessage => self.write_raw(&buf).await?,
                Action::ReadMessage => {}
                Action::Finished => break,
            }
        }

        let _: ReadyForQuery = self.receive_response().await?;
        machine.finish()?;
        tracing::debug!(
            user = %opts.user,
            method = opts.credential.method(),
            "authenticated"
        );
        Ok(())
    }

    /// Authenticate as `user` with default startup parameters.
    pub async fn authenticate(
        &self,
        user: &str,
        database: Option<&str>,
        credential: Credential,
    ) -> Result<()> {
        let opts = Opts {
            user: user.to_string(),
            database: database.map(str::to_string),
            credential,
            ..Opts::default()
        };
        self.startup(&opts).await
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ConnectionStateMachine) -> R) -> R {
        f(&mut lock(&self.inner.state))
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.with_state(|s| s.state())
    }

    /// Transaction status from the last ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.with_state(|s| s.transaction_status())
    }

    /// Check if currently in a transaction (active or failed).
    pub fn in_transaction(&self) -> bool {
        self.transaction_status().in_transaction()
    }

    /// Returns true while the transport is open and the connection not closed.
    pub fn connected(&self) -> bool {
        !lock(&self.inner.mailbox).is_closed() && self.state() != ConnectionState::Closed
    }

    /// SHA-256 hash of the server certificate, for TLS connections.
    pub fn certificate_hash(&self) -> Option<&[u8]> {
        self.inner.certificate_hash.as_deref()
    }

    /// Server parameters reported so far.
    pub fn server_params(&self) -> Vec<(String, String)> {
        self.with_state(|s| s.server_params().to_vec())
    }

    /// Latest value of one server parameter.
    pub fn server_param(&self, name: &str) -> Option<String> {
        self.with_state(|s| s.server_param(name).map(str::to_string))
    }

    /// Backend key data for query cancellation.
    pub fn backend_key(&self) -> Option<BackendKeyData> {
        self.with_state(|s| s.backend_key())
    }

    /// Handle to the side-channel message stream.
    pub fn notifications(&self) -> Notifications {
        self.inner.notifications.clone()
    }

    async fn write_raw(&self, buf: &[u8]) -> Result<()> {
        let mut writer = self.inner.writer.lock().await;
        let writer = writer.as_mut().ok_or(Error::ConnectionClosed)?;
        let result = async {
            writer.write_all(buf).await?;
            writer.flush().await
        }
        .await;
        if let Err(error) = result {
            self.inner.transport_closed();
            return Err(error.into());
        }
        Ok(())
    }

    pub(crate) async fn send(&self, messages: &[FrontendMessage<'_>]) -> Result<()> {
        for message in messages {
            tracing::trace!(message = message.name(), "sending message");
        }
        self.write_raw(&encode_all(messages)).await
    }

    /// Next message that belongs to the current request. Side-channel
    /// messages never reach here; they go to [`Connection::notifications`].
    pub(crate) async fn next_message(&self) -> Result<BackendMessage> {
        let take = lock(&self.inner.mailbox).take();
        let message = match take {
            Take::Ready(message) => message?,
            Take::Wait(receiver) => receiver
                .await
                .map_err(|_dropped| Error::ConnectionClosed)??,
        };
        self.with_state(|s| s.observe(&message))?;
        Ok(message)
    }

    /// Next request message, which must be a `T`.
    pub(crate) async fn receive_response<T: ExpectedMessage>(&self) -> Result<T> {
        match T::from_message(self.next_message().await?) {
            Ok(message) => Ok(message),
            Err(BackendMessage::ErrorResponse(error)) => Err(error.into_error()),
            Err(other) => Err(Error::Protocol(format!(
                "expected {}, got {}",
                T::KIND,
                other.kind()
            ))),
        }
    }

    /// Resynchronize after an error or an abandoned result stream.
    ///
    /// Discards everything up to the next ReadyForQuery. An extended-protocol
    /// cycle is ended with Sync first; a simple Query already has its own
    /// ReadyForQuery on the way.
    pub async fn recover_if_needed(&self) -> Result<()> {
        match self.state() {
            ConnectionState::Ready => return Ok(()),
            ConnectionState::Closed => return Err(Error::ConnectionClosed),
            ConnectionState::AwaitingAuthentication => return Err(Error::AwaitingAuthentication),
            ConnectionState::QuerySent
            | ConnectionState::AwaitingQueryResult
            | ConnectionState::ErrorReceived => {}
        }
        let mode = self.with_state(|s| s.mode());
        tracing::debug!(state = %self.state(), ?mode, "recovering connection");

        if mode == QueryMode::Extended {
            self.send(&[FrontendMessage::Sync, FrontendMessage::Flush])
                .await?;
        }
        loop {
            match self.next_message().await? {
                BackendMessage::ReadyForQuery(_) => break,
                other => tracing::trace!(kind = %other.kind(), "discarding during recovery"),
            }
        }

        self.with_state(|s| {
            if s.transaction_status() == TransactionStatus::Idle {
                s.clear_portals();
            }
        });
        Ok(())
    }

    /// Close the connection.
    ///
    /// Sends Terminate (errors ignored), invalidates every statement and
    /// portal, and fails pending operations with [`Error::ConnectionClosed`].
    pub async fn close(&self) {
        if let Some(mut writer) = self.inner.writer.lock().await.take() {
            let mut buf = Vec::new();
            FrontendMessage::Terminate.encode(&mut buf);
            let _ = writer.write_all(&buf).await;
            let _ = writer.shutdown().await;
            tracing::debug!("connection closed");
        }

        self.with_state(|s| s.close());
        if let Some(handle) = lock(&self.inner.reader).take() {
            handle.abort();
        }
        {
            let mut mailbox = lock(&self.inner.mailbox);
            mailbox.close();
            mailbox.clear();
        }
        self.inner.notifications.close();
    }

    /// Parse `text` into a named prepared statement.
    pub async fn prepare_statement(&self, text: &str) -> Result<Statement> {
        let name = self.with_state(|s| {
            s.require_ready("prepare_statement")?;
            s.begin_exchange();
            Ok::<_, Error>(s.next_name("stmt"))
        })?;

        self.send(&[
            FrontendMessage::Parse {
                name: &name,
                query: text,
            },
            FrontendMessage::Flush,
        ])
        .await?;
        let _: ParseComplete = self.receive_response().await?;

        self.with_state(|s| {
            s.complete_exchange();
            s.add_statement(&name);
        });
        Ok(Statement::new(self.downgrade(), name, text.to_string()))
    }

    /// Close a prepared statement. Closing an unknown or closed name is a no-op.
    pub async fn close_statement(&self, name: &str) -> Result<()> {
        let open = self.with_state(|s| {
            s.require_open()?;
            if s.is_statement_open(name) {
                s.begin_exchange();
                Ok::<_, Error>(true)
            } else {
                Ok(false)
            }
        })?;
        if !open {
            return Ok(());
        }

        self.send(&[FrontendMessage::CloseStatement(name), FrontendMessage::Flush])
            .await?;
        let _: CloseComplete = self.receive_response().await?;
        self.with_state(|s| {
            s.complete_exchange();
            s.remove_statement(name);
        });
        Ok(())
    }

    /// Returns true if `name` is not an open prepared statement.
    pub fn is_statement_closed(&self, name: &str) -> bool {
        self.with_state(|s| !s.is_statement_open(name))
    }

    /// Bind `params` to `statement` as a new portal.
    pub(crate) async fn bind_portal(
        &self,
        statement: &str,
        params: &[Value],
        want_metadata: bool,
    ) -> Result<Portal> {
        let name = self.with_state(|s| {
            s.require_open()?;
            s.begin_exchange();
            Ok::<_, Error>(s.next_name("portal"))
        })?;

        self.send(&[
            FrontendMessage::Bind {
                portal: &name,
                statement,
                params,
            },
            FrontendMessage::Flush,
        ])
        .await?;
        let _: BindComplete = self.receive_response().await?;
        self.with_state(|s| {
            s.complete_exchange();
            s.add_portal(&name);
        });

        let decoder = if want_metadata {
            self.with_state(|s| s.begin_exchange());
            self.send(&[FrontendMessage::DescribePortal(&name), FrontendMessage::Flush])
                .await?;
            let decoder = match self.next_message().await? {
                BackendMessage::NoData(_) => None,
                BackendMessage::RowDescription(description) => {
                    Some(Arc::new(RowDecoder::new(description.into_fields())))
                }
                BackendMessage::ErrorResponse(error) => return Err(error.into_error()),
                other => {
                    return Err(Error::Server(format!(
                        "unexpected {} in response to Describe",
                        other.kind()
                    )));
                }
            };
            self.with_state(|s| s.complete_exchange());
            decoder
        } else {
            None
        };

        Ok(Portal::new(self.downgrade(), name, decoder))
    }

    /// Close a drained portal and end the implicit transaction block.
    pub(crate) async fn cleanup_portal(&self, name: &str) -> Result<()> {
        tracing::debug!(portal = name, "closing portal");
        self.send(&[FrontendMessage::ClosePortal(name), FrontendMessage::Flush])
            .await?;
        let _: CloseComplete = self.receive_response().await?;
        self.with_state(|s| s.remove_portal(name))?;

        self.send(&[FrontendMessage::Sync]).await?;
        let _: ReadyForQuery = self.receive_response().await?;
        Ok(())
    }

    pub(crate) fn portal_status(&self, name: &str) -> Option<PortalStatus> {
        self.with_state(|s| s.portal_status(name))
    }

    /// Run `sql` with the simple query protocol and return the last command status.
    ///
    /// Rows are discarded. A server error is returned once the connection is
    /// ready again.
    pub async fn execute(&self, sql: &str) -> Result<CommandStatus> {
        self.with_state(|s| {
            s.require_ready("execute")?;
            s.simple_query_sent();
            Ok::<_, Error>(())
        })?;
        self.send(&[FrontendMessage::Query(sql)]).await?;

        let mut status = CommandStatus::Empty;
        let mut error = None;
        loop {
            match self.next_message().await? {
                BackendMessage::CommandComplete(complete) => status = complete.status(),
                BackendMessage::EmptyQuery(_) => status = CommandStatus::Empty,
                BackendMessage::ErrorResponse(response) => {
                    error.get_or_insert(response.into_error());
                }
                BackendMessage::RowDescription(_) | BackendMessage::DataRow(_) => {}
                BackendMessage::ReadyForQuery(_) => break,
                other => {
                    return Err(Error::Server(format!(
                        "unexpected {} in simple query response",
                        other.kind()
                    )));
                }
            }
        }

        match error {
            Some(error) => Err(error),
            None => Ok(status),
        }
    }

    /// Run `sql` with the simple query protocol and stream its rows.
    pub async fn query(&self, sql: &str) -> Result<ResultCursor> {
        self.with_state(|s| {
            s.require_ready("query")?;
            s.simple_query_sent();
            Ok::<_, Error>(())
        })?;
        self.send(&[FrontendMessage::Query(sql)]).await?;
        Ok(ResultCursor::simple(self.downgrade()))
    }

    pub async fn begin_transaction(&self) -> Result<()> {
        self.execute("BEGIN").await.map(drop)
    }

    pub async fn commit_transaction(&self) -> Result<()> {
        self.execute("COMMIT").await.map(drop)
    }

    pub async fn rollback_transaction(&self) -> Result<()> {
        self.execute("ROLLBACK").await.map(drop)
    }

    /// Run `operation` inside BEGIN/COMMIT.
    ///
    /// If the operation fails, the connection is recovered and rolled back
    /// when the server still reports a transaction, and the operation's
    /// error is returned.
    pub async fn with_transaction<T, F, Fut>(&self, operation: F) -> Result<T>
    where
        F: FnOnce(Connection) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.begin_transaction().await?;
        match operation(self.clone()).await {
            Ok(value) => {
                self.commit_transaction().await?;
                Ok(value)
            }
            Err(error) => {
                tracing::debug!(%error, "transaction failed, rolling back");
                if let Err(recover_error) = self.recover_if_needed().await {
                    tracing::warn!(%recover_error, "could not recover after failed transaction");
                    return Err(error);
                }
                if self.in_transaction() {
                    if let Err(rollback_error) = self.rollback_transaction().await {
                        tracing::warn!(%rollback_error, "rollback failed");
                    }
                }
                Err(error)
            }
        }
    }

    /// Names of the server's prepared statements for this session.
    pub async fn list_prepared_statements(&self) -> Result<Vec<String>> {
        self.list_names("SELECT name FROM pg_prepared_statements")
            .await
    }

    /// Names of the server's open cursors for this session.
    pub async fn list_open_portals(&self) -> Result<Vec<String>> {
        self.list_names("SELECT name FROM pg_cursors").await
    }

    async fn list_names(&self, sql: &str) -> Result<Vec<String>> {
        let rows = self.query(sql).await?.collect().await?;
        rows.iter()
            .map(|row| {
                row.get(0)
                    .ok_or_else(|| Error::Protocol("empty row".into()))?
                    .as_str()
                    .map(str::to_string)
            })
            .collect()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("state", &self.state())
            .field("transaction_status", &self.transaction_status())
            .field("tls", &self.inner.certificate_hash.is_some())
            .finish()
    }
}
