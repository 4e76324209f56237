//! Connection lifecycle state machine.
//!
//! Tracks the request/response state, the transaction status reported by
//! ReadyForQuery, and the server-side objects (statements and portals) the
//! client believes are open. No I/O happens here; the async connection calls
//! [`ConnectionStateMachine::observe`] for every message it receives.

use std::collections::{HashMap, HashSet};

use crate::error::{Error, Result};
use crate::protocol::backend::{BackendKeyData, BackendMessage};
use crate::protocol::types::TransactionStatus;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingAuthentication,
    Ready,
    QuerySent,
    AwaitingQueryResult,
    ErrorReceived,
    Closed,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ConnectionState::AwaitingAuthentication => "awaiting authentication",
            ConnectionState::Ready => "ready",
            ConnectionState::QuerySent => "query sent",
            ConnectionState::AwaitingQueryResult => "awaiting query result",
            ConnectionState::ErrorReceived => "error received",
            ConnectionState::Closed => "closed",
        })
    }
}

/// Client-side view of a portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortalStatus {
    /// BindComplete received
    Bound,
    /// Execute sent, results not yet drained
    Executing,
    /// CommandComplete or EmptyQueryResponse received
    Drained,
}

/// Protocol of the request in flight.
///
/// A simple Query is always answered with its own ReadyForQuery, while an
/// extended-protocol cycle only ends once a Sync is sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    Simple,
    Extended,
}

/// Connection bookkeeping.
#[derive(Debug)]
pub struct ConnectionStateMachine {
    state: ConnectionState,
    mode: QueryMode,
    transaction_status: TransactionStatus,
    open_statements: HashSet<String>,
    portals: HashMap<String, PortalStatus>,
    server_params: Vec<(String, String)>,
    backend_key: Option<BackendKeyData>,
    next_id: u64,
}

impl Default for ConnectionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionStateMachine {
    /// Create a state machine for a connection that has not authenticated yet.
    pub fn new() -> Self {
        Self {
            state: ConnectionState::AwaitingAuthentication,
            mode: QueryMode::Extended,
            transaction_status: TransactionStatus::Idle,
            open_statements: HashSet::new(),
            portals: HashMap::new(),
            server_params: Vec::new(),
            backend_key: None,
            next_id: 0,
        }
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Protocol of the last request sent.
    pub fn mode(&self) -> QueryMode {
        self.mode
    }

    /// Transaction status from the last ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Backend key data (for cancellation).
    pub fn backend_key(&self) -> Option<BackendKeyData> {
        self.backend_key
    }

    /// Server parameters reported by ParameterStatus, latest value per name.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// Look up one server parameter.
    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Update state from a received message.
    ///
    /// Fails only when a ReadyForQuery carries an unknown status byte.
    pub fn observe(&mut self, message: &BackendMessage) -> Result<()> {
        match message {
            BackendMessage::ReadyForQuery(ready) => {
                let status = TransactionStatus::from_byte(ready.status).ok_or_else(|| {
                    Error::Protocol(format!(
                        "invalid transaction status byte 0x{:02x}",
                        ready.status
                    ))
                })?;
                self.transaction_status = status;
                if self.state != ConnectionState::Closed {
                    self.state = ConnectionState::Ready;
                }
            }
            BackendMessage::DataRow(_) | BackendMessage::RowDescription(_) => {
                if self.state == ConnectionState::QuerySent {
                    self.state = ConnectionState::AwaitingQueryResult;
                }
            }
            BackendMessage::ErrorResponse(_) => {
                if matches!(
                    self.state,
                    ConnectionState::QuerySent | ConnectionState::AwaitingQueryResult
                ) {
                    self.state = ConnectionState::ErrorReceived;
                }
            }
            BackendMessage::ParameterStatus(param) => {
                match self.server_params.iter_mut().find(|(n, _)| *n == param.name) {
                    Some(entry) => entry.1 = param.value.clone(),
                    None => self
                        .server_params
                        .push((param.name.clone(), param.value.clone())),
                }
            }
            BackendMessage::BackendKeyData(key) => {
                self.backend_key = Some(*key);
            }
            _ => {}
        }
        Ok(())
    }

    /// Fail unless the connection is ready for a new request.
    pub fn require_ready(&self, operation: &str) -> Result<()> {
        match self.state {
            ConnectionState::Ready => Ok(()),
            ConnectionState::Closed => Err(Error::ConnectionClosed),
            ConnectionState::AwaitingAuthentication => Err(Error::AwaitingAuthentication),
            state => Err(Error::InvalidState(format!(
                "{} requires a ready connection, but it is {}",
                operation, state
            ))),
        }
    }

    /// Fail if the connection is closed.
    pub fn require_open(&self) -> Result<()> {
        if self.state == ConnectionState::Closed {
            Err(Error::ConnectionClosed)
        } else {
            Ok(())
        }
    }

    /// A short request/completion exchange (Parse, Bind, Describe, Close) was sent.
    pub fn begin_exchange(&mut self) {
        self.mode = QueryMode::Extended;
        if self.state == ConnectionState::Ready {
            self.state = ConnectionState::QuerySent;
        }
    }

    /// The completion message of a short exchange arrived.
    ///
    /// A Describe answered with RowDescription has already moved the state
    /// on to awaiting-query-result; that counts as complete as well.
    pub fn complete_exchange(&mut self) {
        if matches!(
            self.state,
            ConnectionState::QuerySent | ConnectionState::AwaitingQueryResult
        ) {
            self.state = ConnectionState::Ready;
        }
    }

    /// Execute was sent.
    pub fn query_sent(&mut self) {
        self.mode = QueryMode::Extended;
        self.enter_query_sent();
    }

    /// A simple-protocol Query was sent.
    pub fn simple_query_sent(&mut self) {
        self.mode = QueryMode::Simple;
        self.enter_query_sent();
    }

    fn enter_query_sent(&mut self) {
        if !matches!(
            self.state,
            ConnectionState::Closed | ConnectionState::AwaitingAuthentication
        ) {
            self.state = ConnectionState::QuerySent;
        }
    }

    /// Move to the terminal state and forget all server-side objects.
    pub fn close(&mut self) {
        self.state = ConnectionState::Closed;
        self.open_statements.clear();
        self.portals.clear();
    }

    /// Generate a connection-unique name such as `stmt_3`.
    pub fn next_name(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}_{}", prefix, self.next_id)
    }

    pub fn add_statement(&mut self, name: &str) {
        self.open_statements.insert(name.to_string());
    }

    /// Returns true if the statement was open.
    pub fn remove_statement(&mut self, name: &str) -> bool {
        self.open_statements.remove(name)
    }

    pub fn is_statement_open(&self, name: &str) -> bool {
        self.open_statements.contains(name)
    }

    /// Names of open statements, unordered.
    pub fn open_statements(&self) -> impl Iterator<Item = &str> {
        self.open_statements.iter().map(String::as_str)
    }

    pub fn add_portal(&mut self, name: &str) {
        self.portals.insert(name.to_string(), PortalStatus::Bound);
    }

    pub fn portal_status(&self, name: &str) -> Option<PortalStatus> {
        self.portals.get(name).copied()
    }

    /// Update a tracked portal; untracked names are ignored.
    pub fn set_portal_status(&mut self, name: &str, status: PortalStatus) {
        if let Some(entry) = self.portals.get_mut(name) {
            *entry = status;
        }
    }

    /// Forget a portal after CloseComplete. A missing entry means desync.
    pub fn remove_portal(&mut self, name: &str) -> Result<PortalStatus> {
        self.portals
            .remove(name)
            .ok_or_else(|| Error::Protocol(format!("portal {} is not open", name)))
    }

    /// Forget every portal; the server drops them at transaction end.
    pub fn clear_portals(&mut self) {
        self.portals.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::backend::{DataRow, ErrorResponse, ParameterStatus, ReadyForQuery};

    fn ready(status: u8) -> BackendMessage {
        BackendMessage::ReadyForQuery(ReadyForQuery { status })
    }

    fn authenticated() -> ConnectionStateMachine {
        let mut machine = ConnectionStateMachine::new();
        machine.observe(&ready(b'I')).unwrap();
        machine
    }

    #[test]
    fn test_query_cycle() {
        let mut machine = authenticated();
        assert_eq!(machine.state(), ConnectionState::Ready);

        machine.query_sent();
        assert_eq!(machine.state(), ConnectionState::QuerySent);

        let row = BackendMessage::DataRow(DataRow::parse(&[0, 0]).unwrap());
        machine.observe(&row).unwrap();
        assert_eq!(machine.state(), ConnectionState::AwaitingQueryResult);

        machine.observe(&ready(b'T')).unwrap();
        assert_eq!(machine.state(), ConnectionState::Ready);
        assert_eq!(machine.transaction_status(), TransactionStatus::InTransaction);

        machine.observe(&ready(b'E')).unwrap();
        assert_eq!(machine.transaction_status(), TransactionStatus::Failed);
    }

    #[test]
    fn test_error_received() {
        let mut machine = authenticated();
        machine.begin_exchange();
        let error = ErrorResponse::parse(b"SERROR\0Mboom\0\0").unwrap();
        machine.observe(&BackendMessage::ErrorResponse(error)).unwrap();
        assert_eq!(machine.state(), ConnectionState::ErrorReceived);
        assert!(matches!(
            machine.require_ready("prepare"),
            Err(Error::InvalidState(_))
        ));
    }

    #[test]
    fn test_exchange_returns_to_ready() {
        let mut machine = authenticated();
        machine.begin_exchange();
        assert_eq!(machine.state(), ConnectionState::QuerySent);
        machine.complete_exchange();
        assert_eq!(machine.state(), ConnectionState::Ready);
    }

    #[test]
    fn test_query_mode_follows_last_request() {
        let mut machine = authenticated();
        machine.simple_query_sent();
        assert_eq!(machine.mode(), QueryMode::Simple);
        assert_eq!(machine.state(), ConnectionState::QuerySent);
        machine.observe(&ready(b'I')).unwrap();

        machine.begin_exchange();
        assert_eq!(machine.mode(), QueryMode::Extended);
        machine.complete_exchange();
        machine.simple_query_sent();
        machine.query_sent();
        assert_eq!(machine.mode(), QueryMode::Extended);
    }

    #[test]
    fn test_bad_status_byte() {
        let mut machine = authenticated();
        assert!(matches!(machine.observe(&ready(b'X')), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_closed_is_terminal() {
        let mut machine = authenticated();
        machine.add_statement("stmt_1");
        machine.add_portal("portal_2");
        machine.close();
        machine.observe(&ready(b'I')).unwrap();
        assert_eq!(machine.state(), ConnectionState::Closed);
        assert!(!machine.is_statement_open("stmt_1"));
        assert!(machine.portal_status("portal_2").is_none());
        assert!(matches!(machine.require_open(), Err(Error::ConnectionClosed)));
        assert!(matches!(machine.require_ready("bind"), Err(Error::ConnectionClosed)));
    }

    #[test]
    fn test_awaiting_authentication() {
        let machine = ConnectionStateMachine::new();
        assert!(matches!(
            machine.require_ready("prepare"),
            Err(Error::AwaitingAuthentication)
        ));
    }

    #[test]
    fn test_portal_bookkeeping() {
        let mut machine = authenticated();
        let name = machine.next_name("portal");
        assert_eq!(name, "portal_1");
        assert_eq!(machine.next_name("stmt"), "stmt_2");

        machine.add_portal(&name);
        machine.set_portal_status(&name, PortalStatus::Drained);
        assert_eq!(machine.portal_status(&name), Some(PortalStatus::Drained));
        assert_eq!(machine.remove_portal(&name).unwrap(), PortalStatus::Drained);
        assert!(matches!(machine.remove_portal(&name), Err(Error::Protocol(_))));
    }

    #[test]
    fn test_parameter_status_replaces_value() {
        let mut machine = ConnectionStateMachine::new();
        for value in ["UTC", "Europe/Berlin"] {
            machine
                .observe(&BackendMessage::ParameterStatus(ParameterStatus {
                    name: "TimeZone".into(),
                    value: value.into(),
                }))
                .unwrap();
        }
        assert_eq!(machine.server_params().len(), 1);
        assert_eq!(machine.server_param("TimeZone"), Some("Europe/Berlin"));
    }
}
