//! Sans-I/O state machines for PostgreSQL protocol.
//!
//! These state machines handle the protocol logic without performing any I/O.
//! The async connection feeds them messages and performs the I/O they ask for.

pub mod action;
pub mod authentication;
pub mod connection;

pub use action::{Action, AsyncMessage};
pub use authentication::{AuthenticationState, AuthenticationStateMachine, select_mechanism};
pub use connection::{ConnectionState, ConnectionStateMachine, PortalStatus, QueryMode};
