//! PostgreSQL wire protocol implementation.
//!
//! This module contains the low-level protocol encoding and decoding.
//! Nothing here performs I/O.
//!
//! # Structure
//!
//! - `backend`: Server → Client messages (decoding into [`BackendMessage`])
//! - `frontend`: Client → Server messages (encoding from [`FrontendMessage`])
//! - `codec`: Low-level encoding/decoding primitives
//! - `types`: Common protocol types (FormatCode, Oid, TransactionStatus)

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use backend::{BackendMessage, MessageKind};
pub use frontend::FrontendMessage;
pub use types::{FormatCode, Oid, TransactionStatus};
