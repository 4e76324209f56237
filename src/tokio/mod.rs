//! Asynchronous PostgreSQL client using Tokio.

mod conn;
mod cursor;
mod mailbox;
mod notifications;
mod pool;
mod portal;
mod statement;
mod stream;

pub use conn::Connection;
pub use cursor::ResultCursor;
pub use notifications::Notifications;
pub use pool::{Lease, Pool};
pub use portal::Portal;
pub use statement::Statement;
pub use stream::Stream;
