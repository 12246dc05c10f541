//! Persistence layer: conversation history, access control, connected accounts.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use traits::{
    AppendReceipt, ConnectedAccount, ConnectionStore, ControlStore, Direction, HistoryEntry,
    HistoryStore,
};
