//! PostgreSQL wire protocol, version 3.
//!
//! - `backend`: server to client messages (parsing)
//! - `frontend`: client to server messages (encoding)
//! - `codec`: big-endian primitives and the message builder
//! - `types`: small shared protocol types

pub mod backend;
pub mod codec;
pub mod frontend;
pub mod types;

pub use backend::RawMessage;
pub use types::TransactionStatus;
