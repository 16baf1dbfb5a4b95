//! Sans-I/O state machines for the PostgreSQL protocol.
//!
//! A state machine never touches a socket. It hands back an [`Action`]
//! telling the caller which I/O to perform before stepping it again.

pub mod action;
pub mod connection;

pub use action::Action;
pub use connection::{ConnectionState, StartupStateMachine};
