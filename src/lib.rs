//! A durable logical PostgreSQL connection.
//!
//! # Features
//!
//! - **Survives link loss**: a broken physical link is replaced transparently
//!   and session variables, LISTEN subscriptions and prepared statements are
//!   replayed onto the new one
//! - **Reactivation avoidance**: state that cannot be rebuilt (open
//!   transactions, COPY streams, caller-held debt) blocks silent reconnects
//! - **Connect policies**: eager ([`Direct`]) or on first use ([`Lazy`])
//! - **Sans-I/O startup**: the authentication state machine is separated from
//!   the blocking transport
//!
//! # Example
//!
//! ```no_run
//! use pgsession::Connection;
//!
//! fn main() -> pgsession::Result<()> {
//!     let mut conn = Connection::connect("postgres://postgres@localhost/mydb")?;
//!     conn.set_variable("search_path", "app")?;
//!
//!     let result = conn.exec("SELECT 1 AS num", 0)?;
//!     println!("num = {:?}", result.get(0, 0)?);
//!
//!     conn.close();
//!     Ok(())
//! }
//! ```

pub mod caps;
pub mod conn;
pub mod error;
pub mod escape;
pub mod opts;
pub mod policy;
pub mod protocol;
pub mod result;
pub mod state;
pub mod sync;
pub mod transport;

pub use caps::{Capability, CapabilitySet};
pub use conn::{
    ConnState, Connection, CopyReader, CopyWriter, ErrorHandler, HandlerId, Listener,
    ListenerError, ReactivationExemption, ReceiverId, Transaction,
};
pub use error::{Error, ErrorFields, Result};
pub use opts::{Opts, SslMode};
pub use policy::{ConnectPolicy, Connector, Direct, Lazy};
pub use protocol::frontend::encrypt_password;
pub use result::{QueryResult, Reply, ReplyStatus};
pub use sync::{PgCancel, PgLink};
pub use transport::{
    CancelToken, CopyChunk, CopyPut, Endpoint, LinkStatus, Notification, Readiness, Transport,
    Verbosity,
};
