//! The physical-link seam.
//!
//! A [`Transport`] is one live session with the server: it knows how to send
//! statements, fetch replies, stream COPY data and report its own health, but
//! nothing about reconnecting or replaying logical state. That is the job of
//! [`Connection`](crate::Connection), which owns exactly one transport at a
//! time and throws it away when it breaks.

use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use crate::error::Result;
use crate::result::Reply;

/// Health of a physical link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    /// The link can carry requests.
    Ok,
    /// The link is present but unusable.
    Bad,
}

/// How much detail the server's diagnostics carry when rendered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Severity and primary message only
    Terse,
    /// Adds detail and hint lines
    #[default]
    Default,
    /// Adds SQLSTATE, context and source location
    Verbose,
}

/// Direction to wait for in [`Transport::wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Wait until data can be read
    Read,
    /// Wait until data can be written
    Write,
}

/// Outcome of pulling one chunk from a COPY TO STDOUT stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CopyChunk {
    /// One line of data, including its terminator
    Row(Vec<u8>),
    /// The stream ended; the final result is waiting in `next_result`
    Done,
    /// Nothing available without blocking
    Pending,
    /// The transport failed; see `error_message`
    Failed,
}

/// Outcome of pushing data into a COPY FROM STDIN stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyPut {
    /// Queued for sending
    Sent,
    /// Would block; retry later
    Pending,
    /// The transport failed; see `error_message`
    Failed,
}

/// An asynchronous notification delivered by LISTEN/NOTIFY.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Channel name
    pub channel: String,
    /// Notification payload
    pub payload: String,
    /// PID of the notifying backend process
    pub pid: u32,
}

/// Names describing where a link is connected.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Endpoint {
    /// Database name
    pub dbname: String,
    /// Role name
    pub user: String,
    /// Host name or socket path
    pub host: String,
    /// Port, as text
    pub port: String,
}

/// A one-shot request to abort whatever the link is executing.
///
/// Tokens do not share state with the link they were made from, so they can
/// be moved to another thread and fired while the owning thread is blocked
/// waiting on a reply.
pub trait CancelToken: Send + Clone + 'static {
    /// Ask the server to cancel the running statement.
    fn cancel(&self) -> Result<()>;
}

/// Receives raw notice text from the link.
pub type NoticeSink = Box<dyn FnMut(&[u8])>;

/// Receives a human-readable log of protocol traffic.
pub type TraceSink = Rc<RefCell<dyn Write>>;

/// Handle-based API of one physical session with the server.
pub trait Transport {
    /// Cancellation token type produced by this link.
    type Cancel: CancelToken;

    /// Current health.
    fn status(&self) -> LinkStatus;

    /// Most recent error text reported by the link.
    fn error_message(&self) -> String;

    /// Server version as an integer (e.g. 150004).
    fn server_version(&self) -> i32;

    /// Frontend/backend protocol major version, 0 when unknown.
    fn protocol_version(&self) -> i32;

    /// Process id of the server backend, 0 when unknown.
    fn backend_pid(&self) -> u32;

    /// Where the link is connected.
    fn endpoint(&self) -> Endpoint;

    /// A server parameter reported at startup or later (e.g. `client_encoding`).
    fn server_param(&self, name: &str) -> Option<&str>;

    /// Re-establish the session in place with the same parameters.
    ///
    /// Failures are reported through `status` and `error_message`.
    fn reset(&mut self);

    /// Send a statement and wait for its reply.
    ///
    /// `Err` means no reply came back at all.
    fn exec(&mut self, sql: &str) -> Result<Reply>;

    /// Send a (possibly multi-statement) request without waiting.
    fn send_query(&mut self, sql: &str) -> Result<()>;

    /// Next reply of the request in flight, `None` once it is complete.
    fn next_result(&mut self) -> Result<Option<Reply>>;

    /// Define a prepared statement on the server.
    fn prepare(&mut self, name: &str, definition: &str) -> Result<Reply>;

    /// Execute a prepared statement with text parameters.
    fn exec_prepared(&mut self, name: &str, params: &[Option<&str>]) -> Result<Reply>;

    /// Execute a one-off statement with text parameters.
    fn exec_params(&mut self, sql: &str, params: &[Option<&str>]) -> Result<Reply>;

    /// Read whatever the server already sent without blocking.
    fn consume_input(&mut self) -> Result<()>;

    /// Pop one buffered notification.
    fn take_notification(&mut self) -> Option<Notification>;

    /// Pull one chunk of COPY TO STDOUT data.
    fn get_copy_data(&mut self) -> CopyChunk;

    /// Push COPY FROM STDIN data.
    fn put_copy_data(&mut self, data: &[u8]) -> CopyPut;

    /// Finish COPY FROM STDIN; `error` aborts the copy with that message.
    fn put_copy_end(&mut self, error: Option<&str>) -> CopyPut;

    /// Abandon any COPY in progress and discard its results.
    fn abort_copy(&mut self);

    /// Token that can cancel the statement currently running on this link.
    fn cancel_token(&self) -> Option<Self::Cancel>;

    /// Install or remove the notice receiver.
    fn set_notice_sink(&mut self, sink: Option<NoticeSink>);

    /// Install or remove the protocol trace output.
    fn set_trace(&mut self, sink: Option<TraceSink>);

    /// Choose how server diagnostics are rendered.
    fn set_verbosity(&mut self, verbosity: Verbosity);

    /// Block until the link is ready in `direction` or `timeout` elapses.
    fn wait(&mut self, direction: Readiness, timeout: Option<Duration>) -> Result<()>;

    /// Raw socket descriptor, if the link has one.
    fn socket(&self) -> Option<std::os::fd::RawFd>;
}
