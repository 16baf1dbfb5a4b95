//! The logical connection.
//!
//! [`Connection`] owns at most one physical link and decides when it may be
//! opened, reset or torn down. Logical state (session variables, channel
//! subscriptions, prepared statement definitions) lives here rather than in
//! the link, and is replayed onto every fresh link.

mod avoidance;
mod copy;
#[cfg(test)]
pub(crate) mod mock;
mod notice;
mod prepared;
mod session;
mod sql;
mod transaction;

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::{debug, warn};

use crate::caps::{Capability, CapabilitySet};
use crate::error::{Error, Result};
use crate::escape;
use crate::opts::Opts;
use crate::policy::{ConnectPolicy, Direct, Lazy};
use crate::result::{QueryResult, Reply};
use crate::transport::{
    CancelToken, Endpoint, LinkStatus, Readiness, TraceSink, Transport, Verbosity,
};

use avoidance::AvoidanceCounter;
use notice::NoticeDispatcher;
use prepared::PreparedRegistry;
use session::SessionState;
use transaction::TransactionFocus;

pub use avoidance::ReactivationExemption;
pub use copy::{CopyReader, CopyWriter};
pub use notice::{ErrorHandler, HandlerId, NOTICE_CHUNK_SIZE};
pub use session::{Listener, ListenerError, ReceiverId};
pub use transaction::Transaction;

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Lifecycle state, derived from the link and the completion flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// No physical link
    Unconnected,
    /// A link exists but setup has not finished
    Connecting,
    /// Link healthy and logical state replayed
    Ready,
    /// Link present but unusable
    Broken,
}

/// What to do after a statement got no reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    Reset,
    Stop,
}

/// A logical connection that survives the loss of its physical link.
pub struct Connection<P: ConnectPolicy> {
    link: Option<P::Link>,
    policy: P,
    completed: bool,
    inhibit_reactivation: bool,
    avoidance: AvoidanceCounter,
    caps: CapabilitySet,
    session: SessionState,
    prepared: PreparedRegistry,
    transaction: Option<TransactionFocus>,
    notices: Rc<RefCell<NoticeDispatcher>>,
    trace: Option<TraceSink>,
    verbosity: Verbosity,
    unique_id: u64,
    serial: u64,
}

impl Connection<Direct<Opts>> {
    /// Connect to a PostgreSQL server right away.
    pub fn connect<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        Self::new(Direct::new(opts.try_into()?))
    }
}

impl Connection<Lazy<Opts>> {
    /// Create a connection that reaches the server on first use.
    pub fn lazy<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        Self::new(Lazy::new(opts.try_into()?))
    }
}

impl<P: ConnectPolicy> Connection<P> {
    /// Create a connection driven by `policy`.
    ///
    /// The policy may open a link immediately; if it reports the link ready
    /// the connection is activated before returning.
    pub fn new(mut policy: P) -> Result<Self> {
        let link = policy.start_connect(None)?;
        let mut conn = Self {
            link,
            policy,
            completed: false,
            inhibit_reactivation: false,
            avoidance: AvoidanceCounter::default(),
            caps: CapabilitySet::new(),
            session: SessionState::default(),
            prepared: PreparedRegistry::default(),
            transaction: None,
            notices: Rc::new(RefCell::new(NoticeDispatcher::default())),
            trace: None,
            verbosity: Verbosity::default(),
            unique_id: 0,
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
        };
        if conn.policy.is_ready(conn.link.as_ref()) {
            conn.activate()?;
        }
        Ok(conn)
    }

    /// The connect policy.
    pub fn policy(&self) -> &P {
        &self.policy
    }

    /// Check if a healthy, fully set up link exists.
    pub fn is_open(&self) -> bool {
        self.completed
            && self
                .link
                .as_ref()
                .is_some_and(|link| link.status() == LinkStatus::Ok)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnState {
        match &self.link {
            None => ConnState::Unconnected,
            Some(link) if link.status() == LinkStatus::Bad => ConnState::Broken,
            Some(_) if !self.completed => ConnState::Connecting,
            Some(_) => ConnState::Ready,
        }
    }

    // ---- lifecycle ----

    /// Make sure a usable link exists.
    ///
    /// Does nothing while reactivation avoidance debt is outstanding, so
    /// callers must not assume the connection is open afterwards.
    pub fn activate(&mut self) -> Result<()> {
        if self.is_open() {
            return Ok(());
        }
        if self.inhibit_reactivation {
            return Err(Error::ReactivationInhibited(
                "Could not reactivate connection; reactivation is inhibited".into(),
            ));
        }
        if self.avoidance.is_active() {
            debug!(
                debt = self.avoidance.get(),
                "not activating: reactivation avoidance in effect"
            );
            return Ok(());
        }

        match self.establish() {
            Ok(()) => Ok(()),
            Err(Error::ConnectionBroken(msg)) => {
                self.drop_link();
                self.completed = false;
                Err(Error::ConnectionBroken(msg))
            }
            Err(e) => {
                self.completed = false;
                Err(e)
            }
        }
    }

    fn establish(&mut self) -> Result<()> {
        debug!("activating connection");
        let link = self.policy.start_connect(self.link.take())?;
        self.link = self.policy.complete_connect(link)?;
        self.completed = true;
        if !self.is_open() {
            return Err(Error::ConnectionBroken(self.link_error()));
        }
        self.setup_state()
    }

    /// Bring a fresh link up to the logical state.
    fn setup_state(&mut self) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(Error::Internal("setup_state() on no connection".into()));
        };
        if link.status() != LinkStatus::Ok {
            let msg = link.error_message();
            self.drop_link();
            return Err(Error::Failure(msg));
        }

        self.caps = CapabilitySet::from_versions(link.server_version(), link.protocol_version())?;
        self.prepared.mark_all_unregistered();

        let dispatcher = Rc::clone(&self.notices);
        link.set_notice_sink(Some(Box::new(move |msg: &[u8]| {
            dispatcher.borrow_mut().process(msg);
        })));
        link.set_trace(self.trace.clone());
        link.set_verbosity(self.verbosity);

        if let Some(script) = sql::restore(self.session.channels(), self.session.vars()) {
            debug!(script = %script, "replaying session state");
            link.send_query(&script)?;
            while let Some(reply) = link.next_result()? {
                if let Err(e) = QueryResult::new(reply, "[RECONNECT]").check_status() {
                    warn!(error = %e, "replaying session state failed");
                }
            }
        }

        self.completed = true;
        if !self.is_open() {
            return Err(Error::ConnectionBroken(self.link_error()));
        }
        Ok(())
    }

    /// Close the physical link, keeping all logical state.
    ///
    /// Refused (with a notice) while reactivation avoidance debt exists.
    pub fn deactivate(&mut self) -> Result<()> {
        if self.link.is_none() {
            return Ok(());
        }
        if let Some(focus) = &self.transaction {
            return Err(Error::InvalidUsage(format!(
                "Attempt to deactivate connection while {} still open",
                focus.description
            )));
        }
        if self.avoidance.is_active() {
            warn!(debt = self.avoidance.get(), "refusing to deactivate");
            self.process_notice(
                b"Attempt to deactivate connection while it is in a state \
                  that cannot be fully recovered later (ignoring)\n",
            );
            return Ok(());
        }
        debug!("deactivating connection");
        self.completed = false;
        self.drop_link();
        Ok(())
    }

    /// Re-establish the link and replay the logical state.
    pub fn reset(&mut self) -> Result<()> {
        if self.inhibit_reactivation {
            return Err(Error::ReactivationInhibited(
                "Could not reset connection: reactivation is inhibited".into(),
            ));
        }
        if self.avoidance.is_active() {
            debug!(
                debt = self.avoidance.get(),
                "not resetting: reactivation avoidance in effect"
            );
            return Ok(());
        }
        if let Some(focus) = &self.transaction {
            return Err(Error::InvalidUsage(format!(
                "Attempt to reset connection while {} still open",
                focus.description
            )));
        }

        let link = self.link.take();
        self.link = self.policy.drop_connect(link);
        self.completed = false;
        if let Some(link) = self.link.as_mut() {
            debug!("resetting connection");
            link.reset();
            self.setup_state()
        } else {
            self.activate()
        }
    }

    /// Tear everything down. Never fails; problems become notices.
    pub fn close(&mut self) {
        self.completed = false;
        self.inhibit_reactivation = false;
        self.avoidance.clear();

        if let Some(focus) = &self.transaction {
            warn!(transaction = %focus.description, "closing with transaction open");
            let msg = format!("Closing connection while {} still open\n", focus.description);
            self.process_notice(msg.as_bytes());
        }
        if self.session.has_receivers() {
            warn!("closing with outstanding receivers");
            self.process_notice(b"Closing connection with outstanding receivers.\n");
            self.session.clear_receivers();
        }

        if let Some(link) = self.link.as_mut() {
            link.set_notice_sink(None);
        }
        self.notices.borrow_mut().unregister_all();
        self.drop_link();
    }

    /// Drop the link and pretend the failure is permanent.
    pub fn simulate_failure(&mut self) {
        if self.link.is_some() {
            self.drop_link();
            self.inhibit_reactivation = true;
        }
    }

    /// Forbid or allow implicit reconnects.
    pub fn inhibit_reactivation(&mut self, inhibit: bool) {
        self.inhibit_reactivation = inhibit;
    }

    fn drop_link(&mut self) {
        self.caps.clear();
        let link = self.link.take();
        self.link = self.policy.disconnect(link);
    }

    fn link_error(&self) -> String {
        match &self.link {
            Some(link) => {
                let msg = link.error_message();
                if msg.is_empty() {
                    "Connection to database failed".to_string()
                } else {
                    msg
                }
            }
            None => "No connection to database".to_string(),
        }
    }

    // ---- statements ----

    /// Execute a statement, resetting up to `retries` times when the link
    /// breaks before a reply arrives.
    ///
    /// A statement the server rejected is never retried.
    pub fn exec(&mut self, query: &str, retries: u32) -> Result<QueryResult> {
        self.activate()?;
        let mut retries = retries;
        let mut outcome = self.submit(query);
        while self.retry_decision(&outcome, retries) == Retry::Reset {
            retries -= 1;
            debug!(retries, "link failed during statement, resetting");
            self.reset()?;
            if self.is_open() {
                outcome = self.submit(query);
            }
        }
        let result = self.check_result(outcome, query)?;
        self.get_notifs()?;
        Ok(result)
    }

    fn submit(&mut self, query: &str) -> Result<Reply> {
        match self.link.as_mut() {
            Some(link) => link.exec(query),
            None => Err(Error::ConnectionBroken("No connection to database".into())),
        }
    }

    /// A transaction cannot survive a reset, so its statements are never
    /// retried.
    fn retry_decision(&self, outcome: &Result<Reply>, retries: u32) -> Retry {
        if retries > 0 && outcome.is_err() && !self.is_open() && self.transaction.is_none() {
            Retry::Reset
        } else {
            Retry::Stop
        }
    }

    /// The single place replies are turned into results or errors.
    fn check_result(&self, outcome: Result<Reply>, query: &str) -> Result<QueryResult> {
        if !self.is_open() {
            return Err(Error::ConnectionBroken(self.link_error()));
        }
        let reply = outcome.map_err(|e| {
            let msg = self.error_message();
            Error::Failure(if msg.is_empty() { e.to_string() } else { msg })
        })?;
        let result = self.make_result(reply, query);
        result.check_status()?;
        Ok(result)
    }

    /// Wrap a raw reply together with the statement that produced it.
    pub fn make_result(&self, reply: Reply, query: &str) -> QueryResult {
        QueryResult::new(reply, query)
    }

    /// Execute a one-off statement with `$n` text parameters.
    pub fn parameterized_exec(&mut self, query: &str, params: &[Option<&str>]) -> Result<QueryResult> {
        self.activate()?;
        let outcome = match self.link.as_mut() {
            Some(link) => link.exec_params(query, params),
            None => Err(Error::ConnectionBroken("No connection to database".into())),
        };
        let result = self.check_result(outcome, query)?;
        self.get_notifs()?;
        Ok(result)
    }

    /// Ask the server to abandon the statement running on this link.
    pub fn cancel_query(&self) -> Result<()> {
        match self.cancel_token() {
            Some(token) => token.cancel(),
            None => Err(Error::ConnectionBroken(
                "No connection to cancel a query on".into(),
            )),
        }
    }

    /// A token that cancels the running statement from another thread.
    pub fn cancel_token(&self) -> Option<<P::Link as Transport>::Cancel> {
        self.link.as_ref().and_then(|link| link.cancel_token())
    }

    // ---- prepared statements ----

    /// Define a named prepared statement.
    ///
    /// Redefining a name with different text is an error, except for the
    /// unnamed statement.
    pub fn prepare(&mut self, name: &str, definition: &str) -> Result<()> {
        self.prepared.declare(name, definition)
    }

    /// Define the unnamed prepared statement.
    pub fn prepare_unnamed(&mut self, definition: &str) -> Result<()> {
        self.prepare("", definition)
    }

    /// Register a declared statement on the current link if needed.
    pub fn prepare_now(&mut self, name: &str) -> Result<()> {
        self.activate()?;
        let def = self.prepared.lookup(name)?;
        if def.registered {
            return Ok(());
        }
        let definition = def.definition.clone();
        let outcome = match self.link.as_mut() {
            Some(link) => link.prepare(name, &definition),
            None => Err(Error::ConnectionBroken("No connection to database".into())),
        };
        self.check_result(outcome, &format!("[PREPARE {}]", name))?;
        self.prepared.set_registered(name);
        debug!(statement = name, "registered prepared statement");
        Ok(())
    }

    /// Execute a prepared statement with text parameters.
    pub fn prepared_exec(&mut self, name: &str, params: &[Option<&str>]) -> Result<QueryResult> {
        self.prepare_now(name)?;
        let outcome = match self.link.as_mut() {
            Some(link) => link.exec_prepared(name, params),
            None => Err(Error::ConnectionBroken("No connection to database".into())),
        };
        let result = self.check_result(outcome, &format!("[EXEC {}]", name))?;
        self.get_notifs()?;
        Ok(result)
    }

    /// Forget a prepared statement, deallocating it on the server first.
    ///
    /// Unknown names are ignored.
    pub fn unprepare(&mut self, name: &str) -> Result<()> {
        let registered = match self.prepared.lookup(name) {
            Ok(def) => def.registered,
            Err(_) => return Ok(()),
        };
        if registered {
            self.exec(&sql::deallocate(name), 0)?;
        }
        self.prepared.remove(name);
        Ok(())
    }

    /// Check if a statement of that name was declared.
    pub fn prepared_exists(&self, name: &str) -> bool {
        self.prepared.exists(name)
    }

    /// Text of a declared statement.
    pub fn prepared_definition(&self, name: &str) -> Result<&str> {
        self.prepared.lookup(name).map(|def| def.definition.as_str())
    }

    // ---- session state ----

    /// Set a session variable, remembering it for replay.
    ///
    /// Inside a transaction the setting only lasts as long as the transaction.
    pub fn set_variable(&mut self, name: &str, value: &str) -> Result<()> {
        if self.transaction.is_some() {
            self.exec(&sql::set(name, value), 0)?;
            if let Some(focus) = self.transaction.as_mut() {
                focus.vars.insert(name.to_string(), value.to_string());
            }
            return Ok(());
        }
        if self.is_open() {
            self.exec(&sql::set(name, value), 0)?;
        }
        self.session.set_var(name, value);
        Ok(())
    }

    /// Read a session variable, asking the server if it was never set here.
    pub fn get_variable(&mut self, name: &str) -> Result<String> {
        if let Some(value) = self.transaction.as_ref().and_then(|f| f.vars.get(name)) {
            return Ok(value.clone());
        }
        if let Some(value) = self.session.var(name) {
            return Ok(value.to_string());
        }
        let result = self.exec(&sql::show(name), 0)?;
        Ok(result.get(0, 0)?.unwrap_or_default().to_string())
    }

    /// Record session variables for replay without sending anything.
    pub fn add_variables<I, K, V>(&mut self, vars: I)
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in vars {
            self.session.set_var(name.as_ref(), value.as_ref());
        }
    }

    // ---- notifications ----

    /// Subscribe a listener to a channel.
    ///
    /// The first listener on a channel sends `LISTEN` if the connection is
    /// open. A broken link does not prevent registration; the subscription
    /// is replayed on the next connect.
    pub fn add_receiver<L: Listener + 'static>(&mut self, channel: &str, listener: L) -> Result<ReceiverId> {
        if channel.is_empty() {
            return Err(Error::InvalidArgument(
                "Receiver registered with empty channel name".into(),
            ));
        }
        if !self.session.is_listening(channel) && self.is_open() {
            let query = sql::listen(channel);
            let outcome = self.submit(&query);
            match self.check_result(outcome, &query) {
                Ok(_) | Err(Error::ConnectionBroken(_)) => {}
                Err(e) => return Err(e),
            }
        }
        let id = self.session.add_receiver(channel, Box::new(listener));
        debug!(channel, receiver = %id, "added receiver");
        Ok(id)
    }

    /// Unsubscribe a listener. Never fails; problems become notices.
    pub fn remove_receiver(&mut self, id: ReceiverId) {
        let Some(removed) = self.session.remove_receiver(id) else {
            let msg = format!("Attempt to remove unknown receiver {}\n", id);
            self.process_notice(msg.as_bytes());
            return;
        };
        debug!(channel = %removed.channel, receiver = %id, "removed receiver");
        if removed.last_on_channel && self.link.is_some() {
            if let Err(e) = self.exec(&sql::unlisten(&removed.channel), 0) {
                self.process_notice(e.to_string().as_bytes());
            }
        }
    }

    /// Deliver notifications the server already sent.
    ///
    /// Returns how many arrived. Nothing is delivered while a transaction is
    /// open; those notifications stay queued until it ends.
    pub fn get_notifs(&mut self) -> Result<usize> {
        if !self.is_open() {
            return Ok(0);
        }
        let Some(link) = self.link.as_mut() else {
            return Ok(0);
        };
        link.consume_input().map_err(Error::into_broken)?;
        if self.transaction.is_some() {
            return Ok(0);
        }

        let mut delivered = 0;
        while let Some(notification) = link.take_notification() {
            delivered += 1;
            for failure in self.session.deliver(&notification) {
                self.notices.borrow_mut().process(failure.as_bytes());
            }
        }
        Ok(delivered)
    }

    /// Block until at least one notification was delivered.
    pub fn await_notification(&mut self) -> Result<usize> {
        self.await_notification_inner(None)
    }

    /// Like [`await_notification`](Self::await_notification), giving up after
    /// `timeout`. Returns 0 if nothing arrived.
    pub fn await_notification_timeout(&mut self, timeout: Duration) -> Result<usize> {
        self.await_notification_inner(Some(timeout))
    }

    fn await_notification_inner(&mut self, timeout: Option<Duration>) -> Result<usize> {
        self.activate()?;
        let delivered = self.get_notifs()?;
        if delivered != 0 {
            return Ok(delivered);
        }
        self.wait(Readiness::Read, timeout)?;
        self.get_notifs()
    }

    // ---- readiness ----

    /// Block until the link has data to read.
    pub fn wait_read(&mut self) -> Result<()> {
        self.wait(Readiness::Read, None)
    }

    /// Block until the link has data to read or `timeout` passed.
    pub fn wait_read_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.wait(Readiness::Read, Some(timeout))
    }

    /// Block until the link accepts writes.
    pub fn wait_write(&mut self) -> Result<()> {
        self.wait(Readiness::Write, None)
    }

    fn wait(&mut self, direction: Readiness, timeout: Option<Duration>) -> Result<()> {
        match self.link.as_mut() {
            Some(link) => link.wait(direction, timeout),
            None => Err(Error::ConnectionBroken("No connection to wait on".into())),
        }
    }

    // ---- transactions ----

    /// Record `description` as the open transaction.
    ///
    /// Returns the id to pass to
    /// [`unregister_transaction`](Self::unregister_transaction).
    pub fn register_transaction(&mut self, description: &str) -> Result<u64> {
        if let Some(focus) = &self.transaction {
            return Err(Error::InvalidUsage(format!(
                "Started {} while {} still active",
                description, focus.description
            )));
        }
        self.unique_id += 1;
        self.transaction = Some(TransactionFocus::new(self.unique_id, description));
        Ok(self.unique_id)
    }

    /// Forget the open transaction.
    pub fn unregister_transaction(&mut self, id: u64) {
        match &self.transaction {
            Some(focus) if focus.id == id => self.transaction = None,
            Some(focus) => {
                let msg = format!(
                    "Attempt to end transaction {} while {} is the open one\n",
                    id, focus.description
                );
                self.process_notice(msg.as_bytes());
            }
            None => {
                let msg = format!("Attempt to end transaction {} while none is open\n", id);
                self.process_notice(msg.as_bytes());
            }
        }
    }

    /// Description of the open transaction, if any.
    pub fn transaction(&self) -> Option<&str> {
        self.transaction.as_ref().map(|f| f.description.as_str())
    }

    // ---- reactivation avoidance ----

    /// Current reactivation avoidance debt.
    pub fn reactivation_avoidance_count(&self) -> u32 {
        self.avoidance.get()
    }

    /// Adjust the reactivation avoidance debt.
    pub fn add_reactivation_avoidance_count(&mut self, n: i32) {
        self.avoidance.add(n);
    }

    /// Enter a state a reconnect could not restore.
    pub fn increment_debt(&mut self) {
        self.avoidance.add(1);
    }

    /// Leave a state a reconnect could not restore.
    pub fn decrement_debt(&mut self) {
        self.avoidance.add(-1);
    }

    /// Allow reactivation despite outstanding debt until the guard drops.
    pub fn exempt(&mut self) -> ReactivationExemption<'_, P> {
        ReactivationExemption::new(self)
    }

    // ---- notices ----

    /// Add an error handler. The newest handler sees notices first.
    pub fn register_error_handler<H: ErrorHandler + 'static>(&mut self, handler: H) -> HandlerId {
        self.notices.borrow_mut().register(Box::new(handler))
    }

    /// Remove an error handler, handing it back.
    pub fn unregister_error_handler(&mut self, id: HandlerId) -> Option<Box<dyn ErrorHandler>> {
        self.notices.borrow_mut().unregister(id)
    }

    /// Registered handlers, oldest first.
    pub fn errorhandlers(&self) -> Vec<HandlerId> {
        self.notices.borrow().ids()
    }

    /// Pass a message through the error handler chain.
    ///
    /// Long messages are split into chunks of at most
    /// [`NOTICE_CHUNK_SIZE`] bytes, each ending in a newline.
    ///
    /// Messages are expected in UTF-8 (the `client_encoding` this crate
    /// runs with); invalid sequences reach handlers as U+FFFD.
    pub fn process_notice(&self, message: &[u8]) {
        self.notices.borrow_mut().process(message);
    }

    /// Choose how server diagnostics are rendered.
    pub fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
        if let Some(link) = self.link.as_mut() {
            link.set_verbosity(verbosity);
        }
    }

    /// Send a log of protocol traffic to `sink`, or stop with `None`.
    pub fn trace(&mut self, sink: Option<TraceSink>) {
        self.trace = sink;
        if let Some(link) = self.link.as_mut() {
            link.set_trace(self.trace.clone());
        }
    }

    // ---- information ----

    /// Most recent error text of the link.
    pub fn error_message(&self) -> String {
        self.link
            .as_ref()
            .map(|link| link.error_message())
            .unwrap_or_default()
    }

    /// Process id of the server backend, 0 without a link.
    pub fn backend_pid(&self) -> u32 {
        self.link.as_ref().map_or(0, |link| link.backend_pid())
    }

    /// Raw socket of the link.
    pub fn socket(&self) -> Option<std::os::fd::RawFd> {
        self.link.as_ref().and_then(|link| link.socket())
    }

    /// Server version (e.g. 150004), 0 without a link.
    pub fn server_version(&self) -> i32 {
        self.link.as_ref().map_or(0, |link| link.server_version())
    }

    /// Protocol major version, 0 without a link.
    pub fn protocol_version(&self) -> i32 {
        self.link.as_ref().map_or(0, |link| link.protocol_version())
    }

    /// Capabilities of the current link.
    pub fn capabilities(&self) -> CapabilitySet {
        self.caps
    }

    /// Check a single capability of the current link.
    pub fn supports(&self, cap: Capability) -> bool {
        self.caps.supports(cap)
    }

    fn endpoint(&mut self) -> Result<Endpoint> {
        if self.link.is_none() {
            self.activate()?;
        }
        self.link
            .as_ref()
            .map(|link| link.endpoint())
            .ok_or_else(|| Error::ConnectionBroken("No connection to database".into()))
    }

    /// Database name, activating if there is no link.
    pub fn dbname(&mut self) -> Result<String> {
        self.endpoint().map(|e| e.dbname)
    }

    /// Role name, activating if there is no link.
    pub fn username(&mut self) -> Result<String> {
        self.endpoint().map(|e| e.user)
    }

    /// Host name or socket path, activating if there is no link.
    pub fn hostname(&mut self) -> Result<String> {
        self.endpoint().map(|e| e.host)
    }

    /// Port, activating if there is no link.
    pub fn port(&mut self) -> Result<String> {
        self.endpoint().map(|e| e.port)
    }

    /// Client encoding reported by the server.
    pub fn encoding_name(&mut self) -> Result<String> {
        self.activate()?;
        self.link
            .as_ref()
            .and_then(|link| link.server_param("client_encoding"))
            .map(str::to_string)
            .ok_or_else(|| Error::ConnectionBroken("No connection to database".into()))
    }

    /// Unique name for a server-side object (`x<n>` or `<name>_<n>`).
    pub fn adorn_name(&mut self, name: &str) -> String {
        self.unique_id += 1;
        if name.is_empty() {
            format!("x{}", self.unique_id)
        } else {
            format!("{}_{}", name, self.unique_id)
        }
    }

    // ---- escaping ----

    fn standard_strings(&mut self) -> Result<bool> {
        self.activate()?;
        Ok(self
            .link
            .as_ref()
            .and_then(|link| link.server_param("standard_conforming_strings"))
            .is_none_or(|v| v == "on"))
    }

    /// Escape text for use inside a single-quoted literal.
    pub fn esc(&mut self, text: &str) -> Result<String> {
        let standard = self.standard_strings()?;
        escape::escape_string(text, standard)
    }

    /// Quote text as a SQL literal.
    pub fn quote(&mut self, text: &str) -> Result<String> {
        Ok(format!("'{}'", self.esc(text)?))
    }

    /// Escape binary data for use inside a single-quoted literal.
    pub fn esc_raw(&mut self, data: &[u8]) -> Result<String> {
        let standard = self.standard_strings()?;
        Ok(escape::escape_bytea(data, standard))
    }

    /// Quote binary data as a bytea literal.
    pub fn quote_raw(&mut self, data: &[u8]) -> Result<String> {
        Ok(format!("'{}'::bytea", self.esc_raw(data)?))
    }

    /// Quote an identifier.
    pub fn quote_name(&self, identifier: &str) -> Result<String> {
        escape::quote_identifier(identifier)
    }

    /// Decode bytea text output.
    pub fn unesc_raw(&self, text: &str) -> Result<Vec<u8>> {
        escape::unescape_bytea(text)
    }

    pub(crate) fn serial(&self) -> u64 {
        self.serial
    }
}

impl<P: ConnectPolicy> Drop for Connection<P> {
    fn drop(&mut self) {
        self.close();
    }
}
