//! Scripted in-memory transport for exercising `Connection`.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::Connection;
use crate::error::{Error, ErrorFields, Result};
use crate::policy::{Connector, Direct, Lazy};
use crate::result::{Reply, ReplyStatus};
use crate::transport::{
    CancelToken, CopyChunk, CopyPut, Endpoint, LinkStatus, NoticeSink, Notification, Readiness,
    TraceSink, Transport, Verbosity,
};

/// Server-side state shared by every link of one test.
pub(crate) struct MockServer {
    /// Requests in arrival order.
    pub(crate) log: Vec<String>,
    pub(crate) connects: usize,
    pub(crate) resets: usize,
    /// Upcoming `exec` calls that lose the link instead of answering.
    pub(crate) fail_execs: usize,
    pub(crate) refuse_connect: bool,
    /// Links come back from `reset` already broken.
    pub(crate) break_on_reset: bool,
    /// COPY TO STDOUT reads report `Pending`.
    pub(crate) copy_read_pending: bool,
    /// Forced outcome of the next `put_copy_end`.
    pub(crate) copy_end: Option<CopyPut>,
    pub(crate) server_version: i32,
    /// Notices emitted during the next statement.
    pub(crate) notices: Vec<String>,
    /// Rows of the single table COPY talks to.
    pub(crate) table: Vec<String>,
    queued: VecDeque<Notification>,
    on_wait: VecDeque<Notification>,
    generation: u32,
    live: usize,
    cancels: Arc<AtomicUsize>,
}

impl MockServer {
    fn new() -> Self {
        Self {
            log: Vec::new(),
            connects: 0,
            resets: 0,
            fail_execs: 0,
            refuse_connect: false,
            break_on_reset: false,
            copy_read_pending: false,
            copy_end: None,
            server_version: 150_004,
            notices: Vec::new(),
            table: Vec::new(),
            queued: VecDeque::new(),
            on_wait: VecDeque::new(),
            generation: 0,
            live: 0,
            cancels: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of logged requests containing `needle`.
    pub(crate) fn count(&self, needle: &str) -> usize {
        self.log.iter().filter(|entry| entry.contains(needle)).count()
    }

    /// Break every existing link.
    pub(crate) fn kill(&mut self) {
        self.generation += 1;
    }

    pub(crate) fn notify(&mut self, channel: &str, payload: &str) {
        self.queued.push_back(notification(channel, payload));
    }

    /// Queue a notification that shows up only once somebody waits.
    pub(crate) fn arrive_on_wait(&mut self, channel: &str, payload: &str) {
        self.on_wait.push_back(notification(channel, payload));
    }

    pub(crate) fn live_links(&self) -> usize {
        self.live
    }

    pub(crate) fn cancels(&self) -> usize {
        self.cancels.load(Ordering::SeqCst)
    }
}

fn notification(channel: &str, payload: &str) -> Notification {
    Notification {
        channel: channel.to_string(),
        payload: payload.to_string(),
        pid: 4242,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyMode {
    Out(usize),
    In,
}

pub(crate) struct MockLink {
    server: Rc<RefCell<MockServer>>,
    generation: u32,
    lost: bool,
    pending: VecDeque<Reply>,
    copy: Option<CopyMode>,
    staged: Vec<u8>,
    sink: Option<NoticeSink>,
}

impl MockLink {
    fn log(&self, entry: impl Into<String>) {
        self.server.borrow_mut().log.push(entry.into());
    }

    fn emit_notices(&mut self) {
        let notices = std::mem::take(&mut self.server.borrow_mut().notices);
        if let Some(sink) = self.sink.as_mut() {
            for notice in notices {
                sink(notice.as_bytes());
            }
        }
    }

    fn answer(&mut self, sql: &str) -> Reply {
        if sql.starts_with("FAIL") {
            return Reply::error(ErrorFields::new("ERROR", "syntax error at or near \"FAIL\""));
        }
        if let Some(name) = sql.strip_prefix("SHOW ") {
            return Reply::single_column(name, &["UTC"]);
        }
        if sql.starts_with("COPY") && sql.ends_with("TO STDOUT") {
            self.copy = Some(CopyMode::Out(0));
            return Reply::new(ReplyStatus::CopyOut);
        }
        if sql.starts_with("COPY") && sql.ends_with("FROM STDIN") {
            self.copy = Some(CopyMode::In);
            self.staged.clear();
            return Reply::new(ReplyStatus::CopyIn);
        }
        let verb = sql.split_whitespace().next().unwrap_or_default();
        Reply::command(&verb.to_ascii_uppercase())
    }
}

impl Drop for MockLink {
    fn drop(&mut self) {
        self.server.borrow_mut().live -= 1;
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MockCancel(Arc<AtomicUsize>);

impl CancelToken for MockCancel {
    fn cancel(&self) -> Result<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl Transport for MockLink {
    type Cancel = MockCancel;

    fn status(&self) -> LinkStatus {
        if self.lost || self.generation != self.server.borrow().generation {
            LinkStatus::Bad
        } else {
            LinkStatus::Ok
        }
    }

    fn error_message(&self) -> String {
        match self.status() {
            LinkStatus::Bad => "server closed the connection unexpectedly".to_string(),
            LinkStatus::Ok => String::new(),
        }
    }

    fn server_version(&self) -> i32 {
        self.server.borrow().server_version
    }

    fn protocol_version(&self) -> i32 {
        3
    }

    fn backend_pid(&self) -> u32 {
        4242
    }

    fn endpoint(&self) -> Endpoint {
        Endpoint {
            dbname: "mockdb".into(),
            user: "mock".into(),
            host: "localhost".into(),
            port: "5432".into(),
        }
    }

    fn server_param(&self, name: &str) -> Option<&str> {
        match name {
            "client_encoding" => Some("UTF8"),
            "standard_conforming_strings" => Some("on"),
            _ => None,
        }
    }

    fn reset(&mut self) {
        self.log("reset");
        let mut server = self.server.borrow_mut();
        server.resets += 1;
        self.generation = server.generation;
        self.lost = server.break_on_reset;
        self.pending.clear();
        self.copy = None;
    }

    fn exec(&mut self, sql: &str) -> Result<Reply> {
        self.log(sql);
        {
            let mut server = self.server.borrow_mut();
            if server.fail_execs > 0 {
                server.fail_execs -= 1;
                self.lost = true;
                return Err(Error::ConnectionBroken(
                    "server closed the connection unexpectedly".into(),
                ));
            }
        }
        if self.status() == LinkStatus::Bad {
            return Err(Error::ConnectionBroken("link is gone".into()));
        }
        self.emit_notices();
        Ok(self.answer(sql))
    }

    fn send_query(&mut self, sql: &str) -> Result<()> {
        self.log(format!("send:{}", sql));
        for statement in sql.split("; ").filter(|s| !s.trim().is_empty()) {
            let reply = self.answer(statement);
            self.pending.push_back(reply);
        }
        Ok(())
    }

    fn next_result(&mut self) -> Result<Option<Reply>> {
        Ok(self.pending.pop_front())
    }

    fn prepare(&mut self, name: &str, definition: &str) -> Result<Reply> {
        self.log(format!("prepare:{}", name));
        if definition.starts_with("FAIL") {
            return Ok(self.answer(definition));
        }
        Ok(Reply::command("PREPARE"))
    }

    fn exec_prepared(&mut self, name: &str, params: &[Option<&str>]) -> Result<Reply> {
        self.log(format!("exec_prepared {}", name));
        let values: Vec<&str> = params.iter().map(|p| p.unwrap_or("")).collect();
        Ok(Reply::single_column("?column?", &values))
    }

    fn exec_params(&mut self, sql: &str, params: &[Option<&str>]) -> Result<Reply> {
        self.log(format!("exec_params:{}", sql));
        let values: Vec<&str> = params.iter().map(|p| p.unwrap_or("")).collect();
        Ok(Reply::single_column("?column?", &values))
    }

    fn consume_input(&mut self) -> Result<()> {
        match self.status() {
            LinkStatus::Ok => Ok(()),
            LinkStatus::Bad => Err(Error::ConnectionBroken("link is gone".into())),
        }
    }

    fn take_notification(&mut self) -> Option<Notification> {
        self.server.borrow_mut().queued.pop_front()
    }

    fn get_copy_data(&mut self) -> CopyChunk {
        self.log("get_copy_data");
        let Some(CopyMode::Out(row)) = self.copy else {
            return CopyChunk::Failed;
        };
        if self.server.borrow().copy_read_pending {
            return CopyChunk::Pending;
        }
        let line = self.server.borrow().table.get(row).cloned();
        match line {
            Some(line) => {
                self.copy = Some(CopyMode::Out(row + 1));
                CopyChunk::Row(format!("{}\n", line).into_bytes())
            }
            None => {
                self.copy = None;
                self.pending.push_back(Reply::command(&format!("COPY {}", row)));
                CopyChunk::Done
            }
        }
    }

    fn put_copy_data(&mut self, data: &[u8]) -> CopyPut {
        if self.copy != Some(CopyMode::In) {
            return CopyPut::Failed;
        }
        self.staged.extend_from_slice(data);
        CopyPut::Sent
    }

    fn put_copy_end(&mut self, error: Option<&str>) -> CopyPut {
        if self.copy != Some(CopyMode::In) {
            return CopyPut::Failed;
        }
        if let Some(forced) = self.server.borrow_mut().copy_end.take() {
            return forced;
        }
        self.copy = None;
        let reply = match error {
            Some(reason) => Reply::error(ErrorFields::new("ERROR", format!("COPY from stdin failed: {}", reason))),
            None => {
                let text = String::from_utf8_lossy(&self.staged).into_owned();
                let rows: Vec<String> = text.lines().map(str::to_string).collect();
                let tag = format!("COPY {}", rows.len());
                self.server.borrow_mut().table = rows;
                Reply::command(&tag)
            }
        };
        self.staged.clear();
        self.pending.push_back(reply);
        CopyPut::Sent
    }

    fn abort_copy(&mut self) {
        self.log("abort_copy");
        self.copy = None;
        self.staged.clear();
        self.pending.clear();
    }

    fn cancel_token(&self) -> Option<MockCancel> {
        Some(MockCancel(Arc::clone(&self.server.borrow().cancels)))
    }

    fn set_notice_sink(&mut self, sink: Option<NoticeSink>) {
        self.sink = sink;
    }

    fn set_trace(&mut self, _sink: Option<TraceSink>) {}

    fn set_verbosity(&mut self, _verbosity: Verbosity) {}

    fn wait(&mut self, _direction: Readiness, _timeout: Option<Duration>) -> Result<()> {
        self.log("wait");
        let mut server = self.server.borrow_mut();
        while let Some(n) = server.on_wait.pop_front() {
            server.queued.push_back(n);
        }
        Ok(())
    }

    fn socket(&self) -> Option<std::os::fd::RawFd> {
        None
    }
}

pub(crate) struct MockConnector {
    server: Rc<RefCell<MockServer>>,
}

impl Connector for MockConnector {
    type Link = MockLink;

    fn connect(&mut self) -> Result<MockLink> {
        let mut server = self.server.borrow_mut();
        if server.refuse_connect {
            return Err(Error::Failure("connection refused".into()));
        }
        server.connects += 1;
        server.live += 1;
        Ok(MockLink {
            server: Rc::clone(&self.server),
            generation: server.generation,
            lost: false,
            pending: VecDeque::new(),
            copy: None,
            staged: Vec::new(),
            sink: None,
        })
    }
}

fn connector() -> (MockConnector, Rc<RefCell<MockServer>>) {
    let server = Rc::new(RefCell::new(MockServer::new()));
    (
        MockConnector {
            server: Rc::clone(&server),
        },
        server,
    )
}

/// An eagerly connected connection and its server.
pub(crate) fn direct() -> (Connection<Direct<MockConnector>>, Rc<RefCell<MockServer>>) {
    let (connector, server) = connector();
    let conn = Connection::new(Direct::new(connector)).unwrap();
    (conn, server)
}

/// A connection that has not reached its server yet.
pub(crate) fn lazy() -> (Connection<Lazy<MockConnector>>, Rc<RefCell<MockServer>>) {
    let (connector, server) = connector();
    let conn = Connection::new(Lazy::new(connector)).unwrap();
    (conn, server)
}
