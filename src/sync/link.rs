//! Blocking wire-protocol link.

use std::collections::VecDeque;
use std::fmt::Display;
use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::time::Duration;

use tracing::{debug, trace, warn};

use crate::error::{Error, ErrorFields, Result};
use crate::opts::Opts;
use crate::protocol::backend::{
    CommandComplete, CopyResponse, DataRow, NotificationResponse, ParameterStatus, RawMessage,
    ReadyForQuery, RowDescription, msg_type, parse_fields,
};
use crate::protocol::frontend::{
    write_bind, write_copy_data, write_copy_done, write_copy_fail, write_describe_portal,
    write_execute, write_parse, write_query, write_sync, write_terminate,
};
use crate::protocol::types::TransactionStatus;
use crate::result::{Reply, ReplyStatus};
use crate::state::{Action, StartupStateMachine};
use crate::transport::{
    CopyChunk, CopyPut, Endpoint, LinkStatus, NoticeSink, Notification, Readiness, TraceSink,
    Transport, Verbosity,
};

use super::cancel::{CancelTarget, PgCancel};
use super::stream::Stream;

/// Pending COPY data is flushed once this much accumulated.
const COPY_FLUSH_THRESHOLD: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CopyDirection {
    In,
    Out,
}

/// Read a message from the stream: type byte, then the payload into `buf`.
fn read_message(stream: &mut Stream, buf: &mut Vec<u8>) -> io::Result<u8> {
    let mut type_byte = [0u8; 1];
    stream.read_exact(&mut type_byte)?;

    let mut length_bytes = [0u8; 4];
    stream.read_exact(&mut length_bytes)?;
    let length = u32::from_be_bytes(length_bytes);
    if length < 4 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Invalid message length: {}", length),
        ));
    }

    buf.clear();
    buf.resize((length - 4) as usize, 0);
    stream.read_exact(buf)?;
    Ok(type_byte[0])
}

fn unix_socket_path(opts: &Opts) -> Option<PathBuf> {
    if let Some(path) = &opts.socket {
        return Some(PathBuf::from(path));
    }
    // A host that looks like a directory names the socket directory.
    opts.host
        .starts_with('/')
        .then(|| PathBuf::from(format!("{}/.s.PGSQL.{}", opts.host, opts.port)))
}

fn connect_stream(opts: &Opts) -> Result<Stream> {
    if let Some(path) = unix_socket_path(opts) {
        return Ok(Stream::unix(UnixStream::connect(path)?));
    }
    if opts.host.is_empty() {
        return Err(Error::InvalidUsage("host is empty".into()));
    }

    let tcp = match opts.connect_timeout {
        None => TcpStream::connect((opts.host.as_str(), opts.port))?,
        Some(timeout) => {
            let mut last_error = None;
            let mut connected = None;
            for addr in (opts.host.as_str(), opts.port).to_socket_addrs()? {
                match TcpStream::connect_timeout(&addr, timeout) {
                    Ok(tcp) => {
                        connected = Some(tcp);
                        break;
                    }
                    Err(e) => last_error = Some(e),
                }
            }
            match (connected, last_error) {
                (Some(tcp), _) => tcp,
                (None, Some(e)) => return Err(e.into()),
                (None, None) => {
                    return Err(Error::Failure(format!(
                        "could not translate host name \"{}\" to address",
                        opts.host
                    )));
                }
            }
        }
    };
    tcp.set_nodelay(true)?;
    Ok(Stream::tcp(tcp))
}

/// Turn `server_version` text into the integer form (15.4 becomes 150004,
/// 9.6.24 becomes 90624).
fn parse_server_version(text: &str) -> i32 {
    let head = text.split_whitespace().next().unwrap_or_default();
    let nums: Vec<i32> = head
        .split('.')
        .map(|part| {
            part.chars()
                .take_while(|c| c.is_ascii_digit())
                .collect::<String>()
                .parse()
                .unwrap_or(0)
        })
        .collect();
    match nums.as_slice() {
        [] => 0,
        [major, rest @ ..] if *major >= 10 => major * 10_000 + rest.first().copied().unwrap_or(0),
        [major, minor, rest @ ..] => major * 10_000 + minor * 100 + rest.first().copied().unwrap_or(0),
        [major] => major * 10_000,
    }
}

/// One physical session with a PostgreSQL server over TCP, TLS or a Unix
/// socket.
///
/// All I/O blocks. Results are read in the simple query protocol for plain
/// statements and in the extended protocol (text format) for prepared and
/// parameterized ones.
pub struct PgLink {
    opts: Opts,
    stream: Option<Stream>,
    read_buffer: Vec<u8>,
    write_buffer: Vec<u8>,
    backend_key: Option<(u32, u32)>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    last_error: String,
    /// A request is in flight until its ReadyForQuery arrives.
    busy: bool,
    copy: Option<CopyDirection>,
    /// Reply seen while streaming COPY data, returned by the next `next_result`.
    stashed: Option<Reply>,
    notifications: VecDeque<Notification>,
    sink: Option<NoticeSink>,
    trace: Option<TraceSink>,
    verbosity: Verbosity,
}

impl PgLink {
    /// Connect and authenticate.
    pub fn open(opts: &Opts) -> Result<Self> {
        let mut link = Self {
            opts: opts.clone(),
            stream: None,
            read_buffer: Vec::with_capacity(8192),
            write_buffer: Vec::with_capacity(8192),
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            last_error: String::new(),
            busy: false,
            copy: None,
            stashed: None,
            notifications: VecDeque::new(),
            sink: None,
            trace: None,
            verbosity: Verbosity::default(),
        };
        link.establish()?;
        Ok(link)
    }

    /// Transaction status reported by the last ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    fn establish(&mut self) -> Result<()> {
        self.stream = None;
        self.busy = false;
        self.copy = None;
        self.stashed = None;

        let mut stream = connect_stream(&self.opts)?;
        let mut sm = StartupStateMachine::new(self.opts.clone(), cfg!(feature = "tls"));

        let expects_ssl_answer = match sm.start()? {
            Action::WriteAndReadByte(bytes) => {
                stream.write_all(bytes)?;
                stream.flush()?;
                true
            }
            Action::WriteAndReadMessage(bytes) => {
                stream.write_all(bytes)?;
                stream.flush()?;
                false
            }
            other => {
                return Err(Error::Protocol(format!(
                    "Unexpected initial action: {:?}",
                    other
                )));
            }
        };

        if expects_ssl_answer {
            let mut answer = [0u8; 1];
            stream.read_exact(&mut answer)?;
            let upgrade = match sm.process_ssl_response(answer[0])? {
                Action::TlsHandshake => true,
                Action::WriteAndReadMessage(bytes) => {
                    stream.write_all(bytes)?;
                    stream.flush()?;
                    false
                }
                other => {
                    return Err(Error::Protocol(format!(
                        "Unexpected action after SSL response: {:?}",
                        other
                    )));
                }
            };
            if upgrade {
                stream = stream.upgrade_to_tls(&self.opts.host)?;
                if let Action::WriteAndReadMessage(bytes) = sm.tls_established() {
                    stream.write_all(bytes)?;
                    stream.flush()?;
                }
            }
        }

        let mut buf = Vec::new();
        loop {
            let type_byte = read_message(&mut stream, &mut buf)?;
            self.trace_in(type_byte, buf.len());
            match sm.step(RawMessage::new(type_byte, &buf))? {
                Action::ReadMessage => {}
                Action::WriteAndReadMessage(bytes) => {
                    stream.write_all(bytes)?;
                    stream.flush()?;
                }
                Action::Notice(fields) => self.emit_notice(&fields),
                Action::Finished => break,
                other => {
                    return Err(Error::Protocol(format!(
                        "Unexpected action during startup: {:?}",
                        other
                    )));
                }
            }
        }

        self.backend_key = sm.backend_key();
        self.server_params = sm.take_server_params();
        self.transaction_status = sm.transaction_status();
        self.last_error.clear();
        self.stream = Some(stream);
        debug!(
            pid = self.backend_key.map(|(pid, _)| pid).unwrap_or_default(),
            "link established"
        );
        Ok(())
    }

    /// Mark the link dead.
    fn lose(&mut self, why: impl Display) {
        self.last_error = why.to_string();
        warn!(error = %self.last_error, "link lost");
        self.stream = None;
        self.busy = false;
        self.copy = None;
    }

    fn fail(&mut self, why: impl Display) -> Error {
        self.lose(why);
        Error::ConnectionBroken(self.last_error.clone())
    }

    /// Anything that leaves the protocol out of step kills the link.
    fn fatal(&mut self, e: Error) -> Error {
        match e {
            Error::ConnectionBroken(_) => e,
            other => self.fail(other),
        }
    }

    fn broken(&self) -> Error {
        if self.last_error.is_empty() {
            Error::ConnectionBroken("no connection to the server".into())
        } else {
            Error::ConnectionBroken(self.last_error.clone())
        }
    }

    fn send_buffered(&mut self) -> Result<()> {
        self.trace_out();
        let outcome = match self.stream.as_mut() {
            Some(stream) => stream
                .write_all(&self.write_buffer)
                .and_then(|()| stream.flush()),
            None => {
                self.write_buffer.clear();
                return Err(self.broken());
            }
        };
        self.write_buffer.clear();
        outcome.map_err(|e| self.fail(e))
    }

    fn read(&mut self) -> Result<u8> {
        let outcome = match self.stream.as_mut() {
            Some(stream) => read_message(stream, &mut self.read_buffer),
            None => return Err(self.broken()),
        };
        match outcome {
            Ok(type_byte) => {
                trace!(message = %(type_byte as char), len = self.read_buffer.len(), "received");
                self.trace_in(type_byte, self.read_buffer.len());
                Ok(type_byte)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Handle a message that may arrive at any time; false if it is not one.
    fn handle_async(&mut self, type_byte: u8) -> Result<bool> {
        match type_byte {
            msg_type::NOTICE_RESPONSE => {
                let fields = parse_fields(&self.read_buffer)?;
                self.emit_notice(&fields);
            }
            msg_type::NOTIFICATION_RESPONSE => {
                let n = NotificationResponse::parse(&self.read_buffer)?;
                let notification = Notification {
                    channel: n.channel.to_string(),
                    payload: n.payload.to_string(),
                    pid: n.pid,
                };
                trace!(channel = %notification.channel, "notification buffered");
                self.notifications.push_back(notification);
            }
            msg_type::PARAMETER_STATUS => {
                let param = ParameterStatus::parse(&self.read_buffer)?;
                let (name, value) = (param.name.to_string(), param.value.to_string());
                match self.server_params.iter_mut().find(|(n, _)| *n == name) {
                    Some(entry) => entry.1 = value,
                    None => self.server_params.push((name, value)),
                }
            }
            _ => return Ok(false),
        }
        Ok(true)
    }

    fn emit_notice(&mut self, fields: &ErrorFields) {
        let text = fields.render(self.verbosity);
        match self.sink.as_mut() {
            Some(sink) => sink(text.as_bytes()),
            None => debug!(notice = %text.trim_end(), "server notice"),
        }
    }

    fn trace_in(&self, type_byte: u8, len: usize) {
        if let Some(trace) = &self.trace {
            let mut out = trace.borrow_mut();
            let _ = writeln!(out, "From backend> {} ({} bytes)", type_byte as char, len + 4);
        }
    }

    fn trace_out(&self) {
        let Some(trace) = &self.trace else { return };
        let mut out = trace.borrow_mut();
        let mut rest = self.write_buffer.as_slice();
        while let [type_byte, a, b, c, d, tail @ ..] = rest {
            let len = i32::from_be_bytes([*a, *b, *c, *d]).max(4) as usize;
            let body = tail.get(..len - 4).unwrap_or(tail);
            if *type_byte == b'Q' {
                let sql = String::from_utf8_lossy(body.strip_suffix(&[0]).unwrap_or(body));
                let _ = writeln!(out, "To backend> Q \"{}\"", sql);
            } else {
                let _ = writeln!(out, "To backend> {} ({} bytes)", *type_byte as char, len);
            }
            rest = tail.get(len - 4..).unwrap_or_default();
        }
    }

    /// Get rid of whatever an earlier request left behind.
    fn begin_request(&mut self) -> Result<()> {
        if self.stream.is_none() {
            return Err(self.broken());
        }
        if self.copy.is_some() {
            self.abort_copy();
        }
        self.stashed = None;
        while self.busy && self.copy.is_none() {
            self.next_result()?;
        }
        Ok(())
    }

    fn read_reply(&mut self) -> Result<Option<Reply>> {
        if let Some(reply) = self.stashed.take() {
            return Ok(Some(reply));
        }
        if !self.busy || self.copy.is_some() {
            return Ok(None);
        }

        let mut partial: Option<Reply> = None;
        loop {
            let type_byte = self.read()?;
            if self.handle_async(type_byte)? {
                continue;
            }
            match type_byte {
                msg_type::ROW_DESCRIPTION => {
                    let desc = RowDescription::parse(&self.read_buffer)?;
                    let mut reply = Reply::new(ReplyStatus::TuplesOk);
                    reply.columns = desc.names.iter().map(|name| name.to_string()).collect();
                    partial = Some(reply);
                }
                msg_type::DATA_ROW => {
                    let row = DataRow::parse(&self.read_buffer)?;
                    match partial.as_mut() {
                        Some(reply) => reply.rows.push(row.values),
                        None => {
                            return Err(Error::Protocol(
                                "DataRow without RowDescription".into(),
                            ));
                        }
                    }
                }
                msg_type::COMMAND_COMPLETE => {
                    let tag = CommandComplete::parse(&self.read_buffer)?.tag.to_string();
                    let mut reply =
                        partial.unwrap_or_else(|| Reply::new(ReplyStatus::CommandOk));
                    reply.tag = Some(tag);
                    return Ok(Some(reply));
                }
                msg_type::EMPTY_QUERY_RESPONSE => {
                    return Ok(Some(Reply::new(ReplyStatus::EmptyQuery)));
                }
                msg_type::ERROR_RESPONSE => {
                    return Ok(Some(Reply::error(parse_fields(&self.read_buffer)?)));
                }
                msg_type::COPY_IN_RESPONSE | msg_type::COPY_OUT_RESPONSE => {
                    let response = CopyResponse::parse(&self.read_buffer)?;
                    if response.binary {
                        debug!("binary COPY; lines are passed through untouched");
                    }
                    let (direction, status) = if type_byte == msg_type::COPY_IN_RESPONSE {
                        (CopyDirection::In, ReplyStatus::CopyIn)
                    } else {
                        (CopyDirection::Out, ReplyStatus::CopyOut)
                    };
                    self.copy = Some(direction);
                    return Ok(Some(Reply::new(status)));
                }
                msg_type::READY_FOR_QUERY => {
                    let ready = ReadyForQuery::parse(&self.read_buffer)?;
                    self.transaction_status = ready.transaction_status().unwrap_or_default();
                    self.busy = false;
                    return Ok(None);
                }
                msg_type::PARSE_COMPLETE | msg_type::BIND_COMPLETE | msg_type::NO_DATA => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "Unexpected message '{}' in reply",
                        other as char
                    )));
                }
            }
        }
    }

    /// Read a whole request's replies, keeping the first error or else the
    /// last reply. A COPY reply ends the request early.
    fn collect(&mut self) -> Result<Option<Reply>> {
        let mut outcome: Option<Reply> = None;
        while let Some(reply) = self.next_result()? {
            if matches!(reply.status, ReplyStatus::CopyIn | ReplyStatus::CopyOut) {
                return Ok(Some(reply));
            }
            if !outcome.as_ref().is_some_and(Reply::is_error) {
                outcome = Some(reply);
            }
        }
        Ok(outcome)
    }

    fn submit_extended(&mut self) -> Result<Reply> {
        write_describe_portal(&mut self.write_buffer);
        write_execute(&mut self.write_buffer);
        write_sync(&mut self.write_buffer);
        self.send_buffered()?;
        self.busy = true;
        self.collect()?
            .ok_or_else(|| self.fail("server sent no reply"))
    }

    fn cancel_target(&self) -> CancelTarget {
        match unix_socket_path(&self.opts) {
            Some(path) => CancelTarget::Unix(path),
            None => CancelTarget::Tcp(self.opts.host.clone(), self.opts.port),
        }
    }
}

impl Transport for PgLink {
    type Cancel = PgCancel;

    fn status(&self) -> LinkStatus {
        match self.stream {
            Some(_) => LinkStatus::Ok,
            None => LinkStatus::Bad,
        }
    }

    fn error_message(&self) -> String {
        self.last_error.clone()
    }

    fn server_version(&self) -> i32 {
        self.server_param("server_version")
            .map(parse_server_version)
            .unwrap_or_default()
    }

    fn protocol_version(&self) -> i32 {
        match self.stream {
            Some(_) => 3,
            None => 0,
        }
    }

    fn backend_pid(&self) -> u32 {
        self.backend_key.map(|(pid, _)| pid).unwrap_or_default()
    }

    fn endpoint(&self) -> Endpoint {
        let host = match &self.opts.socket {
            Some(path) => path.clone(),
            None => self.opts.host.clone(),
        };
        Endpoint {
            dbname: self
                .opts
                .database
                .clone()
                .unwrap_or_else(|| self.opts.user.clone()),
            user: self.opts.user.clone(),
            host,
            port: self.opts.port.to_string(),
        }
    }

    fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    fn reset(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let mut bye = Vec::new();
            write_terminate(&mut bye);
            let _ = stream.write_all(&bye);
            let _ = stream.flush();
        }
        if let Err(e) = self.establish() {
            self.lose(e);
        }
    }

    fn exec(&mut self, sql: &str) -> Result<Reply> {
        self.send_query(sql)?;
        self.collect()?.ok_or_else(|| self.fail("server sent no reply"))
    }

    fn send_query(&mut self, sql: &str) -> Result<()> {
        self.begin_request()?;
        write_query(&mut self.write_buffer, sql);
        self.send_buffered()?;
        self.busy = true;
        Ok(())
    }

    fn next_result(&mut self) -> Result<Option<Reply>> {
        self.read_reply().map_err(|e| self.fatal(e))
    }

    fn prepare(&mut self, name: &str, definition: &str) -> Result<Reply> {
        self.begin_request()?;
        write_parse(&mut self.write_buffer, name, definition);
        write_sync(&mut self.write_buffer);
        self.send_buffered()?;
        self.busy = true;
        Ok(self
            .collect()?
            .unwrap_or_else(|| Reply::new(ReplyStatus::CommandOk)))
    }

    fn exec_prepared(&mut self, name: &str, params: &[Option<&str>]) -> Result<Reply> {
        self.begin_request()?;
        write_bind(&mut self.write_buffer, name, params);
        self.submit_extended()
    }

    fn exec_params(&mut self, sql: &str, params: &[Option<&str>]) -> Result<Reply> {
        self.begin_request()?;
        write_parse(&mut self.write_buffer, "", sql);
        write_bind(&mut self.write_buffer, "", params);
        self.submit_extended()
    }

    fn consume_input(&mut self) -> Result<()> {
        // Messages of a request in flight or a COPY belong to their reader.
        if self.busy || self.copy.is_some() {
            return Ok(());
        }
        loop {
            let readable = match self.stream.as_mut() {
                Some(stream) => stream.poll_readable(),
                None => return Err(self.broken()),
            };
            match readable {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(e) => return Err(self.fail(e)),
            }
            let type_byte = self.read()?;
            let handled = self.handle_async(type_byte).map_err(|e| self.fatal(e))?;
            if !handled {
                warn!(
                    message = %(type_byte as char),
                    "ignoring unexpected message outside a request"
                );
            }
        }
    }

    fn take_notification(&mut self) -> Option<Notification> {
        self.notifications.pop_front()
    }

    fn get_copy_data(&mut self) -> CopyChunk {
        if self.copy != Some(CopyDirection::Out) {
            self.last_error = "no COPY TO STDOUT in progress".into();
            return CopyChunk::Failed;
        }
        loop {
            let Ok(type_byte) = self.read() else {
                return CopyChunk::Failed;
            };
            match self.handle_async(type_byte) {
                Ok(true) => continue,
                Ok(false) => {}
                Err(e) => {
                    self.lose(e);
                    return CopyChunk::Failed;
                }
            }
            match type_byte {
                msg_type::COPY_DATA => return CopyChunk::Row(std::mem::take(&mut self.read_buffer)),
                msg_type::COPY_DONE => {
                    self.copy = None;
                    return CopyChunk::Done;
                }
                msg_type::ERROR_RESPONSE => {
                    self.copy = None;
                    match parse_fields(&self.read_buffer) {
                        Ok(fields) => self.stashed = Some(Reply::error(fields)),
                        Err(e) => {
                            self.lose(e);
                            return CopyChunk::Failed;
                        }
                    }
                    return CopyChunk::Done;
                }
                other => {
                    self.lose(format!("Unexpected message '{}' during COPY", other as char));
                    return CopyChunk::Failed;
                }
            }
        }
    }

    fn put_copy_data(&mut self, data: &[u8]) -> CopyPut {
        if self.copy != Some(CopyDirection::In) || self.stream.is_none() {
            if self.stream.is_some() {
                self.last_error = "no COPY FROM STDIN in progress".into();
            }
            return CopyPut::Failed;
        }
        write_copy_data(&mut self.write_buffer, data);
        if self.write_buffer.len() >= COPY_FLUSH_THRESHOLD && self.send_buffered().is_err() {
            return CopyPut::Failed;
        }
        CopyPut::Sent
    }

    fn put_copy_end(&mut self, error: Option<&str>) -> CopyPut {
        if self.copy != Some(CopyDirection::In) || self.stream.is_none() {
            if self.stream.is_some() {
                self.last_error = "no COPY FROM STDIN in progress".into();
            }
            return CopyPut::Failed;
        }
        match error {
            Some(reason) => write_copy_fail(&mut self.write_buffer, reason),
            None => write_copy_done(&mut self.write_buffer),
        }
        self.copy = None;
        match self.send_buffered() {
            Ok(()) => CopyPut::Sent,
            Err(_) => CopyPut::Failed,
        }
    }

    fn abort_copy(&mut self) {
        if self.copy == Some(CopyDirection::In) {
            write_copy_fail(&mut self.write_buffer, "COPY aborted by client");
            self.copy = None;
            if self.send_buffered().is_err() {
                return;
            }
        }
        self.copy = None;
        self.stashed = None;
        self.write_buffer.clear();

        while self.busy {
            let Ok(type_byte) = self.read() else {
                return;
            };
            if type_byte == msg_type::READY_FOR_QUERY {
                if let Ok(ready) = ReadyForQuery::parse(&self.read_buffer) {
                    self.transaction_status = ready.transaction_status().unwrap_or_default();
                }
                self.busy = false;
            } else if let Err(e) = self.handle_async(type_byte) {
                self.lose(e);
            }
        }
    }

    fn cancel_token(&self) -> Option<PgCancel> {
        self.backend_key
            .map(|(pid, secret)| PgCancel::new(self.cancel_target(), pid, secret))
    }

    fn set_notice_sink(&mut self, sink: Option<NoticeSink>) {
        self.sink = sink;
    }

    fn set_trace(&mut self, sink: Option<TraceSink>) {
        self.trace = sink;
    }

    fn set_verbosity(&mut self, verbosity: Verbosity) {
        self.verbosity = verbosity;
    }

    fn wait(&mut self, direction: Readiness, timeout: Option<Duration>) -> Result<()> {
        let outcome = match (self.stream.as_mut(), direction) {
            (None, _) => return Err(self.broken()),
            // Sockets are blocking; a write waits on its own.
            (Some(_), Readiness::Write) => return Ok(()),
            (Some(stream), Readiness::Read) => stream.wait_readable(timeout),
        };
        outcome.map(drop).map_err(|e| self.fail(e))
    }

    fn socket(&self) -> Option<std::os::fd::RawFd> {
        self.stream.as_ref().map(Stream::as_raw_fd)
    }
}

impl Drop for PgLink {
    fn drop(&mut self) {
        if let Some(stream) = self.stream.as_mut() {
            self.write_buffer.clear();
            write_terminate(&mut self.write_buffer);
            let _ = stream.write_all(&self.write_buffer);
            let _ = stream.flush();
        }
    }
}
