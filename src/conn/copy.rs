//! Line-oriented COPY streaming.
//!
//! A COPY in progress cannot be resumed on a new link, so both session
//! guards hold reactivation avoidance debt for as long as they live.

use tracing::debug;

use super::Connection;
use crate::error::{Error, Result};
use crate::policy::ConnectPolicy;
use crate::result::{QueryResult, ReplyStatus};
use crate::transport::{CopyChunk, CopyPut, Transport};

impl<P: ConnectPolicy> Connection<P> {
    /// Read one line of a COPY TO STDOUT stream, without its newline.
    ///
    /// Returns `None` once the stream ended and its final result checked out.
    pub fn read_copy_line(&mut self) -> Result<Option<String>> {
        if !self.is_open() {
            return Err(Error::Internal("read_copy_line() without connection".into()));
        }
        let Some(link) = self.link.as_mut() else {
            return Err(Error::Internal("read_copy_line() without connection".into()));
        };

        match link.get_copy_data() {
            CopyChunk::Row(mut line) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                String::from_utf8(line)
                    .map(Some)
                    .map_err(|e| Error::Protocol(format!("Invalid UTF-8 in table data: {}", e)))
            }
            CopyChunk::Done => {
                while let Some(reply) = link.next_result()? {
                    QueryResult::new(reply, "[END COPY]").check_status()?;
                }
                Ok(None)
            }
            CopyChunk::Failed => Err(Error::Failure(format!(
                "Reading of table data failed: {}",
                link.error_message()
            ))),
            CopyChunk::Pending => Err(Error::Internal(
                "table read inexplicably went asynchronous".into(),
            )),
        }
    }

    /// Write one line to a COPY FROM STDIN stream. The newline is added here.
    ///
    /// A failed write aborts the stream.
    pub fn write_copy_line(&mut self, line: &str) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Internal("write_copy_line() without connection".into()));
        }
        let Some(link) = self.link.as_mut() else {
            return Err(Error::Internal("write_copy_line() without connection".into()));
        };

        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        match link.put_copy_data(&data) {
            CopyPut::Sent => Ok(()),
            CopyPut::Pending | CopyPut::Failed => {
                let msg = format!("Error writing to table: {}", link.error_message());
                link.abort_copy();
                Err(Error::Failure(msg))
            }
        }
    }

    /// Finish a COPY FROM STDIN stream and check its result.
    pub fn end_copy_write(&mut self) -> Result<()> {
        let Some(link) = self.link.as_mut() else {
            return Err(Error::Internal("end_copy_write() without connection".into()));
        };

        match link.put_copy_end(None) {
            CopyPut::Sent => {}
            CopyPut::Pending => {
                return Err(Error::Internal(
                    "table write is inexplicably asynchronous".into(),
                ));
            }
            CopyPut::Failed => {
                return Err(Error::Failure(format!(
                    "Write to table failed: {}",
                    link.error_message()
                )));
            }
        }

        let outcome = match link.next_result() {
            Ok(Some(reply)) => {
                while link.next_result()?.is_some() {}
                Ok(reply)
            }
            Ok(None) => Err(Error::Failure("No result after COPY".into())),
            Err(e) => Err(e),
        };
        self.check_result(outcome, "[END COPY]").map(drop)
    }

    /// Start a COPY TO STDOUT statement and stream its lines.
    pub fn copy_out(&mut self, query: &str) -> Result<CopyReader<'_, P>> {
        self.start_copy(query, ReplyStatus::CopyOut)?;
        Ok(CopyReader {
            conn: self,
            done: false,
        })
    }

    /// Start a COPY FROM STDIN statement and stream lines into it.
    pub fn copy_in(&mut self, query: &str) -> Result<CopyWriter<'_, P>> {
        self.start_copy(query, ReplyStatus::CopyIn)?;
        Ok(CopyWriter {
            conn: self,
            done: false,
        })
    }

    fn start_copy(&mut self, query: &str, expected: ReplyStatus) -> Result<()> {
        let result = self.exec(query, 0)?;
        if result.status() != expected {
            if let Some(link) = self.link.as_mut() {
                link.abort_copy();
            }
            return Err(Error::InvalidUsage(format!(
                "'{}' did not start a COPY ({:?} expected, got {:?})",
                query,
                expected,
                result.status()
            )));
        }
        self.avoidance.add(1);
        debug!(query, "copy started");
        Ok(())
    }
}

/// A COPY TO STDOUT stream in progress.
///
/// Dropping the reader before the end drains the rest of the stream.
pub struct CopyReader<'c, P: ConnectPolicy> {
    conn: &'c mut Connection<P>,
    done: bool,
}

impl<P: ConnectPolicy> CopyReader<'_, P> {
    /// Next line, or `None` at the end of the stream.
    pub fn read_line(&mut self) -> Result<Option<String>> {
        if self.done {
            return Ok(None);
        }
        let line = self.conn.read_copy_line();
        if !matches!(line, Ok(Some(_))) {
            self.done = true;
        }
        line
    }

    /// Discard the remaining lines and check the final result.
    pub fn finish(mut self) -> Result<()> {
        while self.read_line()?.is_some() {}
        Ok(())
    }
}

impl<P: ConnectPolicy> Iterator for CopyReader<'_, P> {
    type Item = Result<String>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_line().transpose()
    }
}

impl<P: ConnectPolicy> Drop for CopyReader<'_, P> {
    fn drop(&mut self) {
        loop {
            match self.read_line() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(e) => {
                    self.conn.process_notice(e.to_string().as_bytes());
                    break;
                }
            }
        }
        self.conn.avoidance.add(-1);
        debug!("copy out finished");
    }
}

/// A COPY FROM STDIN stream in progress.
///
/// Dropping the writer without [`finish`](Self::finish) aborts the copy.
pub struct CopyWriter<'c, P: ConnectPolicy> {
    conn: &'c mut Connection<P>,
    done: bool,
}

impl<P: ConnectPolicy> CopyWriter<'_, P> {
    /// Write one line.
    pub fn write_line(&mut self, line: &str) -> Result<()> {
        if self.done {
            return Err(Error::InvalidUsage("COPY stream already ended".into()));
        }
        let outcome = self.conn.write_copy_line(line);
        if outcome.is_err() {
            self.done = true;
        }
        outcome
    }

    /// End the stream and check the final result.
    pub fn finish(mut self) -> Result<()> {
        if self.done {
            return Err(Error::InvalidUsage("COPY stream already ended".into()));
        }
        self.done = true;
        self.conn.end_copy_write()
    }
}

impl<P: ConnectPolicy> Drop for CopyWriter<'_, P> {
    fn drop(&mut self) {
        if !self.done {
            debug!("aborting unfinished copy in");
            if let Some(link) = self.conn.link.as_mut() {
                link.abort_copy();
            }
        }
        self.conn.avoidance.add(-1);
    }
}
