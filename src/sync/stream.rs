use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::time::Duration;

#[cfg(feature = "tls")]
use native_tls::TlsStream;

use crate::error::{Error, Result};

pub enum Stream {
    Tcp(BufReader<TcpStream>),
    #[cfg(feature = "tls")]
    Tls(BufReader<TlsStream<TcpStream>>),
    Unix(BufReader<UnixStream>),
}

impl Stream {
    pub fn tcp(stream: TcpStream) -> Self {
        Self::Tcp(BufReader::new(stream))
    }

    pub fn unix(stream: UnixStream) -> Self {
        Self::Unix(BufReader::new(stream))
    }

    /// Wrap a plain TCP stream in TLS. Certificates are not verified,
    /// matching `sslmode=prefer` and `sslmode=require`.
    #[cfg(feature = "tls")]
    pub fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        let Stream::Tcp(reader) = self else {
            return Err(Error::InvalidUsage("TLS needs a TCP stream".into()));
        };
        let connector = native_tls::TlsConnector::builder()
            .danger_accept_invalid_certs(true)
            .danger_accept_invalid_hostnames(true)
            .build()?;
        let tls = connector
            .connect(host, reader.into_inner())
            .map_err(|e| Error::Failure(format!("TLS handshake failed: {}", e)))?;
        Ok(Stream::Tls(BufReader::new(tls)))
    }

    #[cfg(not(feature = "tls"))]
    pub fn upgrade_to_tls(self, _host: &str) -> Result<Self> {
        Err(Error::Unsupported(
            "TLS requested but the tls feature is not enabled".into(),
        ))
    }

    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        match self {
            Stream::Tcp(r) => r.read_exact(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.read_exact(buf),
            Stream::Unix(r) => r.read_exact(buf),
        }
    }

    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().write_all(buf),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_mut().write_all(buf),
            Stream::Unix(r) => r.get_mut().write_all(buf),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_mut().flush(),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_mut().flush(),
            Stream::Unix(r) => r.get_mut().flush(),
        }
    }

    fn buffered(&self) -> bool {
        match self {
            Stream::Tcp(r) => !r.buffer().is_empty(),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => !r.buffer().is_empty(),
            Stream::Unix(r) => !r.buffer().is_empty(),
        }
    }

    fn set_nonblocking(&self, on: bool) -> io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_ref().set_nonblocking(on),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_ref().get_ref().set_nonblocking(on),
            Stream::Unix(r) => r.get_ref().set_nonblocking(on),
        }
    }

    fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        match self {
            Stream::Tcp(r) => r.get_ref().set_read_timeout(timeout),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_ref().get_ref().set_read_timeout(timeout),
            Stream::Unix(r) => r.get_ref().set_read_timeout(timeout),
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        match self {
            Stream::Tcp(r) => r.fill_buf().map(drop),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.fill_buf().map(drop),
            Stream::Unix(r) => r.fill_buf().map(drop),
        }
    }

    /// Whether a read would make progress right now.
    ///
    /// End of stream counts as readable; the following read reports it.
    pub fn poll_readable(&mut self) -> io::Result<bool> {
        if self.buffered() {
            return Ok(true);
        }
        self.set_nonblocking(true)?;
        let outcome = self.fill();
        self.set_nonblocking(false)?;
        match outcome {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Block until data arrives or `timeout` elapses.
    pub fn wait_readable(&mut self, timeout: Option<Duration>) -> io::Result<bool> {
        if self.buffered() {
            return Ok(true);
        }
        // A zero read timeout is rejected by the OS.
        if timeout.is_some_and(|t| t.is_zero()) {
            return self.poll_readable();
        }
        self.set_read_timeout(timeout)?;
        let outcome = self.fill();
        self.set_read_timeout(None)?;
        match outcome {
            Ok(()) => Ok(true),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn as_raw_fd(&self) -> RawFd {
        match self {
            Stream::Tcp(r) => r.get_ref().as_raw_fd(),
            #[cfg(feature = "tls")]
            Stream::Tls(r) => r.get_ref().get_ref().as_raw_fd(),
            Stream::Unix(r) => r.get_ref().as_raw_fd(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readiness_follows_peer() {
        let (ours, mut theirs) = UnixStream::pair().unwrap();
        let mut stream = Stream::unix(ours);
        assert!(!stream.poll_readable().unwrap());
        assert!(!stream.wait_readable(Some(Duration::from_millis(10))).unwrap());

        theirs.write_all(b"xy").unwrap();
        assert!(stream.wait_readable(None).unwrap());
        let mut buf = [0u8; 2];
        stream.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"xy");

        drop(theirs);
        assert!(stream.poll_readable().unwrap());
        assert!(stream.read_exact(&mut buf).is_err());
    }
}
