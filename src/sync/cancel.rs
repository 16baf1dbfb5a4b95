//! Out-of-band query cancellation.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::protocol::frontend::write_cancel_request;
use crate::transport::CancelToken;

#[derive(Debug, Clone)]
pub(crate) enum CancelTarget {
    Tcp(String, u16),
    Unix(PathBuf),
}

/// Cancels the statement running on one [`PgLink`](super::PgLink).
///
/// The request travels over a separate connection, so the token can be
/// fired from any thread while the owner is blocked on a reply.
#[derive(Debug, Clone)]
pub struct PgCancel {
    target: CancelTarget,
    pid: u32,
    secret: u32,
}

impl PgCancel {
    pub(crate) fn new(target: CancelTarget, pid: u32, secret: u32) -> Self {
        Self { target, pid, secret }
    }
}

fn send(mut stream: impl Read + Write, request: &[u8]) -> std::io::Result<()> {
    stream.write_all(request)?;
    stream.flush()?;
    // The server closes the connection once it has read the request.
    let mut sink = [0u8; 1];
    let _ = stream.read(&mut sink)?;
    Ok(())
}

impl CancelToken for PgCancel {
    fn cancel(&self) -> Result<()> {
        let mut request = Vec::with_capacity(16);
        write_cancel_request(&mut request, self.pid, self.secret);
        debug!(pid = self.pid, "sending cancel request");
        match &self.target {
            CancelTarget::Tcp(host, port) => {
                send(TcpStream::connect((host.as_str(), *port))?, &request)?
            }
            CancelTarget::Unix(path) => send(UnixStream::connect(path)?, &request)?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::net::UnixListener;

    #[test]
    fn request_reaches_server() {
        let dir = std::env::temp_dir().join(format!("pgsession-cancel-{}", std::process::id()));
        let _ = std::fs::remove_file(&dir);
        let listener = UnixListener::bind(&dir).unwrap();
        let server = std::thread::spawn(move || {
            let (mut conn, _) = listener.accept().unwrap();
            let mut buf = [0u8; 16];
            conn.read_exact(&mut buf).unwrap();
            buf
        });

        let token = PgCancel::new(CancelTarget::Unix(dir.clone()), 7, 9);
        let sent = token.clone();
        sent.cancel().unwrap();
        let buf = server.join().unwrap();
        assert_eq!(&buf[0..4], &16_i32.to_be_bytes());
        assert_eq!(&buf[8..12], &7_u32.to_be_bytes());
        assert_eq!(&buf[12..16], &9_u32.to_be_bytes());
        let _ = std::fs::remove_file(&dir);
    }
}
