//! Action types for state machine I/O requests.

use crate::error::ErrorFields;

/// Action requested by a state machine.
///
/// The caller performs the requested I/O and then calls the matching
/// method to continue the state machine.
#[derive(Debug)]
pub enum Action<'a> {
    /// Write the bytes, then read the single-byte answer to an SSLRequest
    /// and pass it to `process_ssl_response`.
    WriteAndReadByte(&'a [u8]),

    /// Write the bytes, then read the next message and call `step`.
    WriteAndReadMessage(&'a [u8]),

    /// Read the next message and call `step`.
    ReadMessage,

    /// Upgrade the stream to TLS, then call `tls_established`.
    TlsHandshake,

    /// The server sent a notice; hand it on, then read the next message.
    Notice(ErrorFields),

    /// Startup finished; the link is ready for queries.
    Finished,
}
