//! Error types for pgsession.

use thiserror::Error;

use crate::transport::Verbosity;

/// Result type for pgsession operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice field types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// Non-localized severity (same as severity but never translated)
    pub severity_non_localized: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Fields carrying only a severity and a message.
    pub fn new(severity: &str, message: impl Into<String>) -> Self {
        Self {
            severity: Some(severity.to_string()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Severity, preferring the non-localized form.
    pub fn severity(&self) -> Option<&str> {
        self.severity_non_localized
            .as_deref()
            .or(self.severity.as_deref())
    }

    /// Render the fields the way a notice processor receives them.
    ///
    /// The result always ends in a newline.
    pub fn render(&self, verbosity: Verbosity) -> String {
        let mut out = String::new();
        if let Some(severity) = &self.severity {
            out.push_str(severity);
            out.push_str(":  ");
        }
        if verbosity == Verbosity::Verbose {
            if let Some(code) = &self.code {
                out.push_str(code);
                out.push_str(": ");
            }
        }
        if let Some(message) = &self.message {
            out.push_str(message);
        }
        out.push('\n');
        if verbosity == Verbosity::Terse {
            return out;
        }
        if let Some(detail) = &self.detail {
            out.push_str("DETAIL:  ");
            out.push_str(detail);
            out.push('\n');
        }
        if let Some(hint) = &self.hint {
            out.push_str("HINT:  ");
            out.push_str(hint);
            out.push('\n');
        }
        if verbosity == Verbosity::Verbose {
            if let Some(where_) = &self.where_ {
                out.push_str("CONTEXT:  ");
                out.push_str(where_);
                out.push('\n');
            }
            if let (Some(routine), Some(file), Some(line)) = (&self.routine, &self.file, self.line)
            {
                out.push_str(&format!("LOCATION:  {}, {}:{}\n", routine, file, line));
            }
        }
        out
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for pgsession.
#[derive(Debug, Error)]
pub enum Error {
    /// The physical link is unusable; a reconnect or reset may recover it.
    #[error("Connection is broken: {0}")]
    ConnectionBroken(String),

    /// Reactivation was switched off after a fatal failure.
    #[error("Connection is broken: {0}")]
    ReactivationInhibited(String),

    /// The server or the transport reported a failure outside any statement.
    #[error("Failure: {0}")]
    Failure(String),

    /// The server rejected a statement.
    #[error("PostgreSQL error: {fields}\nQuery was: {query}")]
    Sql {
        /// Diagnostic fields sent by the server
        fields: ErrorFields,
        /// Text of the statement that failed
        query: String,
    },

    /// Caller passed a bad argument (unknown statement, empty channel, ...)
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Lifecycle misuse (e.g., deactivating with a transaction open)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// A response the protocol should never produce
    #[error("Internal error: {0}")]
    Internal(String),

    /// Server or protocol version below the supported floor
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Protocol error (malformed message, unexpected response, etc.)
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// TLS error
    #[cfg(feature = "tls")]
    #[error("TLS error: {0}")]
    Tls(#[from] native_tls::Error),
}

impl Error {
    /// Returns true if the error indicates the link is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::ConnectionBroken(_) | Error::ReactivationInhibited(_) => true,
            Error::Sql { fields, .. } => {
                // FATAL and PANIC errors terminate the backend
                matches!(fields.severity(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Re-label a failure as a broken link, keeping its message.
    pub(crate) fn into_broken(self) -> Error {
        match self {
            Error::ConnectionBroken(msg) => Error::ConnectionBroken(msg),
            other => Error::ConnectionBroken(other.to_string()),
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Sql { fields, .. } => fields.code.as_deref(),
            _ => None,
        }
    }
}

impl From<core::convert::Infallible> for Error {
    fn from(never: core::convert::Infallible) -> Self {
        match never {}
    }
}

impl<Src: std::fmt::Debug, Dst: std::fmt::Debug + ?Sized>
    From<zerocopy::error::CastError<Src, Dst>> for Error
{
    fn from(err: zerocopy::error::CastError<Src, Dst>) -> Self {
        Error::Protocol(format!("zerocopy cast error: {err:?}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_server_error_is_broken() {
        let err = Error::Sql {
            fields: ErrorFields::new("FATAL", "terminating connection"),
            query: "SELECT 1".into(),
        };
        assert!(err.is_connection_broken());

        let err = Error::Sql {
            fields: ErrorFields::new("ERROR", "division by zero"),
            query: "SELECT 1/0".into(),
        };
        assert!(!err.is_connection_broken());
    }

    #[test]
    fn render_is_newline_terminated() {
        let mut fields = ErrorFields::new("NOTICE", "table does not exist, skipping");
        fields.hint = Some("check the name".into());
        assert_eq!(
            fields.render(Verbosity::Terse),
            "NOTICE:  table does not exist, skipping\n"
        );
        assert_eq!(
            fields.render(Verbosity::Default),
            "NOTICE:  table does not exist, skipping\nHINT:  check the name\n"
        );
    }
}
