//! Connect policies: when and how a physical link gets established.

use tracing::{debug, warn};

use crate::error::Result;
use crate::opts::Opts;
use crate::sync::PgLink;
use crate::transport::Transport;

/// Something that can open a fresh physical link.
pub trait Connector {
    /// Link type produced.
    type Link: Transport;

    /// Open a new link, blocking until the handshake finished.
    fn connect(&mut self) -> Result<Self::Link>;
}

impl Connector for Opts {
    type Link = PgLink;

    fn connect(&mut self) -> Result<PgLink> {
        let mut attempt = 0;
        loop {
            match PgLink::open(self) {
                Ok(link) => return Ok(link),
                Err(e) if attempt < self.connect_retries && e.is_connection_broken() => {
                    attempt += 1;
                    debug!(attempt, error = %e, "connect attempt failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Decides at which lifecycle points a link is opened and closed.
///
/// Every method takes the current handle by value and returns the handle the
/// connection should hold afterwards.
pub trait ConnectPolicy {
    /// Link type managed by this policy.
    type Link: Transport;

    /// Called at construction and at the start of every activation.
    fn start_connect(&mut self, link: Option<Self::Link>) -> Result<Option<Self::Link>>;

    /// Called after `start_connect` when the connection must be usable.
    fn complete_connect(&mut self, link: Option<Self::Link>) -> Result<Option<Self::Link>>;

    /// Forget an unfinished connection attempt before a reset.
    fn drop_connect(&mut self, link: Option<Self::Link>) -> Option<Self::Link> {
        link
    }

    /// Close the link.
    fn disconnect(&mut self, link: Option<Self::Link>) -> Option<Self::Link> {
        drop(link);
        None
    }

    /// Whether construction should activate right away.
    fn is_ready(&self, link: Option<&Self::Link>) -> bool {
        link.is_some()
    }
}

fn open<C: Connector>(connector: &mut C) -> Result<C::Link> {
    connector.connect().map_err(|e| {
        warn!(error = %e, "could not establish connection");
        e.into_broken()
    })
}

/// Connect as soon as possible.
#[derive(Debug, Clone)]
pub struct Direct<C> {
    connector: C,
}

impl<C: Connector> Direct<C> {
    /// Wrap a connector.
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    /// The wrapped connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: Connector> ConnectPolicy for Direct<C> {
    type Link = C::Link;

    fn start_connect(&mut self, link: Option<C::Link>) -> Result<Option<C::Link>> {
        match link {
            Some(link) => Ok(Some(link)),
            None => open(&mut self.connector).map(Some),
        }
    }

    fn complete_connect(&mut self, link: Option<C::Link>) -> Result<Option<C::Link>> {
        self.start_connect(link)
    }
}

/// Connect only when the connection is first used.
#[derive(Debug, Clone)]
pub struct Lazy<C> {
    connector: C,
}

impl<C: Connector> Lazy<C> {
    /// Wrap a connector.
    pub fn new(connector: C) -> Self {
        Self { connector }
    }

    /// The wrapped connector.
    pub fn connector(&self) -> &C {
        &self.connector
    }
}

impl<C: Connector> ConnectPolicy for Lazy<C> {
    type Link = C::Link;

    fn start_connect(&mut self, link: Option<C::Link>) -> Result<Option<C::Link>> {
        Ok(link)
    }

    fn complete_connect(&mut self, link: Option<C::Link>) -> Result<Option<C::Link>> {
        match link {
            Some(link) => Ok(Some(link)),
            None => open(&mut self.connector).map(Some),
        }
    }
}
