//! Reactivation avoidance.
//!
//! Some server-side state cannot be recreated after a reconnect: a COPY in
//! progress, a cursor held open across transactions. While any of it exists
//! the connection must not quietly open a fresh link, because the caller
//! would carry on as if nothing had been lost.

use std::ops::{Deref, DerefMut};

use tracing::warn;

use super::Connection;
use crate::policy::ConnectPolicy;

/// Count of outstanding non-replayable server-side resources.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct AvoidanceCounter {
    count: u32,
}

impl AvoidanceCounter {
    /// Current debt.
    pub(crate) fn get(&self) -> u32 {
        self.count
    }

    /// Whether reconnects are currently suppressed.
    pub(crate) fn is_active(&self) -> bool {
        self.count > 0
    }

    /// Adjust the debt by `n`, saturating at zero.
    pub(crate) fn add(&mut self, n: i32) {
        let next = i64::from(self.count) + i64::from(n);
        if next < 0 {
            warn!(count = self.count, n, "reactivation avoidance count went negative");
        }
        self.count = u32::try_from(next.max(0)).unwrap_or(u32::MAX);
    }

    /// Drop all debt.
    pub(crate) fn clear(&mut self) {
        self.count = 0;
    }
}

/// Scope in which reactivation is allowed despite outstanding debt.
///
/// Created by [`Connection::exempt`]. The debt is restored when the guard is
/// dropped, and a connection that was closed when the scope began is closed
/// again.
pub struct ReactivationExemption<'c, P: ConnectPolicy> {
    conn: &'c mut Connection<P>,
    count: u32,
    was_open: bool,
}

impl<'c, P: ConnectPolicy> ReactivationExemption<'c, P> {
    pub(super) fn new(conn: &'c mut Connection<P>) -> Self {
        let count = conn.avoidance.get();
        let was_open = conn.is_open();
        conn.avoidance.clear();
        Self {
            conn,
            count,
            was_open,
        }
    }
}

impl<P: ConnectPolicy> Deref for ReactivationExemption<'_, P> {
    type Target = Connection<P>;

    fn deref(&self) -> &Connection<P> {
        self.conn
    }
}

impl<P: ConnectPolicy> DerefMut for ReactivationExemption<'_, P> {
    fn deref_mut(&mut self) -> &mut Connection<P> {
        self.conn
    }
}

impl<P: ConnectPolicy> Drop for ReactivationExemption<'_, P> {
    fn drop(&mut self) {
        if self.count != 0 && !self.was_open {
            if let Err(e) = self.conn.deactivate() {
                self.conn.process_notice(e.to_string().as_bytes());
            }
        }
        self.conn
            .avoidance
            .add(i32::try_from(self.count).unwrap_or(i32::MAX));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_saturates() {
        let mut counter = AvoidanceCounter::default();
        counter.add(2);
        counter.add(-1);
        assert_eq!(counter.get(), 1);
        assert!(counter.is_active());
        counter.add(-5);
        assert_eq!(counter.get(), 0);
        assert!(!counter.is_active());
    }
}
