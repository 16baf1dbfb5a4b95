//! Optional server and protocol capabilities.

use crate::error::{Error, Result};

/// A feature that depends on the server or protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Capability {
    /// Server-side prepared statements
    PreparedStatements,
    /// Prepared statements taking a variable number of arguments
    StatementVarargs,
    /// Preparing the unnamed statement
    PrepareUnnamedStatement,
    /// Scrollable cursors
    CursorScroll,
    /// Cursors that survive their transaction (WITH HOLD)
    CursorWithHold,
    /// `FETCH 0` on cursors
    CursorFetch0,
    /// Savepoint-based nested transactions
    NestedTransactions,
    /// `CREATE TABLE ... WITH OIDS`
    CreateTableWithOids,
    /// `SET TRANSACTION READ ONLY`
    ReadOnlyTransactions,
    /// Payload strings on NOTIFY
    NotifyPayload,
    /// Looking up the table column behind a result column
    TableColumn,
    /// Statements with `$n` parameters outside PREPARE
    ParameterizedStatements,
}

impl Capability {
    /// Every capability, in declaration order.
    pub const ALL: [Capability; 12] = [
        Capability::PreparedStatements,
        Capability::StatementVarargs,
        Capability::PrepareUnnamedStatement,
        Capability::CursorScroll,
        Capability::CursorWithHold,
        Capability::CursorFetch0,
        Capability::NestedTransactions,
        Capability::CreateTableWithOids,
        Capability::ReadOnlyTransactions,
        Capability::NotifyPayload,
        Capability::TableColumn,
        Capability::ParameterizedStatements,
    ];

    fn bit(self) -> u16 {
        1 << (self as u8)
    }
}

/// Oldest server version accepted (exclusive): 9.0.
pub const MIN_SERVER_VERSION: i32 = 90000;

/// Set of capabilities available on the current physical link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet {
    bits: u16,
}

impl CapabilitySet {
    /// Empty set.
    pub const fn new() -> Self {
        Self { bits: 0 }
    }

    /// Derive the set from the versions a freshly connected link reports.
    pub fn from_versions(server_version: i32, protocol_version: i32) -> Result<Self> {
        if server_version <= MIN_SERVER_VERSION {
            return Err(Error::Unsupported(
                "Unsupported server version; 9.0 is the minimum.".into(),
            ));
        }
        match protocol_version {
            0 => return Err(Error::ConnectionBroken("No protocol version reported".into())),
            1 | 2 => {
                return Err(Error::Unsupported(
                    "Unsupported frontend/backend protocol version; 3.0 is the minimum.".into(),
                ));
            }
            _ => {}
        }

        let mut caps = Self::new();
        for cap in Capability::ALL {
            caps.insert(cap);
        }
        Ok(caps)
    }

    /// Check whether a capability is available.
    pub fn supports(&self, cap: Capability) -> bool {
        self.bits & cap.bit() != 0
    }

    /// Mark a capability available.
    pub fn insert(&mut self, cap: Capability) {
        self.bits |= cap.bit();
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.bits = 0;
    }

    /// Check if no capability is set.
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modern_server_has_everything() {
        let caps = CapabilitySet::from_versions(150004, 3).unwrap();
        for cap in Capability::ALL {
            assert!(caps.supports(cap));
        }
    }

    #[test]
    fn version_floor() {
        assert!(matches!(
            CapabilitySet::from_versions(90000, 3),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            CapabilitySet::from_versions(150004, 2),
            Err(Error::Unsupported(_))
        ));
        assert!(matches!(
            CapabilitySet::from_versions(150004, 0),
            Err(Error::ConnectionBroken(_))
        ));
    }

    #[test]
    fn clear_empties() {
        let mut caps = CapabilitySet::from_versions(120000, 3).unwrap();
        caps.clear();
        assert!(caps.is_empty());
        assert!(!caps.supports(Capability::CursorWithHold));
    }
}
