//! Prepared statement definitions that survive reconnects.

use std::collections::BTreeMap;

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PreparedDef {
    pub(crate) definition: String,
    /// Whether the current physical link knows this statement.
    pub(crate) registered: bool,
}

#[derive(Debug, Default)]
pub(crate) struct PreparedRegistry {
    statements: BTreeMap<String, PreparedDef>,
}

impl PreparedRegistry {
    /// Record a definition. Only the unnamed statement may change its text.
    pub(crate) fn declare(&mut self, name: &str, definition: &str) -> Result<()> {
        match self.statements.get_mut(name) {
            Some(existing) if existing.definition == definition => Ok(()),
            Some(existing) if name.is_empty() => {
                existing.definition = definition.to_string();
                existing.registered = false;
                Ok(())
            }
            Some(_) => Err(Error::InvalidArgument(format!(
                "Inconsistent redefinition of prepared statement {}",
                name
            ))),
            None => {
                self.statements.insert(
                    name.to_string(),
                    PreparedDef {
                        definition: definition.to_string(),
                        registered: false,
                    },
                );
                Ok(())
            }
        }
    }

    pub(crate) fn lookup(&self, name: &str) -> Result<&PreparedDef> {
        self.statements
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("Unknown prepared statement '{}'", name)))
    }

    pub(crate) fn exists(&self, name: &str) -> bool {
        self.statements.contains_key(name)
    }

    pub(crate) fn remove(&mut self, name: &str) -> Option<PreparedDef> {
        self.statements.remove(name)
    }

    pub(crate) fn set_registered(&mut self, name: &str) {
        if let Some(def) = self.statements.get_mut(name) {
            def.registered = !name.is_empty();
        }
    }

    /// The server forgot everything; called after each (re)connect.
    pub(crate) fn mark_all_unregistered(&mut self) {
        for def in self.statements.values_mut() {
            def.registered = false;
        }
    }
}
