//! Transaction bookkeeping on the connection.

use std::collections::BTreeMap;

use super::Connection;
use crate::error::{Error, Result};
use crate::policy::ConnectPolicy;

/// What the connection knows about the open transaction.
#[derive(Debug)]
pub(crate) struct TransactionFocus {
    pub(crate) id: u64,
    pub(crate) description: String,
    /// Variables set inside the transaction; they die with it.
    pub(crate) vars: BTreeMap<String, String>,
}

impl TransactionFocus {
    pub(crate) fn new(id: u64, description: &str) -> Self {
        Self {
            id,
            description: description.to_string(),
            vars: BTreeMap::new(),
        }
    }
}

/// An open transaction, handed to the closure of
/// [`Connection::run_transaction`].
///
/// The connection is passed to `commit` and `rollback`. While a transaction
/// is open the connection refuses to deactivate and holds back
/// notifications. A token dropped unfinished is rolled back when the closure
/// returns.
#[must_use = "a transaction stays open until committed or rolled back"]
pub struct Transaction {
    connection_id: u64,
    id: u64,
}

impl Transaction {
    fn check<P: ConnectPolicy>(&self, conn: &Connection<P>) -> Result<()> {
        let actual = conn.serial();
        if self.connection_id != actual {
            return Err(Error::InvalidUsage(format!(
                "connection mismatch: expected {}, got {}",
                self.connection_id, actual
            )));
        }
        Ok(())
    }

    fn finish<P: ConnectPolicy>(self, conn: &mut Connection<P>, command: &str) -> Result<()> {
        self.check(conn)?;
        let outcome = conn.exec(command, 0);
        conn.unregister_transaction(self.id);
        outcome?;
        conn.get_notifs()?;
        Ok(())
    }

    /// Commit the transaction.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUsage` if the connection is not the same
    /// as the one that started the transaction.
    pub fn commit<P: ConnectPolicy>(self, conn: &mut Connection<P>) -> Result<()> {
        self.finish(conn, "COMMIT")
    }

    /// Roll the transaction back.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidUsage` if the connection is not the same
    /// as the one that started the transaction.
    pub fn rollback<P: ConnectPolicy>(self, conn: &mut Connection<P>) -> Result<()> {
        self.finish(conn, "ROLLBACK")
    }
}

impl<P: ConnectPolicy> Connection<P> {
    /// Open a transaction. The caller must finish it; `run_transaction`
    /// does so on every path.
    pub(crate) fn begin(&mut self, description: &str) -> Result<Transaction> {
        let id = self.register_transaction(description)?;
        if let Err(e) = self.exec("BEGIN", 0) {
            self.unregister_transaction(id);
            return Err(e);
        }
        Ok(Transaction {
            connection_id: self.serial(),
            id,
        })
    }

    /// Run `f` inside a transaction.
    ///
    /// If the closure neither commits nor rolls back, the transaction is
    /// rolled back. An error from the closure wins over one from the
    /// rollback.
    pub fn run_transaction<F, R>(&mut self, description: &str, f: F) -> Result<R>
    where
        F: FnOnce(&mut Connection<P>, Transaction) -> Result<R>,
    {
        let tx = self.begin(description)?;
        let id = tx.id;
        let result = f(self, tx);

        if self.transaction.as_ref().is_some_and(|focus| focus.id == id) {
            let rollback = self.exec("ROLLBACK", 0);
            self.unregister_transaction(id);
            let value = result?;
            rollback?;
            self.get_notifs()?;
            return Ok(value);
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use crate::conn::mock::direct;
    use crate::conn::ListenerError;
    use crate::transport::Notification;

    #[test]
    fn notifications_wait_for_commit() {
        let (mut conn, server) = direct();
        let hits = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&hits);
        conn.add_receiver("jobs", move |_: &Notification| -> Result<(), ListenerError> {
            *counter.borrow_mut() += 1;
            Ok(())
        })
        .unwrap();

        let tx = conn.begin("transaction").unwrap();
        server.borrow_mut().notify("jobs", "x");
        conn.exec("SELECT 1", 0).unwrap();
        assert_eq!(*hits.borrow(), 0);
        tx.commit(&mut conn).unwrap();
        assert_eq!(*hits.borrow(), 1);
        assert_eq!(conn.transaction(), None);
    }

    #[test]
    fn variables_set_inside_are_scoped() {
        let (mut conn, server) = direct();
        conn.run_transaction("transaction", |conn, tx| {
            conn.set_variable("work_mem", "64MB")?;
            assert_eq!(conn.get_variable("work_mem")?, "64MB");
            tx.commit(conn)
        })
        .unwrap();
        assert_eq!(server.borrow().count("SET work_mem=64MB"), 1);
        assert_eq!(conn.get_variable("work_mem").unwrap(), "UTC");
    }

    #[test]
    fn unfinished_transaction_rolls_back() {
        let (mut conn, server) = direct();
        let err = conn
            .run_transaction("transaction", |conn, _tx| -> crate::Result<()> {
                conn.exec("FAIL here", 0)?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, crate::Error::Sql { .. }));
        assert_eq!(server.borrow().count("ROLLBACK"), 1);
        assert_eq!(conn.transaction(), None);
    }

    #[test]
    fn dropped_token_does_not_outlive_closure() {
        let (mut conn, server) = direct();
        let hits = Rc::new(RefCell::new(0));
        let counter = Rc::clone(&hits);
        conn.add_receiver("jobs", move |_: &Notification| -> Result<(), ListenerError> {
            *counter.borrow_mut() += 1;
            Ok(())
        })
        .unwrap();

        conn.run_transaction("transaction", |conn, tx| {
            drop(tx);
            conn.exec("SELECT 1", 0).map(drop)
        })
        .unwrap();
        assert_eq!(conn.transaction(), None);
        assert_eq!(server.borrow().count("ROLLBACK"), 1);

        server.borrow_mut().notify("jobs", "x");
        conn.exec("SELECT 1", 0).unwrap();
        assert_eq!(*hits.borrow(), 1);
        conn.deactivate().unwrap();
        conn.run_transaction("second", |conn, tx| tx.commit(conn))
            .unwrap();
        assert_eq!(server.borrow().count("COMMIT"), 1);
    }

    #[test]
    fn token_belongs_to_its_connection() {
        let (mut first, _a) = direct();
        let (mut second, _b) = direct();
        let tx = first.begin("transaction").unwrap();
        assert!(matches!(
            tx.commit(&mut second),
            Err(crate::Error::InvalidUsage(_))
        ));
        assert!(first.transaction().is_some());
    }
}
