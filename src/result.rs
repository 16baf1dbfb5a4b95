//! Raw replies and the result wrapper handed back to callers.

use crate::error::{Error, ErrorFields, Result};

/// Status of one reply from the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyStatus {
    /// The statement string was empty
    EmptyQuery,
    /// A command without rows completed
    CommandOk,
    /// A row-returning command completed
    TuplesOk,
    /// The server started a COPY TO STDOUT stream
    CopyOut,
    /// The server is waiting for COPY FROM STDIN data
    CopyIn,
    /// The server rejected the statement
    Error,
}

/// One reply as produced by a [`Transport`](crate::Transport).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Reply status
    pub status: ReplyStatus,
    /// Column names, for row-returning commands
    pub columns: Vec<String>,
    /// Row values in text format; `None` is SQL NULL
    pub rows: Vec<Vec<Option<Vec<u8>>>>,
    /// Command tag (e.g. `INSERT 0 1`)
    pub tag: Option<String>,
    /// Diagnostics, for `ReplyStatus::Error`
    pub error: Option<ErrorFields>,
}

impl Reply {
    /// Reply with a status and nothing else.
    pub fn new(status: ReplyStatus) -> Self {
        Self {
            status,
            columns: Vec::new(),
            rows: Vec::new(),
            tag: None,
            error: None,
        }
    }

    /// Successful command reply with a tag.
    pub fn command(tag: &str) -> Self {
        Self {
            tag: Some(tag.to_string()),
            ..Self::new(ReplyStatus::CommandOk)
        }
    }

    /// Error reply carrying server diagnostics.
    pub fn error(fields: ErrorFields) -> Self {
        Self {
            error: Some(fields),
            ..Self::new(ReplyStatus::Error)
        }
    }

    /// Single-column, text-valued row set.
    pub fn single_column(column: &str, values: &[&str]) -> Self {
        Self {
            columns: vec![column.to_string()],
            rows: values
                .iter()
                .map(|v| vec![Some(v.as_bytes().to_vec())])
                .collect(),
            tag: Some(format!("SELECT {}", values.len())),
            ..Self::new(ReplyStatus::TuplesOk)
        }
    }

    /// Returns true if the server rejected the statement.
    pub fn is_error(&self) -> bool {
        self.status == ReplyStatus::Error
    }
}

/// A reply together with the statement that produced it.
#[derive(Debug, Clone)]
pub struct QueryResult {
    reply: Reply,
    query: String,
}

impl QueryResult {
    /// Wrap a raw reply.
    pub fn new(reply: Reply, query: &str) -> Self {
        Self {
            reply,
            query: query.to_string(),
        }
    }

    /// Fail with the server's diagnostics if the statement was rejected.
    pub fn check_status(&self) -> Result<()> {
        if self.reply.is_error() {
            return Err(Error::Sql {
                fields: self.reply.error.clone().unwrap_or_default(),
                query: self.query.clone(),
            });
        }
        Ok(())
    }

    /// Statement text.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Reply status.
    pub fn status(&self) -> ReplyStatus {
        self.reply.status
    }

    /// Column names.
    pub fn columns(&self) -> &[String] {
        &self.reply.columns
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.reply.rows.len()
    }

    /// Check if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.reply.rows.is_empty()
    }

    /// Text value at `(row, column)`; `Ok(None)` is SQL NULL.
    pub fn get(&self, row: usize, column: usize) -> Result<Option<&str>> {
        let value = self
            .reply
            .rows
            .get(row)
            .and_then(|r| r.get(column))
            .ok_or_else(|| {
                Error::InvalidArgument(format!(
                    "No value at row {} column {} in result of '{}'",
                    row, column, self.query
                ))
            })?;
        match value {
            None => Ok(None),
            Some(bytes) => simdutf8::compat::from_utf8(bytes)
                .map(Some)
                .map_err(|e| Error::Protocol(format!("Invalid UTF-8 in result: {}", e))),
        }
    }

    /// Command tag.
    pub fn tag(&self) -> Option<&str> {
        self.reply.tag.as_deref()
    }

    /// Number of rows affected, parsed from the command tag.
    pub fn rows_affected(&self) -> Option<u64> {
        let tag = self.reply.tag.as_deref()?;
        let parts: Vec<&str> = tag.split_whitespace().collect();
        match parts.as_slice() {
            ["INSERT", _oid, count] => count.parse().ok(),
            [
                "SELECT" | "UPDATE" | "DELETE" | "COPY" | "MOVE" | "FETCH" | "MERGE",
                count,
            ] => count.parse().ok(),
            _ => None,
        }
    }

    /// Take the raw reply back.
    pub fn into_reply(self) -> Reply {
        self.reply
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_reply_fails_check() {
        let result = QueryResult::new(
            Reply::error(ErrorFields::new("ERROR", "syntax error")),
            "SELEC 1",
        );
        match result.check_status() {
            Err(Error::Sql { fields, query }) => {
                assert_eq!(fields.message.as_deref(), Some("syntax error"));
                assert_eq!(query, "SELEC 1");
            }
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[test]
    fn values_and_tags() {
        let result = QueryResult::new(Reply::single_column("n", &["1", "2"]), "SELECT n");
        assert_eq!(result.len(), 2);
        assert_eq!(result.get(1, 0).unwrap(), Some("2"));
        assert!(result.get(2, 0).is_err());
        assert_eq!(result.rows_affected(), Some(2));

        let insert = QueryResult::new(Reply::command("INSERT 0 3"), "INSERT ...");
        assert_eq!(insert.rows_affected(), Some(3));
        assert_eq!(QueryResult::new(Reply::command("SET"), "SET x=1").rows_affected(), None);
    }
}
