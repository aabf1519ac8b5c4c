//! The columnar-store interface.
//!
//! This lists exactly what the migration engine needs from a columnar driver:
//! single statement execution, health check, close and a forced reconnect.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::BoxError;

/// Named statement parameters forwarded to the driver.
pub type Parameters = BTreeMap<String, Value>;

/// Driver specific result of a command.
pub type CommandOutput = Value;

/// Message fragments of connection failures worth retrying. Matched
/// case-insensitively against errors the driver did not classify itself.
const TRANSIENT_FINGERPRINTS: &[&str] = &[
    "broken pipe",
    "connection closed",
    "connection was closed",
    "connection lost",
    "lost connection",
    "connection refused",
    "connection reset",
    "connection aborted",
    "timeout",
    "timed out",
    "unreachable",
];

/// Errors returned by a columnar client.
#[derive(Debug, thiserror::Error)]
pub enum ColumnarError {
    /// The driver flagged a transient connection failure.
    #[error("Connection error: {0}")]
    Connection(String),

    /// The server rejected the statement.
    #[error("Server error {code}: {message}")]
    Server {
        /// Server error code.
        code: i32,
        /// Server error message.
        message: String,
    },

    /// Anything else.
    #[error("Columnar client error: {0}")]
    Other(#[source] BoxError),
}

impl ColumnarError {
    /// Whether retrying the statement on a fresh connection may succeed.
    ///
    /// Typed connection errors are always transient. Other errors fall back
    /// to matching the message against known connection failure texts.
    pub fn is_transient(&self) -> bool {
        match self {
            ColumnarError::Connection(_) => true,
            ColumnarError::Server { message, .. } => matches_fingerprint(message),
            ColumnarError::Other(source) => matches_fingerprint(&source.to_string()),
        }
    }
}

fn matches_fingerprint(message: &str) -> bool {
    let message = message.to_lowercase();
    TRANSIENT_FINGERPRINTS
        .iter()
        .any(|fingerprint| message.contains(fingerprint))
}

/// An async columnar-store client.
#[async_trait]
pub trait ColumnarClient: Send + Sync {
    /// Executes one statement.
    async fn execute_statement(
        &self,
        sql: &str,
        params: &Parameters,
    ) -> Result<CommandOutput, ColumnarError>;

    /// Checks the server is reachable.
    async fn ping(&self) -> Result<(), ColumnarError>;

    /// Closes the underlying connection.
    async fn close(&self) -> Result<(), ColumnarError>;

    /// Drops the current connection and opens a fresh one. Subsequent calls
    /// use the new connection.
    async fn reconnect(&self) -> Result<(), ColumnarError>;

    /// Executes `sql` without parameters.
    async fn command(&self, sql: &str) -> Result<CommandOutput, ColumnarError> {
        self.execute_statement(sql, &Parameters::new()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_connection_errors_are_transient() {
        assert!(ColumnarError::Connection("pool exhausted".into()).is_transient());
    }

    #[test]
    fn server_errors_fall_back_to_message_matching() {
        let transient = ColumnarError::Server {
            code: 210,
            message: "Connection reset by peer".into(),
        };
        let fatal = ColumnarError::Server {
            code: 62,
            message: "Syntax error: failed at position 7".into(),
        };
        assert!(transient.is_transient());
        assert!(!fatal.is_transient());
    }

    #[test]
    fn boxed_errors_match_case_insensitively() {
        let error = ColumnarError::Other("Read TIMED OUT after 30s".into());
        assert!(error.is_transient());

        let error = ColumnarError::Other("Table db.t doesn't exist".into());
        assert!(!error.is_transient());
    }
}
