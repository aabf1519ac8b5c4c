use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

use tandem_core::prelude::*;

type ErrorFactory = Arc<dyn Fn() -> ColumnarError + Send + Sync>;

struct FailureRule {
    contains: String,
    remaining: Option<usize>,
    error: ErrorFactory,
}

/// A statement received by [`InMemoryColumnarClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedStatement {
    /// The statement text as received.
    pub sql: String,
    /// Connection generation the statement was sent on. Starts at 1 and is
    /// bumped by every successful reconnect.
    pub connection: u64,
    /// Whether the statement failed.
    pub failed: bool,
}

#[derive(Default)]
struct ClientState {
    statements: Vec<ExecutedStatement>,
    rules: Vec<FailureRule>,
    connection: u64,
    reconnects: u64,
    reconnect_fails: bool,
    pings: u64,
    closed: bool,
}

/// A scriptable in-memory columnar client.
///
/// Every statement is recorded. Failure rules make statements containing a
/// given fragment fail, either a fixed number of times or forever.
#[derive(Clone)]
pub struct InMemoryColumnarClient {
    state: Arc<Mutex<ClientState>>,
}

impl Default for InMemoryColumnarClient {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InMemoryColumnarClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryColumnarClient").finish_non_exhaustive()
    }
}

impl InMemoryColumnarClient {
    /// Creates a client with an open connection and no failure rules.
    pub fn new() -> Self {
        log::debug!("Creating a new InMemoryColumnarClient");
        Self {
            state: Arc::new(Mutex::new(ClientState {
                connection: 1,
                ..Default::default()
            })),
        }
    }

    /// Makes the next `times` statements containing `fragment` fail with the
    /// error built by `error`. `None` fails them forever.
    pub async fn fail_statements_containing<F>(&self, fragment: &str, times: Option<usize>, error: F)
    where
        F: Fn() -> ColumnarError + Send + Sync + 'static,
    {
        let mut state = self.state.lock().await;
        state.rules.push(FailureRule {
            contains: fragment.to_string(),
            remaining: times,
            error: Arc::new(error),
        });
    }

    /// Makes every following reconnect attempt fail.
    pub async fn fail_reconnects(&self) {
        self.state.lock().await.reconnect_fails = true;
    }

    /// Every statement received so far, failed attempts included.
    pub async fn statements(&self) -> Vec<ExecutedStatement> {
        self.state.lock().await.statements.clone()
    }

    /// Text of the statements that succeeded.
    pub async fn executed_sql(&self) -> Vec<String> {
        self.state
            .lock()
            .await
            .statements
            .iter()
            .filter(|s| !s.failed)
            .map(|s| s.sql.clone())
            .collect()
    }

    /// Number of successful reconnects.
    pub async fn reconnects(&self) -> u64 {
        self.state.lock().await.reconnects
    }

    /// Number of pings received.
    pub async fn pings(&self) -> u64 {
        self.state.lock().await.pings
    }

    /// Whether `close` has been called since the last reconnect.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }
}

#[async_trait]
impl ColumnarClient for InMemoryColumnarClient {
    async fn execute_statement(
        &self,
        sql: &str,
        _params: &Parameters,
    ) -> Result<CommandOutput, ColumnarError> {
        let mut state = self.state.lock().await;
        let connection = state.connection;

        let mut failure = None;
        for rule in state.rules.iter_mut() {
            if !sql.contains(&rule.contains) || rule.remaining == Some(0) {
                continue;
            }
            if let Some(remaining) = rule.remaining.as_mut() {
                *remaining -= 1;
            }
            failure = Some((rule.error)());
            break;
        }

        state.statements.push(ExecutedStatement {
            sql: sql.to_string(),
            connection,
            failed: failure.is_some(),
        });

        match failure {
            Some(error) => {
                log::debug!("Statement failed on connection {}: {}", connection, error);
                Err(error)
            }
            None => Ok(json!({ "connection": connection })),
        }
    }

    async fn ping(&self) -> Result<(), ColumnarError> {
        self.state.lock().await.pings += 1;
        Ok(())
    }

    async fn close(&self) -> Result<(), ColumnarError> {
        self.state.lock().await.closed = true;
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), ColumnarError> {
        let mut state = self.state.lock().await;
        if state.reconnect_fails {
            return Err(ColumnarError::Connection("no node accepted the connection".into()));
        }
        state.connection += 1;
        state.reconnects += 1;
        state.closed = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_statements_on_current_connection() {
        let client = InMemoryColumnarClient::new();
        client.command("SELECT 1").await.unwrap();
        client.reconnect().await.unwrap();
        client.command("SELECT 2").await.unwrap();

        let statements = client.statements().await;
        assert_eq!(statements[0].connection, 1);
        assert_eq!(statements[1].connection, 2);
        assert_eq!(client.reconnects().await, 1);
    }

    #[tokio::test]
    async fn failure_rules_expire_after_their_count() {
        let client = InMemoryColumnarClient::new();
        client
            .fail_statements_containing("events", Some(1), || {
                ColumnarError::Connection("connection reset".into())
            })
            .await;

        assert!(client.command("DROP TABLE events").await.is_err());
        assert!(client.command("DROP TABLE events").await.is_ok());
        assert!(client.command("SELECT 1").await.is_ok());
        assert_eq!(client.executed_sql().await.len(), 2);
    }

    #[tokio::test]
    async fn failing_reconnect_keeps_old_connection() {
        let client = InMemoryColumnarClient::new();
        client.fail_reconnects().await;

        assert!(client.reconnect().await.is_err());
        client.command("SELECT 1").await.unwrap();
        assert_eq!(client.statements().await[0].connection, 1);
    }
}
