//! Retry logic and cluster rewriting for columnar statements.

use async_trait::async_trait;
use log::{debug, error, warn};
use serde_json::Value;
use tokio::time::{Duration, sleep};

use tandem_core::prelude::*;

use crate::cluster::{ClusterRewriter, split_statements};
use crate::config::RetryConfig;

/// Calculates the delay before retrying after failed attempt `attempt`
/// (0-indexed) using exponential backoff.
///
/// The delay doubles with each attempt, starting from `initial_delay`, and is
/// capped at `max_delay`.
pub fn retry_delay(config: &RetryConfig, attempt: u32) -> Duration {
    let initial_ms = config.initial_delay.as_millis() as u64;
    let max_ms = config.max_delay.as_millis() as u64;

    // Cap attempt at 63 to prevent 2^attempt from overflowing u64
    let multiplier = 2u64.saturating_pow(attempt.min(63));
    Duration::from_millis(initial_ms.saturating_mul(multiplier).min(max_ms))
}

/// A columnar client that rewrites DDL for the configured cluster and retries
/// transient connection failures.
///
/// Multi-statement scripts are split and sent one statement at a time since
/// the wire protocol executes a single statement per request. Each statement
/// is retried on its own; a statement that keeps failing stops the script.
///
/// Implements [`ColumnarClient`], so migrations receive it wherever a raw
/// client is expected.
pub struct ClusterAwareClient<'a> {
    inner: &'a dyn ColumnarClient,
    rewriter: &'a ClusterRewriter,
    retry: &'a RetryConfig,
    migration_name: &'a str,
}

impl<'a> ClusterAwareClient<'a> {
    /// Wraps `inner` for the migration named `migration_name`.
    pub fn new(
        inner: &'a dyn ColumnarClient,
        rewriter: &'a ClusterRewriter,
        retry: &'a RetryConfig,
        migration_name: &'a str,
    ) -> Self {
        Self {
            inner,
            rewriter,
            retry,
            migration_name,
        }
    }

    async fn execute_with_retry(
        &self,
        statement: &str,
        params: &Parameters,
    ) -> Result<CommandOutput, ColumnarError> {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            let error = match self.inner.execute_statement(statement, params).await {
                Ok(output) => {
                    if attempt > 0 {
                        debug!(
                            "Statement of migration '{}' succeeded after {} retries",
                            self.migration_name, attempt
                        );
                    }
                    return Ok(output);
                }
                Err(error) => error,
            };

            if !error.is_transient() {
                return Err(error);
            }
            if attempt + 1 >= max_attempts {
                error!(
                    "Statement of migration '{}' failed after {} attempts: {}",
                    self.migration_name, max_attempts, error
                );
                return Err(error);
            }

            let delay = retry_delay(self.retry, attempt);
            warn!(
                "Connection error in migration '{}' (attempt {}/{}): {}. Reconnecting and retrying in {:?}",
                self.migration_name,
                attempt + 1,
                max_attempts,
                error,
                delay
            );
            if let Err(reconnect_error) = self.inner.reconnect().await {
                warn!(
                    "Reconnect failed in migration '{}', retrying on the current connection: {}",
                    self.migration_name, reconnect_error
                );
            }
            sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl ColumnarClient for ClusterAwareClient<'_> {
    /// Rewrites `sql`, then executes its statements in order. Returns the
    /// output of the last statement, `Null` for an empty script.
    async fn execute_statement(
        &self,
        sql: &str,
        params: &Parameters,
    ) -> Result<CommandOutput, ColumnarError> {
        let rewritten = self.rewriter.rewrite(sql, self.migration_name);

        let mut output = Value::Null;
        for statement in split_statements(&rewritten) {
            output = self.execute_with_retry(&statement, params).await?;
        }
        Ok(output)
    }

    async fn ping(&self) -> Result<(), ColumnarError> {
        self.inner.ping().await
    }

    async fn close(&self) -> Result<(), ColumnarError> {
        self.inner.close().await
    }

    async fn reconnect(&self) -> Result<(), ColumnarError> {
        self.inner.reconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;
    use tandem_mem::InMemoryColumnarClient;

    fn transient() -> ColumnarError {
        ColumnarError::Other("Connection refused (os error 111)".into())
    }

    #[test]
    fn retry_delay_calculation_exponential_backoff() {
        let config = RetryConfig::default();

        assert_eq!(retry_delay(&config, 0), Duration::from_secs(2));
        assert_eq!(retry_delay(&config, 1), Duration::from_secs(4));
        assert_eq!(retry_delay(&config, 2), Duration::from_secs(8));
    }

    #[test]
    fn retry_delay_handles_large_attempt_numbers() {
        let config = RetryConfig::default();
        assert_eq!(retry_delay(&config, 100), Duration::from_secs(60));
    }

    #[test]
    fn retry_delay_with_millisecond_precision() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            ..Default::default()
        };
        assert_eq!(retry_delay(&config, 0), Duration::from_millis(100));
        assert_eq!(retry_delay(&config, 1), Duration::from_millis(200));
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried_on_a_fresh_connection() {
        let client = InMemoryColumnarClient::new();
        client
            .fail_statements_containing("events", Some(1), transient)
            .await;
        let rewriter = ClusterRewriter::default();
        let retry = RetryConfig::default();
        let wrapper = ClusterAwareClient::new(&client, &rewriter, &retry, "create_events");

        wrapper.command("DROP TABLE db.events").await.unwrap();

        let statements = client.statements().await;
        assert_eq!(statements.len(), 2);
        assert!(statements[0].failed);
        assert_eq!(statements[0].connection, 1);
        assert!(!statements[1].failed);
        assert_eq!(statements[1].connection, 2);
        assert_eq!(client.reconnects().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts_with_doubling_delays() {
        let client = InMemoryColumnarClient::new();
        client.fail_statements_containing("events", None, transient).await;
        let rewriter = ClusterRewriter::default();
        let retry = RetryConfig::default();
        let wrapper = ClusterAwareClient::new(&client, &rewriter, &retry, "create_events");

        let started = tokio::time::Instant::now();
        let error = wrapper.command("DROP TABLE db.events").await.unwrap_err();
        let elapsed = started.elapsed();

        assert!(error.is_transient());
        let statements = client.statements().await;
        assert_eq!(statements.len(), 3);
        assert!(statements.iter().all(|s| s.failed));
        assert_eq!(
            statements.iter().map(|s| s.connection).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        // 2s after the first failure, 4s after the second, none after the last
        assert_eq!(elapsed, Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_reconnect_still_retries() {
        let client = InMemoryColumnarClient::new();
        client
            .fail_statements_containing("events", Some(1), transient)
            .await;
        client.fail_reconnects().await;
        let rewriter = ClusterRewriter::default();
        let retry = RetryConfig::default();
        let wrapper = ClusterAwareClient::new(&client, &rewriter, &retry, "m");

        wrapper.command("SELECT count() FROM events").await.unwrap();

        let statements = client.statements().await;
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[1].connection, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_transient_errors_propagate_immediately() {
        let client = InMemoryColumnarClient::new();
        client
            .fail_statements_containing("events", None, || ColumnarError::Server {
                code: 62,
                message: "Syntax error".into(),
            })
            .await;
        let rewriter = ClusterRewriter::default();
        let retry = RetryConfig::default();
        let wrapper = ClusterAwareClient::new(&client, &rewriter, &retry, "m");

        let error = wrapper.command("CREATE TABLE events").await.unwrap_err();

        assert!(matches!(error, ColumnarError::Server { code: 62, .. }));
        assert_eq!(client.statements().await.len(), 1);
        assert_eq!(client.reconnects().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn statements_are_split_rewritten_and_sent_in_order() {
        let client = InMemoryColumnarClient::new();
        let rewriter = ClusterRewriter::new(ClusterConfig::new("prod", ["a", "b"]));
        let retry = RetryConfig::default();
        let wrapper = ClusterAwareClient::new(&client, &rewriter, &retry, "m");

        let output = wrapper
            .command("ALTER TABLE db.t ADD COLUMN a UInt8; INSERT INTO db.t VALUES (1);")
            .await
            .unwrap();

        assert_eq!(output, serde_json::json!({ "connection": 1 }));
        assert_eq!(client.executed_sql().await, vec![
            "ALTER TABLE db.t ON CLUSTER 'prod' ADD COLUMN a UInt8".to_string(),
            "INSERT INTO db.t VALUES (1)".to_string(),
        ]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_statement_stops_the_script() {
        let client = InMemoryColumnarClient::new();
        client
            .fail_statements_containing("second", None, || ColumnarError::Server {
                code: 60,
                message: "Table second doesn't exist".into(),
            })
            .await;
        let rewriter = ClusterRewriter::default();
        let retry = RetryConfig::default();
        let wrapper = ClusterAwareClient::new(&client, &rewriter, &retry, "m");

        let result = wrapper
            .command("SELECT 1 FROM first; SELECT 1 FROM second; SELECT 1 FROM third")
            .await;

        assert!(result.is_err());
        assert_eq!(client.executed_sql().await, vec!["SELECT 1 FROM first".to_string()]);
    }

    #[tokio::test]
    async fn empty_script_returns_null() {
        let client = InMemoryColumnarClient::new();
        let rewriter = ClusterRewriter::default();
        let retry = RetryConfig::default();
        let wrapper = ClusterAwareClient::new(&client, &rewriter, &retry, "m");

        assert_eq!(wrapper.command(" ; ").await.unwrap(), Value::Null);
        assert!(client.statements().await.is_empty());
    }

    #[tokio::test]
    async fn lifecycle_calls_are_delegated() {
        let client = InMemoryColumnarClient::new();
        let rewriter = ClusterRewriter::default();
        let retry = RetryConfig::default();
        let wrapper = ClusterAwareClient::new(&client, &rewriter, &retry, "m");

        wrapper.ping().await.unwrap();
        wrapper.close().await.unwrap();

        assert_eq!(client.pings().await, 1);
        assert!(client.is_closed().await);
    }
}
