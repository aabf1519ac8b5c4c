//! # Billing module example
//!
//! Runs two migrations of a `billing` module against the in-memory backends
//! with a three node cluster configured: a document migration creating the
//! invoices collection and a columnar migration creating the totals table.
//! The columnar DDL is written for a single node and rewritten on the way
//! out.
//!
//! ```text
//! cargo run -p tandem --example billing --features in-memory
//! ```

use async_trait::async_trait;
use tandem::prelude::*;

struct CreateInvoices;

impl MigrationInfo for CreateInvoices {
    fn name(&self) -> &'static str {
        "create_invoices"
    }

    fn category(&self) -> MigrationCategory {
        MigrationCategory::Init
    }

    fn order(&self) -> i64 {
        10
    }
}

#[async_trait]
impl DocumentMigration for CreateInvoices {
    async fn run(&self, db: &dyn DocumentStore) -> Result<(), BoxError> {
        db.create_collection("invoices").await?;
        db.create_index(
            "invoices",
            IndexSpec::new("invoices_number_unique", &["number"]).unique(),
        )
        .await?;
        Ok(())
    }
}

struct CreateTotals;

const CREATE_TOTALS: &str = "
CREATE TABLE IF NOT EXISTS billing.totals (
    day Date,
    amount Decimal(18, 2)
) ENGINE = SummingMergeTree(amount)
ORDER BY day;
";

impl MigrationInfo for CreateTotals {
    fn name(&self) -> &'static str {
        "create_totals"
    }

    fn order(&self) -> i64 {
        20
    }

    fn source(&self) -> Option<&'static str> {
        Some(CREATE_TOTALS)
    }
}

#[async_trait]
impl ColumnarMigration for CreateTotals {
    async fn run(&self, db: &dyn ColumnarClient) -> Result<(), BoxError> {
        db.command(CREATE_TOTALS).await?;
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = MigrationConfig {
        cluster: ClusterConfig::new("billing_cluster", ["ch-1:9000", "ch-2:9000", "ch-3:9000"]),
        ..Default::default()
    };
    let mut manager = MigrationManager::new(config, MigrationRegistry::collected());
    manager.add_migration("billing", "20250601", MigrationScript::document(CreateInvoices));
    manager.add_migration("billing", "20250601", MigrationScript::columnar(CreateTotals));

    let documents = InMemoryDocumentStore::new();
    let columnar = InMemoryColumnarClient::new();

    let executed = manager
        .run_pending_migrations(&documents, Some(&columnar))
        .await?;
    println!("Executed {executed} migrations");

    for sql in columnar.executed_sql().await {
        println!("Sent to the cluster:\n{sql}\n");
    }

    let again = manager
        .run_pending_migrations(&documents, Some(&columnar))
        .await?;
    println!("Second run executed {again} migrations");

    for record in manager.applied(&documents, RecordFilter::default()).await? {
        println!(
            "{} [{}] success={} in {:.2}ms",
            record.key(),
            record.database_kind,
            record.success,
            record.execution_time_ms
        );
    }

    Ok(())
}
