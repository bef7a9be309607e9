use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_postgres::{Client, NoTls};
use tracing::error;

use crate::error::StoreError;
use crate::storage::DedupStore;
use crate::types::RunId;

/// Idempotent DDL for the call-record table.
const CREATE_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS webhook_stats (
    webhook TEXT NOT NULL,
    run_id TEXT NOT NULL,
    invoke_count BIGINT NOT NULL DEFAULT 0,
    PRIMARY KEY (webhook, run_id)
);
";

const UPSERT_CALL: &str = "INSERT INTO webhook_stats (webhook, run_id, invoke_count)
     VALUES ($1, $2, 1)
     ON CONFLICT (webhook, run_id)
     DO UPDATE SET invoke_count = webhook_stats.invoke_count + 1";

const SELECT_COUNT: &str =
    "SELECT invoke_count FROM webhook_stats WHERE webhook = $1 AND run_id = $2";

/// Postgres-backed call tracking, shared by every replica pointed at the
/// same database.
pub struct PostgresStore {
    // Transactions need `&mut Client`.
    client: Mutex<Client>,
}

impl PostgresStore {
    /// Connect using a libpq-style string or `postgresql://` URI and create
    /// the table if needed.
    pub async fn connect(db_url: &str) -> Result<Self, StoreError> {
        let (client, connection) = tokio_postgres::connect(db_url, NoTls).await?;
        tokio::spawn(async move {
            if let Err(err) = connection.await {
                error!(error = %err, "postgres connection closed");
            }
        });
        Self::new(client).await
    }

    pub async fn new(client: Client) -> Result<Self, StoreError> {
        client.batch_execute(CREATE_TABLE).await?;
        Ok(Self {
            client: Mutex::new(client),
        })
    }
}

#[async_trait]
impl DedupStore for PostgresStore {
    async fn increment(&self, callback: &str, run_id: &RunId) -> Result<u64, StoreError> {
        let mut client = self.client.lock().await;
        let tx = client.transaction().await?;

        tx.execute(UPSERT_CALL, &[&callback, &run_id.0]).await?;
        let row = tx.query_one(SELECT_COUNT, &[&callback, &run_id.0]).await?;
        let count: i64 = row.try_get(0)?;

        tx.commit().await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn has_been_called(&self, callback: &str, run_id: &RunId) -> Result<bool, StoreError> {
        let client = self.client.lock().await;
        let row = client.query_opt(SELECT_COUNT, &[&callback, &run_id.0]).await?;

        match row {
            Some(row) => Ok(row.try_get::<_, i64>(0)? > 0),
            None => Ok(false),
        }
    }
}
