use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use crate::error::StoreError;
use crate::types::RunId;

/// Bookkeeping of callback invocations per (callback, run) pair.
///
/// Checking and incrementing are separate calls, so two concurrent deliveries
/// of the same run can both see "not called" and both fire. Closing that
/// window needs mutual exclusion across requests, which no backend provides.
#[async_trait]
pub trait DedupStore: Send + Sync {
    /// Record one invocation attempt and return the new count.
    ///
    /// Creates the record at 1 when absent.
    async fn increment(&self, callback: &str, run_id: &RunId) -> Result<u64, StoreError>;

    /// Whether any invocation attempt has been recorded for the pair.
    async fn has_been_called(&self, callback: &str, run_id: &RunId) -> Result<bool, StoreError>;
}

/// In-memory call tracking for single-process deployments.
///
/// Records live until the process exits. Counters are keyed by callback, then
/// by run id.
#[derive(Default)]
pub struct InMemoryStore {
    calls: RwLock<HashMap<String, HashMap<RunId, AtomicU64>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DedupStore for InMemoryStore {
    async fn increment(&self, callback: &str, run_id: &RunId) -> Result<u64, StoreError> {
        // Existing counters only need the shared lock.
        {
            let guard = self.calls.read().await;
            if let Some(count) = guard.get(callback).and_then(|runs| runs.get(run_id)) {
                return Ok(count.fetch_add(1, Ordering::SeqCst) + 1);
            }
        }

        let mut guard = self.calls.write().await;
        // Another caller may have created it between the two locks.
        let runs = guard.entry(callback.to_string()).or_default();
        if let Some(count) = runs.get(run_id) {
            return Ok(count.fetch_add(1, Ordering::SeqCst) + 1);
        }
        runs.insert(run_id.clone(), AtomicU64::new(1));
        Ok(1)
    }

    async fn has_been_called(&self, callback: &str, run_id: &RunId) -> Result<bool, StoreError> {
        let guard = self.calls.read().await;
        Ok(guard
            .get(callback)
            .is_some_and(|runs| runs.contains_key(run_id)))
    }
}

/// Select a backend: a database URL means Postgres, otherwise in-memory.
pub async fn open_store(db_url: Option<&str>) -> Result<Arc<dyn DedupStore>, StoreError> {
    match db_url.map(str::trim).filter(|url| !url.is_empty()) {
        None => {
            info!("no database url provided, using in-memory call tracking");
            Ok(Arc::new(InMemoryStore::new()))
        }
        #[cfg(feature = "postgres")]
        Some(url) => {
            let store = crate::storage_postgres::PostgresStore::connect(url).await?;
            info!("using postgres call tracking");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        Some(_) => Err(StoreError::Unsupported("postgres")),
    }
}
