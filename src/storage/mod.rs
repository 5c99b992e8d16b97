pub mod file_store;
pub mod memory_store;
pub mod redis_store;

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::bridges::PendingRepair;
use crate::config::{StorageBackend, StorageConfig};
use crate::error::KeeperResult;
use crate::sync::RunState;

pub use file_store::FileRunStore;
pub use memory_store::MemoryRunStore;
pub use redis_store::RedisRunStore;

/// Durable log of synchronization runs
#[async_trait]
pub trait RunLogStore: Send + Sync + std::fmt::Debug {
    /// Insert or overwrite the record for `state.run_id`
    async fn save(&self, state: &RunState) -> KeeperResult<()>;

    async fn load(&self, run_id: Uuid) -> KeeperResult<Option<RunState>>;

    /// Every stored run, oldest first
    async fn list(&self) -> KeeperResult<Vec<RunState>>;

    /// Most recently started run that has not completed
    async fn latest_unfinished(&self) -> KeeperResult<Option<RunState>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|run| !run.is_finished())
            .max_by_key(|run| run.started_at))
    }
}

/// Durable log of route repairs between their removal and confirmed re-add, one per source chain
#[async_trait]
pub trait RepairLogStore: Send + Sync + std::fmt::Debug {
    /// Insert or overwrite the record for `repair.source_chain_id`
    async fn save_repair(&self, repair: &PendingRepair) -> KeeperResult<()>;

    /// Every open repair, oldest first
    async fn pending_repairs(&self) -> KeeperResult<Vec<PendingRepair>>;

    async fn clear_repair(&self, source_chain_id: u64) -> KeeperResult<()>;
}

/// Open the configured backend
pub async fn open_store(config: &StorageConfig) -> KeeperResult<Arc<dyn RunLogStore>> {
    let store: Arc<dyn RunLogStore> = match config.backend {
        StorageBackend::File => Arc::new(FileRunStore::new(&config.run_log_dir).await?),
        StorageBackend::Redis => Arc::new(RedisRunStore::new(&config.redis_url).await?),
        StorageBackend::Memory => Arc::new(MemoryRunStore::default()),
    };
    Ok(store)
}

/// Open the configured backend for route repairs
pub async fn open_repair_log(config: &StorageConfig) -> KeeperResult<Arc<dyn RepairLogStore>> {
    let store: Arc<dyn RepairLogStore> = match config.backend {
        StorageBackend::File => Arc::new(FileRunStore::new(&config.run_log_dir).await?),
        StorageBackend::Redis => Arc::new(RedisRunStore::new(&config.redis_url).await?),
        StorageBackend::Memory => Arc::new(MemoryRunStore::default()),
    };
    Ok(store)
}

fn sort_repairs(repairs: &mut [PendingRepair]) {
    repairs.sort_by_key(|repair| repair.started_at);
}

fn sort_runs(runs: &mut [RunState]) {
    runs.sort_by_key(|run| run.started_at);
}
