use async_trait::async_trait;
use redis::{AsyncCommands, Client as RedisClient};
use tracing::{info, warn};
use uuid::Uuid;

use super::{sort_repairs, sort_runs, RepairLogStore, RunLogStore};
use crate::bridges::PendingRepair;
use crate::constants::{REDIS_REPAIR_KEY, REDIS_RUN_KEY_PREFIX};
use crate::error::KeeperResult;
use crate::sync::RunState;

/// Run log in Redis: one hash field per run under a single key, pending
/// route repairs likewise under a second key
#[derive(Debug, Clone)]
pub struct RedisRunStore {
    client: RedisClient,
    key: String,
    repair_key: String,
}

impl RedisRunStore {
    pub async fn new(redis_url: &str) -> KeeperResult<Self> {
        let client = RedisClient::open(redis_url)?;
        // fail fast on a bad URL or an unreachable server
        let mut conn = client.get_async_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("📦 Redis run log connected: {}", redis_url);

        Ok(Self {
            client,
            key: REDIS_RUN_KEY_PREFIX.to_string(),
            repair_key: REDIS_REPAIR_KEY.to_string(),
        })
    }

    async fn conn(&self) -> KeeperResult<redis::aio::Connection> {
        Ok(self.client.get_async_connection().await?)
    }
}

#[async_trait]
impl RunLogStore for RedisRunStore {
    async fn save(&self, state: &RunState) -> KeeperResult<()> {
        let value = serde_json::to_string(state)?;
        let mut conn = self.conn().await?;
        let _: () = conn.hset(&self.key, state.run_id.to_string(), value).await?;
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> KeeperResult<Option<RunState>> {
        let mut conn = self.conn().await?;
        let raw: Option<String> = conn.hget(&self.key, run_id.to_string()).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> KeeperResult<Vec<RunState>> {
        let mut conn = self.conn().await?;
        let raw: Vec<String> = conn.hvals(&self.key).await?;
        let mut runs = Vec::with_capacity(raw.len());
        for s in raw {
            match serde_json::from_str::<RunState>(&s) {
                Ok(run) => runs.push(run),
                Err(e) => warn!("⚠️ skipping unreadable run record in {}: {}", self.key, e),
            }
        }
        sort_runs(&mut runs);
        Ok(runs)
    }
}

#[async_trait]
impl RepairLogStore for RedisRunStore {
    async fn save_repair(&self, repair: &PendingRepair) -> KeeperResult<()> {
        let value = serde_json::to_string(repair)?;
        let mut conn = self.conn().await?;
        let _: () = conn
            .hset(&self.repair_key, repair.source_chain_id.to_string(), value)
            .await?;
        Ok(())
    }

    async fn pending_repairs(&self) -> KeeperResult<Vec<PendingRepair>> {
        let mut conn = self.conn().await?;
        let raw: Vec<String> = conn.hvals(&self.repair_key).await?;
        let mut repairs = Vec::with_capacity(raw.len());
        for s in raw {
            match serde_json::from_str::<PendingRepair>(&s) {
                Ok(repair) => repairs.push(repair),
                Err(e) => warn!("⚠️ skipping unreadable repair record in {}: {}", self.repair_key, e),
            }
        }
        sort_repairs(&mut repairs);
        Ok(repairs)
    }

    async fn clear_repair(&self, source_chain_id: u64) -> KeeperResult<()> {
        let mut conn = self.conn().await?;
        let _: () = conn.hdel(&self.repair_key, source_chain_id.to_string()).await?;
        Ok(())
    }
}
