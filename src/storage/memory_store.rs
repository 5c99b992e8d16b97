use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{sort_repairs, sort_runs, RepairLogStore, RunLogStore};
use crate::bridges::PendingRepair;
use crate::error::KeeperResult;
use crate::sync::RunState;

/// Run log kept in process memory. Used in mock mode and in tests.
#[derive(Debug, Default)]
pub struct MemoryRunStore {
    runs: RwLock<HashMap<Uuid, RunState>>,
    repairs: RwLock<HashMap<u64, PendingRepair>>,
}

#[async_trait]
impl RunLogStore for MemoryRunStore {
    async fn save(&self, state: &RunState) -> KeeperResult<()> {
        self.runs.write().await.insert(state.run_id, state.clone());
        Ok(())
    }

    async fn load(&self, run_id: Uuid) -> KeeperResult<Option<RunState>> {
        Ok(self.runs.read().await.get(&run_id).cloned())
    }

    async fn list(&self) -> KeeperResult<Vec<RunState>> {
        let mut runs: Vec<RunState> = self.runs.read().await.values().cloned().collect();
        sort_runs(&mut runs);
        Ok(runs)
    }
}

#[async_trait]
impl RepairLogStore for MemoryRunStore {
    async fn save_repair(&self, repair: &PendingRepair) -> KeeperResult<()> {
        self.repairs
            .write()
            .await
            .insert(repair.source_chain_id, repair.clone());
        Ok(())
    }

    async fn pending_repairs(&self) -> KeeperResult<Vec<PendingRepair>> {
        let mut repairs: Vec<PendingRepair> = self.repairs.read().await.values().cloned().collect();
        sort_repairs(&mut repairs);
        Ok(repairs)
    }

    async fn clear_repair(&self, source_chain_id: u64) -> KeeperResult<()> {
        self.repairs.write().await.remove(&source_chain_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn run_started(minutes_ago: i64) -> RunState {
        let mut run = RunState::new(&[(1, "ethereum".to_string())]);
        run.started_at = run.started_at - Duration::minutes(minutes_ago);
        run
    }

    #[test]
    fn test_latest_unfinished_skips_completed_runs() {
        tokio_test::block_on(async {
            let store = MemoryRunStore::default();
            let older = run_started(30);
            let mut newest = run_started(1);
            newest.complete();
            let mut halted = run_started(10);
            halted.halt("arbitrum(42161): consensus not reached");

            for run in [&older, &newest, &halted] {
                store.save(run).await.unwrap();
            }

            let latest = store.latest_unfinished().await.unwrap().unwrap();
            assert_eq!(latest.run_id, halted.run_id);

            let listed: Vec<Uuid> = store.list().await.unwrap().iter().map(|r| r.run_id).collect();
            assert_eq!(listed, vec![older.run_id, halted.run_id, newest.run_id]);
            assert_eq!(store.load(newest.run_id).await.unwrap(), Some(newest.clone()));
        });
    }
}
