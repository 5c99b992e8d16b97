use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{sort_repairs, sort_runs, RepairLogStore, RunLogStore};
use crate::bridges::PendingRepair;
use crate::constants::REPAIR_LOG_SUBDIR;
use crate::error::KeeperResult;
use crate::sync::RunState;

/// One JSON file per run under a directory, pending route repairs in a subdirectory
#[derive(Debug, Clone)]
pub struct FileRunStore {
    dir: PathBuf,
}

impl FileRunStore {
    pub async fn new(dir: impl AsRef<Path>) -> KeeperResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await?;
        debug!("📁 run log directory: {}", dir.display());
        Ok(Self { dir })
    }

    fn path_of(&self, run_id: Uuid) -> PathBuf {
        self.dir.join(format!("{}.json", run_id))
    }

    fn repair_dir(&self) -> PathBuf {
        self.dir.join(REPAIR_LOG_SUBDIR)
    }

    fn repair_path(&self, source_chain_id: u64) -> PathBuf {
        self.repair_dir().join(format!("{}.json", source_chain_id))
    }
}

async fn write_atomic(path: &Path, body: Vec<u8>) -> KeeperResult<()> {
    let tmp = path.with_extension("json.tmp");
    // rename is atomic, a crash never leaves a half-written record
    fs::write(&tmp, body).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl RunLogStore for FileRunStore {
    async fn save(&self, state: &RunState) -> KeeperResult<()> {
        let body = serde_json::to_vec_pretty(state)?;
        write_atomic(&self.path_of(state.run_id), body).await
    }

    async fn load(&self, run_id: Uuid) -> KeeperResult<Option<RunState>> {
        let path = self.path_of(run_id);
        if !fs::try_exists(&path).await? {
            return Ok(None);
        }
        let body = fs::read(&path).await?;
        Ok(Some(serde_json::from_slice(&body)?))
    }

    async fn list(&self) -> KeeperResult<Vec<RunState>> {
        let mut runs = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let body = fs::read(&path).await?;
            match serde_json::from_slice::<RunState>(&body) {
                Ok(run) => runs.push(run),
                Err(e) => warn!("⚠️ skipping unreadable run record {}: {}", path.display(), e),
            }
        }
        sort_runs(&mut runs);
        Ok(runs)
    }
}

#[async_trait]
impl RepairLogStore for FileRunStore {
    async fn save_repair(&self, repair: &PendingRepair) -> KeeperResult<()> {
        fs::create_dir_all(self.repair_dir()).await?;
        let body = serde_json::to_vec_pretty(repair)?;
        write_atomic(&self.repair_path(repair.source_chain_id), body).await
    }

    async fn pending_repairs(&self) -> KeeperResult<Vec<PendingRepair>> {
        let dir = self.repair_dir();
        if !fs::try_exists(&dir).await? {
            return Ok(Vec::new());
        }

        let mut repairs = Vec::new();
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let body = fs::read(&path).await?;
            match serde_json::from_slice::<PendingRepair>(&body) {
                Ok(repair) => repairs.push(repair),
                Err(e) => warn!("⚠️ skipping unreadable repair record {}: {}", path.display(), e),
            }
        }
        sort_repairs(&mut repairs);
        Ok(repairs)
    }

    async fn clear_repair(&self, source_chain_id: u64) -> KeeperResult<()> {
        let path = self.repair_path(source_chain_id);
        if fs::try_exists(&path).await? {
            fs::remove_file(&path).await?;
        }
        Ok(())
    }
}
