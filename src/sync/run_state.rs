use std::fmt;

use chrono::{DateTime, Utc};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Steps of one synchronization run, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SyncStep {
    Idle,
    PausingAll,
    ComputingGlobalPrice,
    PropagatingPrice,
    SettlingWithdrawals,
    Resuming,
    Completed,
}

impl SyncStep {
    pub fn next(self) -> Self {
        match self {
            SyncStep::Idle => SyncStep::PausingAll,
            SyncStep::PausingAll => SyncStep::ComputingGlobalPrice,
            SyncStep::ComputingGlobalPrice => SyncStep::PropagatingPrice,
            SyncStep::PropagatingPrice => SyncStep::SettlingWithdrawals,
            SyncStep::SettlingWithdrawals => SyncStep::Resuming,
            SyncStep::Resuming | SyncStep::Completed => SyncStep::Completed,
        }
    }
}

impl fmt::Display for SyncStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SyncStep::Idle => "Idle",
            SyncStep::PausingAll => "PausingAll",
            SyncStep::ComputingGlobalPrice => "ComputingGlobalPrice",
            SyncStep::PropagatingPrice => "PropagatingPrice",
            SyncStep::SettlingWithdrawals => "SettlingWithdrawals",
            SyncStep::Resuming => "Resuming",
            SyncStep::Completed => "Completed",
        };
        write!(f, "{}", name)
    }
}

/// Last stage a chain completed in the current run
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ChainStage {
    Pending,
    Paused,
    PriceApplied,
    Settled,
    Resumed,
}

impl fmt::Display for ChainStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChainStage::Pending => write!(f, "pending"),
            ChainStage::Paused => write!(f, "paused"),
            ChainStage::PriceApplied => write!(f, "price applied"),
            ChainStage::Settled => write!(f, "settled"),
            ChainStage::Resumed => write!(f, "resumed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainProgress {
    pub chain_id: u64,
    pub chain_name: String,
    pub stage: ChainStage,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "reason")]
pub enum RunStatus {
    Running,
    Halted(String),
    Completed,
}

/// Persisted record of one synchronization run.
///
/// Written after every chain-level step so a crashed or halted run can be resumed
/// from exactly where it stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: Uuid,
    /// Round (and epoch) every chain ends at; fixed when the run leaves `Idle`
    pub target_round: u64,
    /// Global share price, set once and never recomputed
    pub price: Option<U256>,
    pub step: SyncStep,
    pub progress: Vec<ChainProgress>,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunState {
    /// `chains` in sync order, primary first
    pub fn new(chains: &[(u64, String)]) -> Self {
        let now = Utc::now();
        Self {
            run_id: Uuid::new_v4(),
            target_round: 0,
            price: None,
            step: SyncStep::Idle,
            progress: chains
                .iter()
                .map(|(chain_id, name)| ChainProgress {
                    chain_id: *chain_id,
                    chain_name: name.clone(),
                    stage: ChainStage::Pending,
                })
                .collect(),
            status: RunStatus::Running,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn stage_of(&self, chain_id: u64) -> ChainStage {
        self.progress_of(chain_id).map(|p| p.stage).unwrap_or(ChainStage::Pending)
    }

    /// Record that `chain_id` reached `stage`. Stages never move backwards.
    pub fn mark(&mut self, chain_id: u64, stage: ChainStage) {
        if let Some(p) = self.progress.iter_mut().find(|p| p.chain_id == chain_id) {
            if stage > p.stage {
                p.stage = stage;
            }
        }
        self.touch();
    }

    pub fn enter(&mut self, step: SyncStep) {
        if step > self.step {
            self.step = step;
        }
        self.touch();
    }

    pub fn set_target(&mut self, target_round: u64) {
        self.target_round = target_round;
        self.touch();
    }

    pub fn progress_of(&self, chain_id: u64) -> Option<&ChainProgress> {
        self.progress.iter().find(|p| p.chain_id == chain_id)
    }

    pub fn set_price(&mut self, price: U256) {
        self.price = Some(price);
        self.touch();
    }

    pub fn halt(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Halted(reason.into());
        self.touch();
    }

    /// Halted runs become resumable again
    pub fn resume(&mut self) {
        self.status = RunStatus::Running;
        self.touch();
    }

    pub fn complete(&mut self) {
        self.step = SyncStep::Completed;
        self.status = RunStatus::Completed;
        self.touch();
    }

    pub fn is_finished(&self) -> bool {
        self.status == RunStatus::Completed
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chains() -> Vec<(u64, String)> {
        vec![(1, "ethereum".to_string()), (8453, "base".to_string())]
    }

    #[test]
    fn test_step_order() {
        let mut step = SyncStep::Idle;
        let mut seen = vec![step];
        while step != SyncStep::Completed {
            step = step.next();
            seen.push(step);
        }
        assert_eq!(seen.len(), 7);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_stages_never_regress() {
        let mut state = RunState::new(&chains());
        state.mark(8453, ChainStage::PriceApplied);
        state.mark(8453, ChainStage::Paused);
        assert_eq!(state.stage_of(8453), ChainStage::PriceApplied);
        assert_eq!(state.stage_of(1), ChainStage::Pending);

        state.enter(SyncStep::SettlingWithdrawals);
        state.enter(SyncStep::PausingAll);
        assert_eq!(state.step, SyncStep::SettlingWithdrawals);
    }

    #[test]
    fn test_serialized_state_keeps_price() {
        let mut state = RunState::new(&chains());
        state.set_price(U256::from(1_050_000_000_000_000_000u64));
        state.halt("base(8453): consensus not reached");

        let json = serde_json::to_string(&state).unwrap();
        let back: RunState = serde_json::from_str(&json).unwrap();
        assert_eq!(back, state);
        assert!(!back.is_finished());
    }
}
