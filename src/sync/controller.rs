use std::sync::Arc;

use tracing::{error, info, warn};

use super::policy::SyncPolicy;
use super::price::{NavPerShare, SharePriceModel};
use super::run_state::{ChainStage, RunState, SyncStep};
use crate::blockchain::{ChainHandle, ChainRegistry, ConfirmationPolicy, VerifiedReader};
use crate::error::{KeeperError, KeeperResult, NodeError};
use crate::storage::RunLogStore;

/// Round synchronization controller.
///
/// Drives pause -> price -> settlement -> resume across every chain. Each write is
/// preceded by a quorum read of the current state and skipped when already done,
/// and every step is persisted so a halted run resumes where it stopped. Nothing is
/// ever rolled back.
#[derive(Debug)]
pub struct RoundSyncController {
    registry: Arc<ChainRegistry>,
    reads: VerifiedReader,
    confirmation: ConfirmationPolicy,
    price_model: Arc<dyn SharePriceModel>,
    store: Arc<dyn RunLogStore>,
}

impl RoundSyncController {
    pub fn new(registry: Arc<ChainRegistry>, policy: &SyncPolicy, store: Arc<dyn RunLogStore>) -> Self {
        Self {
            registry,
            reads: policy.reader(),
            confirmation: policy.confirmation,
            price_model: Arc::new(NavPerShare),
            store,
        }
    }

    pub fn with_price_model(mut self, price_model: Arc<dyn SharePriceModel>) -> Self {
        self.price_model = price_model;
        self
    }

    /// Resume the latest unfinished run, or start a new one
    pub async fn run(&self) -> KeeperResult<RunState> {
        let mut state = match self.store.latest_unfinished().await? {
            Some(mut state) => {
                info!(
                    "♻️ resuming run {} at {} (target round {})",
                    state.run_id, state.step, state.target_round
                );
                state.resume();
                state
            }
            None => {
                let chains: Vec<(u64, String)> = self
                    .registry
                    .sync_order()
                    .iter()
                    .map(|c| (c.chain_id(), c.name().to_string()))
                    .collect();
                let state = RunState::new(&chains);
                info!("🚀 starting run {} over {} chains", state.run_id, chains.len());
                state
            }
        };
        self.store.save(&state).await?;

        match self.drive(&mut state).await {
            Ok(()) => {
                state.complete();
                self.store.save(&state).await?;
                info!("🎉 run {} completed: every chain at round/epoch {}", state.run_id, state.target_round);
                Ok(state)
            }
            Err(cause) => {
                error!("🛑 run {} halted during {}: {}", state.run_id, state.step, cause);
                state.halt(cause.to_string());
                if let Err(e) = self.store.save(&state).await {
                    error!("❌ failed to persist halted run {}: {}", state.run_id, e);
                }
                Err(KeeperError::PartialRunHalted {
                    run_id: state.run_id,
                    step: state.step,
                    progress: state.progress.clone(),
                    cause: Box::new(cause),
                })
            }
        }
    }

    async fn drive(&self, state: &mut RunState) -> KeeperResult<()> {
        loop {
            match state.step {
                SyncStep::Idle => self.establish_target(state).await?,
                SyncStep::PausingAll => self.pause_all(state).await?,
                SyncStep::ComputingGlobalPrice => self.compute_price(state).await?,
                SyncStep::PropagatingPrice => self.propagate_price(state).await?,
                SyncStep::SettlingWithdrawals => self.settle_all(state).await?,
                SyncStep::Resuming => self.resume_all(state).await?,
                SyncStep::Completed => return Ok(()),
            }
            state.enter(state.step.next());
            self.store.save(state).await?;
            info!("➡️ run {} entering {}", state.run_id, state.step);
        }
    }

    /// Every chain must sit at the same round R with epoch R; the run targets R + 1
    async fn establish_target(&self, state: &mut RunState) -> KeeperResult<()> {
        let mut observed = Vec::new();
        for chain in self.registry.sync_order() {
            let round = self.reads.round(chain).await?;
            let epoch = self.reads.epoch(chain).await?;
            observed.push((chain.label(), round, epoch));
        }

        let base = observed[0].1;
        if observed.iter().any(|(_, round, epoch)| *round != base || *epoch != base) {
            return Err(KeeperError::RoundDivergence { observed });
        }

        state.set_target(base + 1);
        info!("🎯 run {}: all chains at round {}, targeting {}", state.run_id, base, base + 1);
        Ok(())
    }

    async fn pause_all(&self, state: &mut RunState) -> KeeperResult<()> {
        for chain in self.registry.sync_order() {
            if state.stage_of(chain.chain_id()) >= ChainStage::Paused {
                continue;
            }

            if self.reads.paused(chain).await? {
                info!("⏸️ {} already paused", chain.label());
            } else {
                chain
                    .writer
                    .set_paused(true)
                    .await
                    .map_err(|e| write_failed(chain, "pause", e))?;
                self.confirm_paused(chain, true).await?;
                info!("⏸️ {} paused", chain.label());
            }

            state.mark(chain.chain_id(), ChainStage::Paused);
            self.store.save(state).await?;
        }
        Ok(())
    }

    async fn compute_price(&self, state: &mut RunState) -> KeeperResult<()> {
        if let Some(price) = state.price {
            info!("💾 run {} reuses persisted price {}", state.run_id, price);
            return Ok(());
        }

        let primary = self.registry.primary();
        // a primary already past the target without a stored price means the record was lost
        let round = self.reads.round(primary).await?;
        if round >= state.target_round {
            return Err(KeeperError::MissingPrice(state.run_id));
        }

        let aggregate = self.reads.aggregate(primary).await?;
        let price = self.price_model.share_price(&aggregate)?;
        info!(
            "💰 {} price {} (staked {}, pending {}, supply {}) via {}",
            primary.label(),
            price,
            aggregate.staked_total,
            aggregate.pending_total,
            aggregate.supply_total,
            self.price_model.name()
        );

        state.set_price(price);
        self.store.save(state).await?;
        Ok(())
    }

    async fn propagate_price(&self, state: &mut RunState) -> KeeperResult<()> {
        let price = state.price.ok_or(KeeperError::MissingPrice(state.run_id))?;
        let target = state.target_round;

        for chain in self.registry.sync_order() {
            if state.stage_of(chain.chain_id()) >= ChainStage::PriceApplied {
                continue;
            }

            let operation = if chain.is_primary() { "rollPrimary" } else { "applySecondaryPrice" };
            let round = self.reads.round(chain).await?;
            if round == target {
                info!("📈 {} already at round {}", chain.label(), target);
            } else {
                expect_counter(chain, "round", target - 1, round)?;
                let submitted = if chain.is_primary() {
                    chain.writer.roll_primary(price).await
                } else {
                    chain.writer.apply_secondary_price(price).await
                };
                submitted.map_err(|e| write_failed(chain, operation, e))?;

                let new_round = self
                    .reads
                    .wait_until(
                        chain,
                        "currentRound",
                        |node| async move { node.current_round().await },
                        &self.confirmation,
                        operation,
                        &format!("round {}", target),
                        |observed| *observed != round,
                    )
                    .await?;
                expect_counter(chain, "round", target, new_round)?;
                info!("📈 {} {} -> round {}", chain.label(), operation, new_round);
            }

            state.mark(chain.chain_id(), ChainStage::PriceApplied);
            self.store.save(state).await?;
        }
        Ok(())
    }

    async fn settle_all(&self, state: &mut RunState) -> KeeperResult<()> {
        let target = state.target_round;

        for chain in self.registry.sync_order() {
            if state.stage_of(chain.chain_id()) >= ChainStage::Settled {
                continue;
            }

            let epoch = self.reads.epoch(chain).await?;
            if epoch == target {
                info!("🏦 {} already at epoch {}", chain.label(), target);
            } else {
                expect_counter(chain, "epoch", target - 1, epoch)?;
                chain
                    .writer
                    .settle_withdrawals()
                    .await
                    .map_err(|e| write_failed(chain, "settleWithdrawals", e))?;

                let new_epoch = self
                    .reads
                    .wait_until(
                        chain,
                        "currentEpoch",
                        |node| async move { node.current_epoch().await },
                        &self.confirmation,
                        "settleWithdrawals",
                        &format!("epoch {}", target),
                        |observed| *observed != epoch,
                    )
                    .await?;
                expect_counter(chain, "epoch", target, new_epoch)?;
                info!("🏦 {} settled -> epoch {}", chain.label(), new_epoch);
            }

            state.mark(chain.chain_id(), ChainStage::Settled);
            self.store.save(state).await?;
        }
        Ok(())
    }

    async fn resume_all(&self, state: &mut RunState) -> KeeperResult<()> {
        for chain in self.registry.sync_order() {
            if state.stage_of(chain.chain_id()) >= ChainStage::Resumed {
                continue;
            }

            if self.reads.paused(chain).await? {
                chain
                    .writer
                    .set_paused(false)
                    .await
                    .map_err(|e| write_failed(chain, "unpause", e))?;
                self.confirm_paused(chain, false).await?;
                info!("▶️ {} resumed", chain.label());
            } else {
                info!("▶️ {} already unpaused", chain.label());
            }

            state.mark(chain.chain_id(), ChainStage::Resumed);
            self.store.save(state).await?;
        }

        self.verify_pairing(state.target_round).await
    }

    /// Final check: every chain unpaused at round == epoch == target
    async fn verify_pairing(&self, target: u64) -> KeeperResult<()> {
        for chain in self.registry.sync_order() {
            let snapshot = self.reads.snapshot(chain).await?;
            if snapshot.paused || snapshot.round != target || snapshot.epoch != target {
                return Err(KeeperError::PairingViolation {
                    chain: chain.label(),
                    round: snapshot.round,
                    epoch: snapshot.epoch,
                    paused: snapshot.paused,
                    expected: target,
                });
            }
        }
        Ok(())
    }

    async fn confirm_paused(&self, chain: &ChainHandle, paused: bool) -> KeeperResult<()> {
        let operation = if paused { "pause" } else { "unpause" };
        self.reads
            .wait_until(
                chain,
                "paused",
                |node| async move { node.is_paused().await },
                &self.confirmation,
                operation,
                &format!("paused == {}", paused),
                |observed| *observed == paused,
            )
            .await?;
        Ok(())
    }
}

fn write_failed(chain: &ChainHandle, operation: &str, source: NodeError) -> KeeperError {
    warn!("❌ {} {} failed: {}", chain.label(), operation, source);
    KeeperError::WriteFailed {
        chain: chain.label(),
        operation: operation.to_string(),
        source,
    }
}

fn expect_counter(chain: &ChainHandle, counter: &'static str, expected: u64, observed: u64) -> KeeperResult<()> {
    if observed == expected {
        Ok(())
    } else {
        Err(KeeperError::UnexpectedCounter {
            chain: chain.label(),
            counter,
            expected,
            observed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::price_precision;
    use crate::mocks::{MockNetwork, NodeBehavior, WriteOp, WriterFaults, MOCK_START_ROUND};
    use crate::quorum::{QuorumPolicy, RetryPolicy};
    use crate::storage::MemoryRunStore;
    use crate::sync::RunStatus;
    use ethers::types::U256;
    use std::time::Duration;

    const TARGET: u64 = MOCK_START_ROUND + 1;

    fn policy() -> SyncPolicy {
        SyncPolicy {
            quorum: QuorumPolicy::new(2, Duration::from_millis(200), true).unwrap(),
            retry: RetryPolicy::no_retry(),
            confirmation: ConfirmationPolicy {
                timeout: Duration::from_millis(150),
                poll_interval: Duration::from_millis(5),
            },
        }
    }

    fn controller(network: &MockNetwork, store: Arc<MemoryRunStore>) -> RoundSyncController {
        RoundSyncController::new(Arc::new(network.registry()), &policy(), store)
    }

    fn expected_price() -> U256 {
        price_precision() * U256::from(1_050u64) / U256::from(1_000u64)
    }

    fn halted(result: KeeperResult<RunState>) -> (SyncStep, Vec<crate::sync::ChainProgress>, KeeperError) {
        match result {
            Err(KeeperError::PartialRunHalted { step, progress, cause, .. }) => (step, progress, *cause),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(state) => panic!("run unexpectedly completed: {:?}", state.status),
        }
    }

    #[tokio::test]
    async fn test_full_run_pairs_every_chain() {
        let network = MockNetwork::standard(3, 3);
        // one lagging endpoint per chain is outvoted
        for chain_id in [1, 42161, 8453, 10] {
            network.set_behavior(chain_id, 1, NodeBehavior::Stale { round_lag: 1 }).await;
        }
        let store = Arc::new(MemoryRunStore::default());

        let state = controller(&network, store.clone()).run().await.unwrap();
        assert_eq!(state.status, RunStatus::Completed);
        assert_eq!(state.target_round, TARGET);
        assert_eq!(state.price, Some(expected_price()));

        for chain_id in [1, 42161, 8453, 10] {
            let chain = network.chain(chain_id).await;
            assert_eq!(chain.round, TARGET);
            assert_eq!(chain.epoch, TARGET);
            assert!(!chain.paused);
            assert_eq!(chain.applied_prices, vec![expected_price()]);
        }

        // primary first, then secondaries in registry order
        let rolls: Vec<u64> = network
            .writes()
            .await
            .into_iter()
            .filter(|(_, op)| matches!(op, WriteOp::RollPrimary | WriteOp::ApplySecondaryPrice))
            .map(|(id, _)| id)
            .collect();
        assert_eq!(rolls, vec![1, 42161, 8453, 10]);
        assert_eq!(network.total_writes().await, 16);
        assert!(store.latest_unfinished().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_resume_after_halt_reuses_price_and_skips_done_chains() {
        let network = MockNetwork::standard(2, 3);
        network
            .set_faults(
                8453,
                WriterFaults {
                    fail_once: Some(WriteOp::ApplySecondaryPrice),
                    ..Default::default()
                },
            )
            .await;
        let store = Arc::new(MemoryRunStore::default());

        let (step, progress, cause) = halted(controller(&network, store.clone()).run().await);
        assert_eq!(step, SyncStep::PropagatingPrice);
        assert!(matches!(cause, KeeperError::WriteFailed { .. }));
        let stages: Vec<ChainStage> = progress.iter().map(|p| p.stage).collect();
        assert_eq!(stages, vec![ChainStage::PriceApplied, ChainStage::PriceApplied, ChainStage::Paused]);

        let persisted = store.latest_unfinished().await.unwrap().unwrap();
        assert!(matches!(persisted.status, RunStatus::Halted(_)));
        assert_eq!(persisted.price, Some(expected_price()));

        // the vault moves on; a resumed run must not recompute
        network
            .update(1, |state| state.aggregate.staked_total = price_precision() * U256::from(2_000u64))
            .await;

        let state = controller(&network, store.clone()).run().await.unwrap();
        assert_eq!(state.run_id, persisted.run_id);
        assert_eq!(state.price, Some(expected_price()));

        assert_eq!(
            network.writes_on(1).await,
            vec![WriteOp::Pause, WriteOp::RollPrimary, WriteOp::SettleWithdrawals, WriteOp::Unpause]
        );
        assert_eq!(
            network.writes_on(8453).await,
            vec![WriteOp::Pause, WriteOp::ApplySecondaryPrice, WriteOp::SettleWithdrawals, WriteOp::Unpause]
        );
        assert_eq!(network.chain(8453).await.applied_prices, vec![expected_price()]);
        assert_eq!(network.chain(8453).await.round, TARGET);
    }

    #[tokio::test]
    async fn test_non_consecutive_round_halts() {
        let network = MockNetwork::standard(2, 3);
        network
            .set_faults(
                42161,
                WriterFaults {
                    round_step: Some(2),
                    ..Default::default()
                },
            )
            .await;

        let (step, _, cause) = halted(controller(&network, Arc::new(MemoryRunStore::default())).run().await);
        assert_eq!(step, SyncStep::PropagatingPrice);
        match cause {
            KeeperError::UnexpectedCounter { expected, observed, counter, .. } => {
                assert_eq!(counter, "round");
                assert_eq!(expected, TARGET);
                assert_eq!(observed, TARGET + 1);
            }
            other => panic!("unexpected cause: {}", other),
        }
        // no rollback, nothing after the failure
        assert!(network.chain(42161).await.paused);
        assert!(network.writes_on(8453).await.iter().all(|op| *op == WriteOp::Pause));
    }

    #[tokio::test]
    async fn test_fresh_run_on_diverged_chains_halts_without_writes() {
        let network = MockNetwork::standard(2, 3);
        network.update(8453, |state| state.round = MOCK_START_ROUND + 1).await;

        let (step, _, cause) = halted(controller(&network, Arc::new(MemoryRunStore::default())).run().await);
        assert_eq!(step, SyncStep::Idle);
        assert!(matches!(cause, KeeperError::RoundDivergence { .. }));
        assert_eq!(network.total_writes().await, 0);
    }

    #[tokio::test]
    async fn test_unreachable_chain_halts_after_partial_pause() {
        let network = MockNetwork::standard(2, 3);
        for idx in 0..3 {
            network.set_behavior(8453, idx, NodeBehavior::Unreachable).await;
        }
        let store = Arc::new(MemoryRunStore::default());

        // start past Idle, whose counter reads would already fail
        let mut state = RunState::new(&[(1, "ethereum".to_string()), (42161, "arbitrum".to_string()), (8453, "base".to_string())]);
        state.set_target(TARGET);
        state.enter(SyncStep::PausingAll);
        store.save(&state).await.unwrap();

        let (step, progress, cause) = halted(controller(&network, store).run().await);
        assert_eq!(step, SyncStep::PausingAll);
        assert!(matches!(cause, KeeperError::AllEndpointsUnreachable { .. }));
        assert_eq!(progress[0].stage, ChainStage::Paused);
        assert_eq!(progress[2].stage, ChainStage::Pending);
        assert!(network.chain(1).await.paused);
    }

    #[tokio::test]
    async fn test_dropped_write_times_out() {
        let network = MockNetwork::standard(1, 3);
        network
            .set_faults(
                42161,
                WriterFaults {
                    silent: true,
                    ..Default::default()
                },
            )
            .await;

        let (step, _, cause) = halted(controller(&network, Arc::new(MemoryRunStore::default())).run().await);
        assert_eq!(step, SyncStep::PausingAll);
        match cause {
            KeeperError::WriteConfirmationTimeout { operation, last_observed, .. } => {
                assert_eq!(operation, "pause");
                assert_eq!(last_observed.as_deref(), Some("false"));
            }
            other => panic!("unexpected cause: {}", other),
        }
    }

    #[tokio::test]
    async fn test_lost_price_is_not_recomputed() {
        let network = MockNetwork::standard(1, 3);
        let store = Arc::new(MemoryRunStore::default());
        network
            .update(1, |state| {
                state.paused = true;
                state.round = TARGET;
            })
            .await;

        let mut state = RunState::new(&[(1, "ethereum".to_string()), (42161, "arbitrum".to_string())]);
        state.set_target(TARGET);
        state.enter(SyncStep::ComputingGlobalPrice);
        store.save(&state).await.unwrap();

        let (_, _, cause) = halted(controller(&network, store).run().await);
        assert!(matches!(cause, KeeperError::MissingPrice(_)));
    }
}
