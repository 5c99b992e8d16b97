use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::pending::PendingRepair;
use super::routes::{classify, Absence, DeepCheck, PoolCallShape, PoolLookup, RouteClass, RouteStatus, CALL_SHAPES};
use crate::blockchain::{ChainHandle, ChainRegistry, ConfirmationPolicy, VerifiedReader};
use crate::error::{KeeperError, KeeperResult};
use crate::storage::RepairLogStore;
use crate::types::RouteAddition;

/// Outcome of one reconciliation pass
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// Final status of every checked pair
    pub statuses: Vec<RouteStatus>,
    /// Pairs that were misconfigured and are now configured
    pub repaired: Vec<(String, String)>,
    /// Transactions submitted
    pub writes: usize,
    /// Pairs an interrupted repair removed and never re-added
    pub pending: Vec<(String, String)>,
}

impl ReconcileReport {
    pub fn count(&self, class: RouteClass) -> usize {
        self.statuses.iter().filter(|s| s.class == class).count()
    }

    pub fn not_configured(&self) -> impl Iterator<Item = &RouteStatus> {
        self.statuses.iter().filter(|s| s.class == RouteClass::NotConfigured)
    }

    pub fn is_clean(&self) -> bool {
        self.count(RouteClass::Misconfigured) == 0 && self.pending.is_empty()
    }
}

/// Route reconciliation engine.
///
/// Verifies every ordered pair of bridged chains with quorum reads and repairs only
/// misconfigured pairs. Already-configured state costs reads and no writes.
/// A repair is recorded in the repair log before its removal is submitted, and a
/// later pass re-adds whatever an interrupted repair left removed.
#[derive(Debug)]
pub struct RouteReconciler {
    registry: Arc<ChainRegistry>,
    reads: VerifiedReader,
    confirmation: ConfirmationPolicy,
    exclusions: Vec<(u64, u64)>,
    repairs: Arc<dyn RepairLogStore>,
}

impl RouteReconciler {
    pub fn new(
        registry: Arc<ChainRegistry>,
        reads: VerifiedReader,
        confirmation: ConfirmationPolicy,
        exclusions: Vec<(u64, u64)>,
        repairs: Arc<dyn RepairLogStore>,
    ) -> Self {
        Self {
            registry,
            reads,
            confirmation,
            exclusions,
            repairs,
        }
    }

    /// Classify every pair without writing anything
    pub async fn inspect(&self) -> KeeperResult<ReconcileReport> {
        let open = self.repairs.pending_repairs().await?;
        let mut report = ReconcileReport::default();

        for (source, destination) in self.registry.bridge_pairs(&self.exclusions) {
            let status = self.route_status(source, destination).await?;
            let interrupted = open
                .iter()
                .any(|repair| repair.covers(source.chain_id(), destination.chain_id()));
            if interrupted && status.class == RouteClass::NotConfigured {
                warn!("♻️ {} -> {}: removed by an unfinished repair", status.source, status.destination);
                report
                    .pending
                    .push((status.source.clone(), status.destination.clone()));
            }
            report.statuses.push(status);
        }
        Ok(report)
    }

    /// Finish interrupted repairs, classify every pair and repair the misconfigured ones
    pub async fn reconcile(&self) -> KeeperResult<ReconcileReport> {
        let (resumed, resume_writes) = self.resume_repairs().await?;
        let mut report = self.inspect().await?;
        report.writes += resume_writes;
        report.repaired.extend(resumed);
        for status in &report.statuses {
            match status.class {
                RouteClass::Misconfigured => warn!("🔧 {}", status),
                RouteClass::NotConfigured => info!("🚫 {}", status),
                RouteClass::Configured => {}
            }
        }

        // one removal and one re-add per source chain, in registry order
        for source in self.registry.chains() {
            let broken: Vec<&ChainHandle> = report
                .statuses
                .iter()
                .filter(|s| s.source_chain_id == source.chain_id() && s.class == RouteClass::Misconfigured)
                .map(|s| self.registry.get(s.destination_chain_id))
                .collect::<KeeperResult<_>>()?;
            if broken.is_empty() {
                continue;
            }

            let repaired = self.repair_source(source, &broken).await?;
            report.writes += 2;
            for status in repaired {
                report
                    .repaired
                    .push((status.source.clone(), status.destination.clone()));
                if let Some(slot) = report.statuses.iter_mut().find(|s| {
                    s.source_chain_id == status.source_chain_id && s.destination_chain_id == status.destination_chain_id
                }) {
                    *slot = status;
                }
            }
        }

        info!(
            "🌉 reconciliation done: {} configured, {} repaired, {} not configured, {} writes",
            report.count(RouteClass::Configured),
            report.repaired.len(),
            report.count(RouteClass::NotConfigured),
            report.writes
        );
        Ok(report)
    }

    /// Re-add the routes an interrupted repair removed, then drop its record
    async fn resume_repairs(&self) -> KeeperResult<(Vec<(String, String)>, usize)> {
        let mut restored = Vec::new();
        let mut writes = 0;

        for repair in self.repairs.pending_repairs().await? {
            let source = self.registry.get(repair.source_chain_id)?;
            let mut removed = Vec::new();
            for chain_id in &repair.destinations {
                let destination = self.registry.get(*chain_id)?;
                if !self.is_supported(source, destination).await? {
                    removed.push(destination);
                }
            }

            if !removed.is_empty() {
                warn!(
                    "♻️ {}: finishing repair started {}, re-adding {} routes",
                    source.label(),
                    repair.started_at.format("%Y-%m-%d %H:%M:%S"),
                    removed.len()
                );
                let additions = route_additions(&removed)?;
                self.re_add(source, &removed, &additions)
                    .await
                    .map_err(|cause| incomplete(source, &removed, cause))?;
                writes += 1;
                restored.extend(removed.iter().map(|d| (source.label(), d.label())));
            }
            self.repairs.clear_repair(source.chain_id()).await?;
        }
        Ok((restored, writes))
    }

    async fn is_supported(&self, source: &ChainHandle, destination: &ChainHandle) -> KeeperResult<bool> {
        let selector = destination.descriptor.selector;
        self.reads
            .read(source, "isSupportedChain", move |node| async move { node.is_supported_chain(selector).await })
            .await
    }

    async fn route_status(&self, source: &ChainHandle, destination: &ChainHandle) -> KeeperResult<RouteStatus> {
        let selector = destination.descriptor.selector;
        let expected_pool = destination
            .descriptor
            .contracts
            .bridge_pool
            .ok_or_else(|| KeeperError::InvalidTopology(format!("{} has no bridge pool", destination.label())))?;

        let supported = self.is_supported(source, destination).await?;
        let deep = if supported {
            self.deep_check(source, selector).await?
        } else {
            DeepCheck::Absent(Absence::Empty)
        };

        Ok(RouteStatus {
            source_chain_id: source.chain_id(),
            source: source.label(),
            destination_chain_id: destination.chain_id(),
            destination: destination.label(),
            supported,
            class: classify(supported, &deep, expected_pool),
            deep,
            expected_pool,
        })
    }

    /// Capability negotiation over [`CALL_SHAPES`]
    async fn deep_check(&self, source: &ChainHandle, selector: u64) -> KeeperResult<DeepCheck> {
        for shape in CALL_SHAPES {
            let lookup = self
                .reads
                .read(source, shape.name(), move |node| async move {
                    let answer = match shape {
                        PoolCallShape::RemotePools => node.get_remote_pools(selector).await,
                        PoolCallShape::RemotePool => node
                            .get_remote_pool(selector)
                            .await
                            .map(|pool| pool.into_iter().collect::<Vec<_>>()),
                    };
                    match answer {
                        Ok(pools) => Ok(PoolLookup::Answered(pools)),
                        Err(e) if e.is_revert() => Ok(PoolLookup::Reverted),
                        Err(e) => Err(e),
                    }
                })
                .await?;

            match lookup {
                PoolLookup::Reverted => continue,
                PoolLookup::Answered(pools) if pools.is_empty() => return Ok(DeepCheck::Absent(Absence::Empty)),
                PoolLookup::Answered(pools) => return Ok(DeepCheck::Registered { shape, pools }),
            }
        }
        Ok(DeepCheck::Absent(Absence::AllReverted))
    }

    /// Remove then re-add the broken routes of one source pool, confirming each write
    async fn repair_source(&self, source: &ChainHandle, destinations: &[&ChainHandle]) -> KeeperResult<Vec<RouteStatus>> {
        let removals: Vec<u64> = destinations.iter().map(|d| d.descriptor.selector).collect();
        let additions = route_additions(destinations)?;

        self.repairs
            .save_repair(&PendingRepair::new(source, destinations))
            .await?;

        info!("🔧 {}: removing {} broken routes", source.label(), removals.len());
        source
            .writer
            .apply_chain_updates(&removals, &[])
            .await
            .map_err(|e| KeeperError::WriteFailed {
                chain: source.label(),
                operation: "applyChainUpdates(remove)".to_string(),
                source: e,
            })?;

        let restored = async {
            for destination in destinations {
                self.confirm_supported(source, destination, false).await?;
            }
            self.re_add(source, destinations, &additions).await
        };
        restored
            .await
            .map_err(|cause| incomplete(source, destinations, cause))?;
        self.repairs.clear_repair(source.chain_id()).await?;

        let mut repaired = Vec::with_capacity(destinations.len());
        for destination in destinations {
            let status = self.route_status(source, destination).await?;
            if status.class != RouteClass::Configured {
                return Err(KeeperError::RouteMisconfigured {
                    source_chain: status.source.clone(),
                    destination_chain: status.destination.clone(),
                    expected: status.expected_pool,
                    actual: status.actual_pool(),
                });
            }
            info!("✅ {}", status);
            repaired.push(status);
        }
        Ok(repaired)
    }

    async fn re_add(
        &self,
        source: &ChainHandle,
        destinations: &[&ChainHandle],
        additions: &[RouteAddition],
    ) -> KeeperResult<()> {
        info!("🔧 {}: re-adding {} routes", source.label(), additions.len());
        source
            .writer
            .apply_chain_updates(&[], additions)
            .await
            .map_err(|e| KeeperError::WriteFailed {
                chain: source.label(),
                operation: "applyChainUpdates(add)".to_string(),
                source: e,
            })?;
        for destination in destinations {
            self.confirm_supported(source, destination, true).await?;
        }
        Ok(())
    }

    async fn confirm_supported(&self, source: &ChainHandle, destination: &ChainHandle, expected: bool) -> KeeperResult<()> {
        let selector = destination.descriptor.selector;
        self.reads
            .wait_until(
                source,
                "isSupportedChain",
                move |node| async move { node.is_supported_chain(selector).await },
                &self.confirmation,
                "applyChainUpdates",
                &format!("{} supported == {}", destination.label(), expected),
                |supported| *supported == expected,
            )
            .await?;
        Ok(())
    }
}

fn route_additions(destinations: &[&ChainHandle]) -> KeeperResult<Vec<RouteAddition>> {
    destinations
        .iter()
        .map(|d| {
            let remote_pool = d
                .descriptor
                .contracts
                .bridge_pool
                .ok_or_else(|| KeeperError::InvalidTopology(format!("{} has no bridge pool", d.label())))?;
            Ok(RouteAddition {
                remote_selector: d.descriptor.selector,
                remote_pool,
                remote_token: d.descriptor.contracts.share_token,
            })
        })
        .collect()
}

fn incomplete(source: &ChainHandle, removed: &[&ChainHandle], cause: KeeperError) -> KeeperError {
    KeeperError::RepairIncomplete {
        source_chain: source.label(),
        removed: removed.iter().map(|d| d.label()).collect(),
        cause: Box::new(cause),
    }
}
