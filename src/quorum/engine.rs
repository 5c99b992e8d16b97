use std::fmt::Debug;
use std::future::Future;

use futures::future::join_all;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::outcome::{reduce_observations, ConsensusOutcome, Observation, ObservationResult};
use super::policy::QuorumPolicy;
use crate::error::{KeeperResult, NodeError};

/// Something a quorum query can be sent to
pub trait QuorumSource: Clone + Send + Sync {
    /// Identifier used in diagnostics
    fn source_id(&self) -> String;
}

/// Quorum read engine.
///
/// Sends one query to every source concurrently, bounds each call by the policy
/// timeout and reduces the answers. Only side-effect-free queries may be passed in:
/// a timed-out call is dropped locally but may still run on the remote node.
#[derive(Debug, Clone)]
pub struct QuorumReader {
    policy: QuorumPolicy,
}

impl QuorumReader {
    pub fn new(policy: QuorumPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &QuorumPolicy {
        &self.policy
    }

    /// Query every source and return the agreed value with its full diagnostics
    pub async fn read<S, T, F, Fut>(
        &self,
        chain: &str,
        query: &str,
        sources: &[S],
        f: F,
    ) -> KeeperResult<ConsensusOutcome<T>>
    where
        S: QuorumSource,
        T: PartialEq + Clone + Debug,
        F: Fn(S) -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        let limit = self.policy.timeout_per_endpoint;

        // join_all yields results in input order, whatever order the calls finish in
        let calls = sources.iter().enumerate().map(|(idx, source)| {
            let endpoint = format!("#{} {}", idx, source.source_id());
            let call = f(source.clone());
            async move {
                let result = match timeout(limit, call).await {
                    Ok(Ok(value)) => ObservationResult::Value(value),
                    Ok(Err(e)) => ObservationResult::Failed(e),
                    Err(_) => ObservationResult::TimedOut(limit),
                };
                Observation { endpoint, result }
            }
        });
        let observations = join_all(calls).await;

        match reduce_observations(chain, query, observations, &self.policy) {
            Ok(outcome) => {
                debug!(
                    "🔎 {} {} = {:?} ({}/{} agree, {} queried)",
                    chain, query, outcome.value, outcome.agreement, outcome.successful, outcome.queried
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!("⚠️ {}", e);
                Err(e)
            }
        }
    }

    /// Same as [`QuorumReader::read`] but returns only the value
    pub async fn read_value<S, T, F, Fut>(&self, chain: &str, query: &str, sources: &[S], f: F) -> KeeperResult<T>
    where
        S: QuorumSource,
        T: PartialEq + Clone + Debug,
        F: Fn(S) -> Fut,
        Fut: Future<Output = Result<T, NodeError>>,
    {
        Ok(self.read(chain, query, sources, f).await?.value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::KeeperError;
    use crate::quorum::EndpointOutcome;
    use ethers::types::U256;
    use rand::seq::SliceRandom;
    use std::time::Duration;

    /// Endpoint stand-in answering a fixed value after a fixed delay
    #[derive(Clone)]
    struct ScriptedSource {
        id: usize,
        delay: Duration,
        answer: Result<U256, NodeError>,
    }

    impl QuorumSource for ScriptedSource {
        fn source_id(&self) -> String {
            format!("scripted-{}", self.id)
        }
    }

    fn sources(answers: &[u64], delays_ms: &[u64]) -> Vec<ScriptedSource> {
        answers
            .iter()
            .zip(delays_ms)
            .enumerate()
            .map(|(id, (answer, delay))| ScriptedSource {
                id,
                delay: Duration::from_millis(*delay),
                answer: Ok(U256::from(*answer)),
            })
            .collect()
    }

    async fn ask(source: ScriptedSource) -> Result<U256, NodeError> {
        tokio::time::sleep(source.delay).await;
        source.answer
    }

    fn reader(min_consensus: usize, require_majority: bool, timeout_ms: u64) -> QuorumReader {
        QuorumReader::new(QuorumPolicy::new(min_consensus, Duration::from_millis(timeout_ms), require_majority).unwrap())
    }

    #[tokio::test]
    async fn test_five_endpoints_with_two_stale() {
        let nodes = sources(&[1000, 1000, 999, 1000, 999], &[5, 10, 1, 20, 3]);

        let outcome = reader(2, false, 500).read("A", "stakedTotal", &nodes, ask).await.unwrap();
        assert_eq!(outcome.value, U256::from(1000));
        assert_eq!(outcome.agreement, 3);

        let err = reader(4, false, 500).read("A", "stakedTotal", &nodes, ask).await.unwrap_err();
        assert!(matches!(err, KeeperError::ConsensusNotReached { agreement: 3, successful: 5, .. }));
    }

    #[tokio::test]
    async fn test_result_independent_of_completion_order() {
        let answers = [42, 41, 42, 41, 40, 42];
        let mut delays: Vec<u64> = vec![1, 4, 8, 12, 16, 20];
        let mut rng = rand::thread_rng();

        for _ in 0..8 {
            delays.shuffle(&mut rng);
            let nodes = sources(&answers, &delays);
            let outcome = reader(2, false, 500).read("A", "currentRound", &nodes, ask).await.unwrap();
            assert_eq!(outcome.value, U256::from(42));
            assert_eq!(outcome.agreement, 3);
            // reports follow endpoint order, not completion order
            let ids: Vec<_> = outcome.reports.iter().map(|r| r.endpoint.clone()).collect();
            assert_eq!(ids[0], "#0 scripted-0");
            assert_eq!(ids[5], "#5 scripted-5");
        }
    }

    #[tokio::test]
    async fn test_tie_broken_by_endpoint_order_not_speed() {
        // 7 answers last but is listed first
        let nodes = sources(&[7, 8, 8, 7], &[40, 1, 2, 30]);
        let outcome = reader(2, false, 500).read("A", "currentRound", &nodes, ask).await.unwrap();
        assert_eq!(outcome.value, U256::from(7));
    }

    #[tokio::test]
    async fn test_slow_endpoint_is_never_counted() {
        // the slow node would complete the quorum if it were counted
        let nodes = sources(&[9, 9, 9], &[1, 2, 300]);
        let err = reader(3, false, 50).read("A", "currentEpoch", &nodes, ask).await.unwrap_err();
        match err {
            KeeperError::ConsensusNotReached { agreement, successful, reports, .. } => {
                assert_eq!(agreement, 2);
                assert_eq!(successful, 2);
                assert!(matches!(reports[2].outcome, EndpointOutcome::TimedOut(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_single_slow_endpoint_is_unreachable() {
        let nodes = sources(&[9], &[300]);
        let err = reader(1, false, 50).read("A", "paused", &nodes, ask).await.unwrap_err();
        assert!(matches!(err, KeeperError::AllEndpointsUnreachable { .. }));
    }

    #[tokio::test]
    async fn test_failed_endpoints_reported() {
        let mut nodes = sources(&[3, 3, 3], &[1, 1, 1]);
        nodes[1].answer = Err(NodeError::Transport("503 Service Unavailable".to_string()));

        let outcome = reader(2, true, 500).read("A", "currentRound", &nodes, ask).await.unwrap();
        assert_eq!(outcome.value, U256::from(3));
        assert_eq!(outcome.successful, 2);
        match &outcome.reports[1].outcome {
            EndpointOutcome::Failed(reason) => assert!(reason.contains("503")),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_minority_value_never_returned() {
        // every value is unique, so no group reaches 2
        let nodes = sources(&[1, 2, 3, 4], &[1, 2, 3, 4]);
        let result = reader(2, false, 500).read_value("A", "stakedTotal", &nodes, ask).await;
        assert!(matches!(result, Err(KeeperError::ConsensusNotReached { .. })));
    }
}
