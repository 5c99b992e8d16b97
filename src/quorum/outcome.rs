use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::QuorumPolicy;
use crate::error::{KeeperError, KeeperResult, NodeError};

/// Answer of one endpoint to one query
#[derive(Debug, Clone)]
pub enum ObservationResult<T> {
    Value(T),
    Failed(NodeError),
    TimedOut(Duration),
}

/// One endpoint's observation, in endpoint-list order
#[derive(Debug, Clone)]
pub struct Observation<T> {
    pub endpoint: String,
    pub result: ObservationResult<T>,
}

/// Printable per-endpoint outcome kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EndpointOutcome {
    Responded(String),
    Failed(String),
    TimedOut(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointReport {
    pub endpoint: String,
    pub outcome: EndpointOutcome,
}

impl fmt::Display for EndpointReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            EndpointOutcome::Responded(value) => write!(f, "{} => {}", self.endpoint, value),
            EndpointOutcome::Failed(reason) => write!(f, "{} => failed: {}", self.endpoint, reason),
            EndpointOutcome::TimedOut(after) => write!(f, "{} => timed out after {:?}", self.endpoint, after),
        }
    }
}

/// Number of endpoints that returned one distinct value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Agreed value of a quorum read.
///
/// `agreement <= successful <= queried` always holds.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome<T> {
    pub value: T,
    pub agreement: usize,
    pub successful: usize,
    pub queried: usize,
    pub reports: Vec<EndpointReport>,
}

/// Reduce per-endpoint observations to one trusted value.
///
/// Values are grouped by equality and the largest group wins. Ties go to the group
/// seen first in endpoint-list order, so completion order never affects the result.
pub fn reduce_observations<T>(
    chain: &str,
    query: &str,
    observations: Vec<Observation<T>>,
    policy: &QuorumPolicy,
) -> KeeperResult<ConsensusOutcome<T>>
where
    T: PartialEq + Clone + fmt::Debug,
{
    let queried = observations.len();
    let mut groups: Vec<(T, usize)> = Vec::new();
    let mut reports = Vec::with_capacity(queried);

    for observation in observations {
        let outcome = match observation.result {
            ObservationResult::Value(value) => {
                let printed = format!("{:?}", value);
                match groups.iter_mut().find(|(seen, _)| *seen == value) {
                    Some((_, count)) => *count += 1,
                    None => groups.push((value, 1)),
                }
                EndpointOutcome::Responded(printed)
            }
            ObservationResult::Failed(e) => EndpointOutcome::Failed(e.to_string()),
            ObservationResult::TimedOut(after) => EndpointOutcome::TimedOut(after),
        };
        reports.push(EndpointReport {
            endpoint: observation.endpoint,
            outcome,
        });
    }

    let successful: usize = groups.iter().map(|(_, count)| count).sum();
    if successful == 0 {
        return Err(KeeperError::AllEndpointsUnreachable {
            chain: chain.to_string(),
            query: query.to_string(),
            reports,
        });
    }

    // strict comparison keeps the first-seen group on ties
    let mut best = 0;
    for (idx, (_, count)) in groups.iter().enumerate() {
        if *count > groups[best].1 {
            best = idx;
        }
    }
    let agreement = groups[best].1;

    if !policy.accepts(agreement, successful) {
        return Err(KeeperError::ConsensusNotReached {
            chain: chain.to_string(),
            query: query.to_string(),
            required: policy.min_consensus,
            require_majority: policy.require_majority,
            agreement,
            successful,
            distribution: groups
                .iter()
                .map(|(value, count)| ValueCount {
                    value: format!("{:?}", value),
                    count: *count,
                })
                .collect(),
            reports,
        });
    }

    let value = groups.swap_remove(best).0;
    Ok(ConsensusOutcome {
        value,
        agreement,
        successful,
        queried,
        reports,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethers::types::U256;

    fn policy(min_consensus: usize, require_majority: bool) -> QuorumPolicy {
        QuorumPolicy::new(min_consensus, Duration::from_secs(1), require_majority).unwrap()
    }

    fn values(raw: &[u64]) -> Vec<Observation<U256>> {
        raw.iter()
            .enumerate()
            .map(|(i, v)| Observation {
                endpoint: format!("#{}", i),
                result: ObservationResult::Value(U256::from(*v)),
            })
            .collect()
    }

    #[test]
    fn test_stale_minority_is_outvoted() {
        let outcome = reduce_observations("A", "stakedTotal", values(&[1000, 999, 1000, 999, 1000]), &policy(2, false)).unwrap();
        assert_eq!(outcome.value, U256::from(1000));
        assert_eq!(outcome.agreement, 3);
        assert_eq!(outcome.successful, 5);
        assert_eq!(outcome.queried, 5);
    }

    #[test]
    fn test_threshold_above_best_group_fails() {
        let err = reduce_observations("A", "stakedTotal", values(&[1000, 1000, 1000, 999, 999]), &policy(4, false)).unwrap_err();
        match err {
            KeeperError::ConsensusNotReached { agreement, successful, distribution, required, .. } => {
                assert_eq!(agreement, 3);
                assert_eq!(successful, 5);
                assert_eq!(required, 4);
                assert_eq!(distribution.len(), 2);
                assert_eq!(distribution[0].count, 3);
                assert_eq!(distribution[1].count, 2);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_tie_goes_to_first_seen_group() {
        let outcome = reduce_observations("A", "currentRound", values(&[7, 8, 8, 7]), &policy(2, false)).unwrap();
        assert_eq!(outcome.value, U256::from(7));

        let outcome = reduce_observations("A", "currentRound", values(&[8, 7, 7, 8]), &policy(2, false)).unwrap();
        assert_eq!(outcome.value, U256::from(8));
    }

    #[test]
    fn test_tie_never_passes_majority() {
        let err = reduce_observations("A", "currentRound", values(&[7, 8, 8, 7]), &policy(2, true));
        assert!(matches!(err, Err(KeeperError::ConsensusNotReached { .. })));
    }

    #[test]
    fn test_failures_are_not_successful_responses() {
        let mut observations = values(&[5, 5]);
        observations.push(Observation {
            endpoint: "#2".to_string(),
            result: ObservationResult::Failed(NodeError::Transport("connection refused".to_string())),
        });
        observations.push(Observation {
            endpoint: "#3".to_string(),
            result: ObservationResult::TimedOut(Duration::from_millis(50)),
        });

        let outcome = reduce_observations("A", "currentEpoch", observations, &policy(2, true)).unwrap();
        assert_eq!(outcome.value, U256::from(5));
        assert_eq!(outcome.successful, 2);
        assert_eq!(outcome.queried, 4);
        assert!(outcome.agreement <= outcome.successful && outcome.successful <= outcome.queried);
        assert!(matches!(outcome.reports[3].outcome, EndpointOutcome::TimedOut(_)));
    }

    #[test]
    fn test_nothing_answered() {
        let observations: Vec<Observation<U256>> = vec![
            Observation {
                endpoint: "#0".to_string(),
                result: ObservationResult::Failed(NodeError::Transport("dns".to_string())),
            },
            Observation {
                endpoint: "#1".to_string(),
                result: ObservationResult::TimedOut(Duration::from_millis(50)),
            },
        ];

        match reduce_observations("A", "paused", observations, &policy(1, false)) {
            Err(KeeperError::AllEndpointsUnreachable { reports, .. }) => assert_eq!(reports.len(), 2),
            other => panic!("unexpected result: {:?}", other.map(|o| o.value)),
        }

        let empty: Vec<Observation<bool>> = Vec::new();
        assert!(matches!(
            reduce_observations("A", "paused", empty, &policy(1, false)),
            Err(KeeperError::AllEndpointsUnreachable { .. })
        ));
    }
}
