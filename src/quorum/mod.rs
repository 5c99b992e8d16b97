//! Quorum-verified reads.
//!
//! One logical query is fanned out to every endpoint of a chain, each call is raced
//! against a per-endpoint timeout, and the answers are reduced to a single value that
//! enough independent endpoints agree on. Nothing read from a single node is trusted.

pub mod engine;
pub mod outcome;
pub mod policy;

pub use engine::{QuorumReader, QuorumSource};
pub use outcome::{
    reduce_observations, ConsensusOutcome, EndpointOutcome, EndpointReport, Observation,
    ObservationResult, ValueCount,
};
pub use policy::{QuorumPolicy, RetryPolicy};
