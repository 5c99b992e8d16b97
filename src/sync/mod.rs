//! Round synchronization: pause every chain, compute one global share price on the
//! primary, propagate it, settle withdrawals, resume.

pub mod controller;
pub mod policy;
pub mod price;
pub mod run_state;

pub use controller::RoundSyncController;
pub use policy::SyncPolicy;
pub use price::{NavPerShare, SharePriceModel};
pub use run_state::{ChainProgress, ChainStage, RunState, RunStatus, SyncStep};
