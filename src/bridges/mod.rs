//! Bridge route reconciliation between the vault's token pools.

pub mod pending;
pub mod reconciler;
pub mod routes;

pub use pending::PendingRepair;
pub use reconciler::{ReconcileReport, RouteReconciler};
pub use routes::{classify, Absence, DeepCheck, PoolCallShape, RouteClass, RouteStatus, CALL_SHAPES};
