pub mod contracts;
pub mod node;
pub mod registry;
pub mod rpc;
pub mod verified;

pub use node::{ReadOnlyWriter, VaultNode, VaultWriter};
pub use registry::{ChainHandle, ChainRegistry};
pub use rpc::{connect_chain, EthersVaultNode, EthersVaultWriter};
pub use verified::{ConfirmationPolicy, VerifiedReader};
