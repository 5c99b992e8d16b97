use ethers::abi::{self, Abi, Token};
use ethers::types::{Address, Bytes, U256};

use crate::error::NodeError;
use crate::types::{RemotePool, RouteAddition};

/// Vault functions the keeper calls
pub const VAULT_ABI: &[&str] = &[
    "function currentRound() external view returns (uint256)",
    "function currentEpoch() external view returns (uint256)",
    "function paused() external view returns (bool)",
    "function aggregateState() external view returns (uint256 stakedTotal, uint256 pendingTotal, uint256 supplyTotal)",
    "function rollPrimary(uint256 sharePrice) external returns (uint256)",
    "function applySecondaryPrice(uint256 sharePrice) external returns (uint256)",
    "function settleWithdrawals() external returns (uint256)",
    "function pause() external",
    "function unpause() external",
];

/// Bridge token pool functions used by route reconciliation
pub const POOL_ABI: &[&str] = &[
    "function isSupportedChain(uint64 remoteChainSelector) external view returns (bool)",
    "function getRemotePools(uint64 remoteChainSelector) external view returns (bytes[])",
    "function getRemotePool(uint64 remoteChainSelector) external view returns (bytes)",
    "function applyChainUpdates(uint64[] remoteChainSelectorsToRemove, (uint64,bytes[],bytes,(bool,uint128,uint128),(bool,uint128,uint128))[] chainsToAdd) external",
];

pub fn vault_abi() -> Result<Abi, NodeError> {
    abi::parse_abi(VAULT_ABI).map_err(|e| NodeError::Decode(format!("vault ABI: {}", e)))
}

pub fn pool_abi() -> Result<Abi, NodeError> {
    abi::parse_abi(POOL_ABI).map_err(|e| NodeError::Decode(format!("pool ABI: {}", e)))
}

/// Calldata for `name(tokens...)`
pub fn encode_call(abi: &Abi, name: &str, tokens: &[Token]) -> Result<Bytes, NodeError> {
    let function = abi
        .function(name)
        .map_err(|e| NodeError::Decode(format!("{}: {}", name, e)))?;
    let data = function
        .encode_input(tokens)
        .map_err(|e| NodeError::Decode(format!("{}: {}", name, e)))?;
    Ok(Bytes::from(data))
}

/// Remote addresses are stored as raw bytes: ABI-encoded (32 bytes) on EVM pools,
/// sometimes packed (20 bytes). Empty or zero means unset. Anything else is kept
/// verbatim so a garbage registration is reported instead of failing the read.
pub fn decode_remote_address(raw: &[u8]) -> Option<RemotePool> {
    let address = match raw.len() {
        0 => return None,
        20 => Address::from_slice(raw),
        32 if raw[..12].iter().all(|b| *b == 0) => Address::from_slice(&raw[12..]),
        _ => return Some(RemotePool::Unrecognised(Bytes::from(raw.to_vec()))),
    };
    (!address.is_zero()).then_some(RemotePool::Address(address))
}

/// ABI encoding of an address as the pool expects it
pub fn encode_remote_address(address: Address) -> Bytes {
    Bytes::from(abi::encode(&[Token::Address(address)]))
}

/// Rate limiter config (disabled)
fn disabled_rate_limit() -> Token {
    Token::Tuple(vec![Token::Bool(false), Token::Uint(U256::zero()), Token::Uint(U256::zero())])
}

/// Arguments of `applyChainUpdates(removals, additions)`
pub fn chain_update_tokens(removals: &[u64], additions: &[RouteAddition]) -> Vec<Token> {
    let removals = Token::Array(removals.iter().map(|s| Token::Uint(U256::from(*s))).collect());
    let additions = Token::Array(
        additions
            .iter()
            .map(|a| {
                Token::Tuple(vec![
                    Token::Uint(U256::from(a.remote_selector)),
                    Token::Array(vec![Token::Bytes(encode_remote_address(a.remote_pool).to_vec())]),
                    Token::Bytes(encode_remote_address(a.remote_token).to_vec()),
                    disabled_rate_limit(),
                    disabled_rate_limit(),
                ])
            })
            .collect(),
    );
    vec![removals, additions]
}

/// Narrow a uint256 counter to u64
pub fn counter_to_u64(name: &str, value: U256) -> Result<u64, NodeError> {
    if value.bits() > 64 {
        return Err(NodeError::Decode(format!("{} does not fit in u64: {}", name, value)));
    }
    Ok(value.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abis_parse() {
        let vault = vault_abi().unwrap();
        assert!(vault.function("rollPrimary").is_ok());
        assert!(vault.function("aggregateState").is_ok());
        let pool = pool_abi().unwrap();
        assert!(pool.function("applyChainUpdates").is_ok());
    }

    #[test]
    fn test_remote_address_forms() {
        let address = Address::from_low_u64_be(0xabcdef);
        let encoded = encode_remote_address(address);
        assert_eq!(encoded.len(), 32);
        assert_eq!(decode_remote_address(&encoded), Some(RemotePool::Address(address)));
        assert_eq!(decode_remote_address(address.as_bytes()), Some(RemotePool::Address(address)));
        assert_eq!(decode_remote_address(&[]), None);
        assert_eq!(decode_remote_address(&[0u8; 32]), None);
    }

    #[test]
    fn test_garbage_registration_is_kept_verbatim() {
        let odd = decode_remote_address(&[1u8; 7]).unwrap();
        assert_eq!(odd, RemotePool::Unrecognised(Bytes::from(vec![1u8; 7])));
        assert_eq!(odd.address(), None);

        let mut dirty = [0u8; 32];
        dirty[0] = 0xff;
        dirty[31] = 0x03;
        match decode_remote_address(&dirty) {
            Some(RemotePool::Unrecognised(raw)) => assert_eq!(raw.len(), 32),
            other => panic!("unexpected decode: {:?}", other),
        }
    }

    #[test]
    fn test_chain_update_calldata() {
        let pool = pool_abi().unwrap();
        let tokens = chain_update_tokens(
            &[4949039107694359620],
            &[RouteAddition {
                remote_selector: 4949039107694359620,
                remote_pool: Address::from_low_u64_be(3),
                remote_token: Address::from_low_u64_be(2),
            }],
        );
        let data = encode_call(&pool, "applyChainUpdates", &tokens).unwrap();
        let selector = &pool.function("applyChainUpdates").unwrap().short_signature();
        assert_eq!(&data[..4], selector);
    }

    #[test]
    fn test_counter_narrowing() {
        assert_eq!(counter_to_u64("currentRound", U256::from(42)).unwrap(), 42);
        assert!(counter_to_u64("currentRound", U256::MAX).is_err());
    }
}
