use std::fmt::Debug;

use ethers::types::U256;

use crate::constants::price_precision;
use crate::error::{KeeperError, KeeperResult};
use crate::types::AggregateState;

/// Turns verified vault-wide figures into the global share price
pub trait SharePriceModel: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Price with 18 decimals
    fn share_price(&self, state: &AggregateState) -> KeeperResult<U256>;
}

/// Net asset value per share: staked assets over share supply.
///
/// Pending deposits are not yet backed by shares and stay out of the NAV.
/// An empty vault prices at exactly 1.
#[derive(Debug, Clone, Copy, Default)]
pub struct NavPerShare;

impl SharePriceModel for NavPerShare {
    fn name(&self) -> &'static str {
        "nav-per-share"
    }

    fn share_price(&self, state: &AggregateState) -> KeeperResult<U256> {
        if state.supply_total.is_zero() {
            return Ok(price_precision());
        }

        let scaled = state
            .staked_total
            .checked_mul(price_precision())
            .ok_or_else(|| KeeperError::InvalidPrice(format!("stakedTotal {} overflows when scaled", state.staked_total)))?;
        let price = scaled / state.supply_total;

        if price.is_zero() {
            return Err(KeeperError::InvalidPrice(format!(
                "zero price from stakedTotal {} / supplyTotal {}",
                state.staked_total, state.supply_total
            )));
        }
        Ok(price)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(staked: u64, supply: u64) -> AggregateState {
        AggregateState {
            staked_total: price_precision() * U256::from(staked),
            pending_total: price_precision() * U256::from(5u64),
            supply_total: price_precision() * U256::from(supply),
        }
    }

    #[test]
    fn test_nav_per_share() {
        let price = NavPerShare.share_price(&state(1_050, 1_000)).unwrap();
        assert_eq!(price, U256::from(1_050_000_000_000_000_000u64));
    }

    #[test]
    fn test_empty_vault_prices_at_one() {
        assert_eq!(NavPerShare.share_price(&state(0, 0)).unwrap(), price_precision());
    }

    #[test]
    fn test_invalid_prices() {
        assert!(matches!(NavPerShare.share_price(&state(0, 10)), Err(KeeperError::InvalidPrice(_))));

        let huge = AggregateState {
            staked_total: U256::MAX,
            pending_total: U256::zero(),
            supply_total: U256::one(),
        };
        assert!(matches!(NavPerShare.share_price(&huge), Err(KeeperError::InvalidPrice(_))));
    }
}
