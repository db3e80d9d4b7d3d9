use serde::{Deserialize, Serialize};

use crate::error::PoolError;

// ============================================================================
// GENERALIZED CONSTANT PRODUCT
// ============================================================================

/// Constant Product Market Maker across N outcome pools
///
/// Formula: L_1 * L_2 * ... * L_n = k
///
/// Buying outcome t with a net stake s:
/// - every other pool j grows by s: L_j' = L_j + s
/// - pool t is solved from the invariant: L_t' = k / Π(L_j')
/// - shares minted = s + (L_t - L_t')
///
/// Price of outcome i is its inverse liquidity, renormalized:
/// price_i = (1 / L_i) / Σ(1 / L_j)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CPMMPool {
    /// Liquidity for each outcome, in option order
    pub reserves: Vec<f64>,
}

impl CPMMPool {
    /// Build a pool from current option liquidities
    pub fn new(reserves: Vec<f64>) -> Result<Self, PoolError> {
        if reserves.is_empty() {
            return Err(PoolError::EmptyPool);
        }
        if let Some(bad) = reserves.iter().find(|r| !r.is_finite() || **r <= 0.0) {
            return Err(PoolError::InvalidReserve(*bad));
        }
        Ok(Self { reserves })
    }

    /// k = product of all reserves
    pub fn k(&self) -> f64 {
        self.reserves.iter().product()
    }

    /// Inverse-liquidity probability for each outcome; sums to 1.0
    pub fn calculate_prices(&self) -> Vec<f64> {
        inverse_liquidity_prices(&self.reserves)
    }

    /// Price the purchase of outcome `outcome_index` without mutating the pool
    pub fn quote(&self, outcome_index: usize, net_amount: f64) -> Result<SwapResult, PoolError> {
        if outcome_index >= self.reserves.len() {
            return Err(PoolError::InvalidOutcome(outcome_index));
        }
        if !net_amount.is_finite() || net_amount < 0.0 {
            return Err(PoolError::InvalidAmount(net_amount));
        }

        let old_reserve = self.reserves[outcome_index];
        let mut new_reserves = self.reserves.clone();

        // L_t' = k / Π(L_j + s) = L_t * Π(L_j / (L_j + s)); the ratio form
        // stays finite where the raw product of many pools would overflow.
        let mut new_reserve = old_reserve;
        for (i, reserve) in new_reserves.iter_mut().enumerate() {
            if i != outcome_index {
                new_reserve *= *reserve / (*reserve + net_amount);
                *reserve += net_amount;
            }
        }
        new_reserves[outcome_index] = new_reserve;

        let shares = net_amount + (old_reserve - new_reserve);
        let old_prices = self.calculate_prices();
        let new_prices = inverse_liquidity_prices(&new_reserves);

        Ok(SwapResult {
            outcome_index,
            net_amount,
            shares,
            old_price: old_prices[outcome_index],
            new_price: new_prices[outcome_index],
            new_reserves,
            new_prices,
        })
    }

    /// Execute a purchase and move the pool to its new reserves
    pub fn buy(&mut self, outcome_index: usize, net_amount: f64) -> Result<SwapResult, PoolError> {
        let swap = self.quote(outcome_index, net_amount)?;
        self.reserves = swap.new_reserves.clone();
        Ok(swap)
    }
}

/// Result of a swap operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapResult {
    pub outcome_index: usize,
    pub net_amount: f64,
    pub shares: f64,
    pub old_price: f64,
    pub new_price: f64,
    pub new_reserves: Vec<f64>,
    pub new_prices: Vec<f64>,
}

impl SwapResult {
    /// Average price paid per share
    pub fn entry_price(&self) -> f64 {
        if self.shares > 0.0 {
            self.net_amount / self.shares
        } else {
            0.0
        }
    }
}

/// price_i = (1 / L_i) / Σ(1 / L_j)
pub fn inverse_liquidity_prices(reserves: &[f64]) -> Vec<f64> {
    let inverse_sum: f64 = reserves.iter().map(|r| 1.0 / r).sum();
    if reserves.is_empty() || !inverse_sum.is_finite() || inverse_sum <= 0.0 {
        return vec![0.0; reserves.len()];
    }
    reserves.iter().map(|r| (1.0 / r) / inverse_sum).collect()
}

// ============================================================================
// UNIT TESTS
// ============================================================================
