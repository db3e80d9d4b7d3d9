// Winner determination and payout computation
//
// Pure functions over a market's final state. The resolution engine runs
// them inside the store transaction and then credits what they return.

use std::collections::BTreeMap;

use serde::Serialize;

use super::buckets::find_bucket;
use crate::error::ResolveError;
use crate::models::{Bet, Market, MarketOption, Topology};

/// Two parimutuel predictions whose distances differ by less than this tie.
pub const TIE_TOLERANCE: f64 = 1e-9;

/// Payout owed to one winning bet
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BetPayout {
    pub bet_id: String,
    pub user_id: String,
    /// shares for AMM markets, stake for parimutuel
    pub weight: f64,
    pub amount: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settlement {
    pub topology: Topology,
    pub winning_option_id: Option<String>,
    pub winning_value: Option<f64>,
    pub winning_label: String,
    pub pool: f64,
    pub total_weight: f64,
    /// One entry per winning bet, including zero payouts
    pub payouts: Vec<BetPayout>,
}

impl Settlement {
    pub fn total_paid(&self) -> u64 {
        self.payouts.iter().map(|p| p.amount).sum()
    }

    /// Pool left unallocated by floor truncation
    pub fn dust(&self) -> f64 {
        self.pool - self.total_paid() as f64
    }

    /// Aggregated per user, zero payouts omitted
    pub fn payouts_by_user(&self) -> BTreeMap<String, u64> {
        let mut by_user = BTreeMap::new();
        for payout in self.payouts.iter().filter(|p| p.amount > 0) {
            *by_user.entry(payout.user_id.clone()).or_insert(0) += payout.amount;
        }
        by_user
    }

    pub fn is_winner(&self, bet_id: &str) -> bool {
        self.payouts.iter().any(|p| p.bet_id == bet_id)
    }
}

/// Decide the winners of `market` and what each is owed.
///
/// - Discrete: bets on `winning_option_id` win, weighted by shares; pool is Σ liquidity.
/// - Bucketed: the bucket containing `winning_value` wins, same weighting and pool.
/// - Parimutuel: bets nearest to `winning_value` win, weighted by stake; pool is Σ stakes.
pub fn settle(
    market: &Market,
    options: &[MarketOption],
    bets: &[Bet],
    winning_option_id: Option<&str>,
    winning_value: Option<f64>,
) -> Result<Settlement, ResolveError> {
    let topology = market.topology(!options.is_empty());

    match topology {
        Topology::Discrete => {
            let option_id = winning_option_id
                .ok_or_else(|| ResolveError::InvalidSelection("winning option required".into()))?;
            let option = options
                .iter()
                .find(|o| o.id == option_id)
                .ok_or_else(|| ResolveError::InvalidSelection(format!("option {} not in market", option_id)))?;

            Ok(amm_settlement(topology, option, None, options, bets))
        }
        Topology::Bucketed => {
            let value = finite_value(winning_value)?;
            let bucket = find_bucket(options, value).ok_or(ResolveError::ValueOutOfRange(value))?;

            Ok(amm_settlement(topology, bucket.option, Some(value), options, bets))
        }
        Topology::Parimutuel => {
            let value = finite_value(winning_value)?;
            Ok(parimutuel_settlement(value, bets))
        }
    }
}

fn finite_value(value: Option<f64>) -> Result<f64, ResolveError> {
    match value {
        Some(v) if v.is_finite() => Ok(v),
        Some(v) => Err(ResolveError::InvalidSelection(format!("winning value {} is not finite", v))),
        None => Err(ResolveError::InvalidSelection("winning value required".into())),
    }
}

fn amm_settlement(
    topology: Topology,
    winner: &MarketOption,
    winning_value: Option<f64>,
    options: &[MarketOption],
    bets: &[Bet],
) -> Settlement {
    let pool: f64 = options.iter().map(|o| o.liquidity).sum();
    let winners: Vec<(&Bet, f64)> = bets
        .iter()
        .filter(|b| b.option_id.as_deref() == Some(winner.id.as_str()))
        .map(|b| (b, b.shares))
        .collect();
    let (total_weight, payouts) = proportional_payouts(&winners, pool);

    Settlement {
        topology,
        winning_option_id: Some(winner.id.clone()),
        winning_value,
        winning_label: winner.label.clone(),
        pool,
        total_weight,
        payouts,
    }
}

fn parimutuel_settlement(value: f64, bets: &[Bet]) -> Settlement {
    let pool: f64 = bets.iter().map(|b| b.amount as f64).sum();

    let distances: Vec<(&Bet, f64)> = bets
        .iter()
        .filter_map(|b| b.numeric_value.map(|v| (b, (v - value).abs())))
        .collect();
    let closest = distances.iter().map(|(_, d)| *d).fold(f64::INFINITY, f64::min);

    let winners: Vec<(&Bet, f64)> = distances
        .iter()
        .filter(|(_, d)| *d - closest <= TIE_TOLERANCE)
        .map(|(b, _)| (*b, b.amount as f64))
        .collect();
    let (total_weight, payouts) = proportional_payouts(&winners, pool);

    Settlement {
        topology: Topology::Parimutuel,
        winning_option_id: None,
        winning_value: Some(value),
        winning_label: value.to_string(),
        pool,
        total_weight,
        payouts,
    }
}

/// floor(weight / total * pool) per winner. The remainder stays unallocated.
fn proportional_payouts(winners: &[(&Bet, f64)], pool: f64) -> (f64, Vec<BetPayout>) {
    let total_weight: f64 = winners.iter().map(|(_, w)| *w).sum();

    let payouts = winners
        .iter()
        .map(|(bet, weight)| {
            // multiply first: exact for integral stakes and pools
            let amount = if total_weight > 0.0 {
                (weight * pool / total_weight).floor().max(0.0) as u64
            } else {
                0
            };
            BetPayout {
                bet_id: bet.id.clone(),
                user_id: bet.user_id.clone(),
                weight: *weight,
                amount,
            }
        })
        .collect();

    (total_weight, payouts)
}
