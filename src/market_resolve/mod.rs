// ============================================================================
// Market Resolve Module - Pricing, Betting & Settlement
// ============================================================================
//
//   - cpmm: generalized N-outcome constant product pool
//   - buckets: "min - max" numeric bucket labels
//   - settlement: winners and payouts per market topology
//   - markets: MarketEngine, market lifecycle and views
//   - placement: place_bet
//   - resolution: resolve_market
//
// ============================================================================

pub mod buckets;
pub mod cpmm;
pub mod markets;
pub mod placement;
pub mod resolution;
pub mod settlement;

pub use buckets::{find_bucket, overlapping_labels, parse_bucket_label, Bucket};
pub use cpmm::{inverse_liquidity_prices, CPMMPool, SwapResult};
pub use markets::MarketEngine;
pub use settlement::{settle, BetPayout, Settlement, TIE_TOLERANCE};
