// Data models for the arena prediction market

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ============================================================================
// MARKET
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketType {
    Binary,
    MultipleChoice,
    NumericRange,
}

/// Market lifecycle status
///
/// Flow: Open → Resolved (once). Cancelled is terminal and set externally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketStatus {
    Open,
    Resolved,
    Cancelled,
}

impl fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status_str = match self {
            MarketStatus::Open => "open",
            MarketStatus::Resolved => "resolved",
            MarketStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", status_str)
    }
}

/// How a market prices and settles, derived from its type and option set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// Binary or multiple choice: AMM priced, settled on a winning option.
    Discrete,
    /// Numeric range with "min - max" bucket options: AMM priced, settled on a value.
    Bucketed,
    /// Numeric range without options: stakes pooled, nearest predictions win.
    Parimutuel,
}

impl Topology {
    pub fn is_amm(&self) -> bool {
        !matches!(self, Topology::Parimutuel)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub id: String,
    pub arena_id: String,
    pub creator_id: String,
    pub title: String,
    pub market_type: MarketType,
    pub status: MarketStatus,
    pub resolution_date: DateTime<Utc>,
    pub min_bet: Option<u64>,
    pub max_bet: Option<u64>,

    /// Hidden markets also notify the configured watchers on resolution
    #[serde(default)]
    pub hidden: bool,

    pub winning_option_id: Option<String>,
    pub winning_value: Option<f64>,

    /// Opaque reference to whatever evidence the resolver attached
    pub evidence_ref: Option<String>,

    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Market {
    pub fn topology(&self, has_options: bool) -> Topology {
        match self.market_type {
            MarketType::Binary | MarketType::MultipleChoice => Topology::Discrete,
            MarketType::NumericRange if has_options => Topology::Bucketed,
            MarketType::NumericRange => Topology::Parimutuel,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == MarketStatus::Open
    }
}

/// One outcome of a market and its liquidity reserve.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketOption {
    pub id: String,
    pub market_id: String,
    pub label: String,
    pub liquidity: f64,
}

// ============================================================================
// BETS & SNAPSHOTS
// ============================================================================

/// An immutable bet record. `amount` is the stake net of fees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bet {
    pub id: String,
    pub user_id: String,
    pub market_id: String,
    pub option_id: Option<String>,
    pub numeric_value: Option<f64>,
    pub amount: u64,
    pub shares: f64,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub market_id: String,
    pub option_id: String,
    pub price: f64,
    pub created_at: DateTime<Utc>,
}

/// What a bettor picked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Selection {
    Option(String),
    Value(f64),
}

// ============================================================================
// ARENA
// ============================================================================

/// Per-arena betting policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArenaSettings {
    /// Fraction of each stake credited to the market creator, 0 <= f < 1
    pub fee_percent: Decimal,
    pub limit_multiple_bets: bool,
    pub multiple_bet_threshold: u32,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            fee_percent: Decimal::ZERO,
            limit_multiple_bets: false,
            multiple_bet_threshold: 0,
        }
    }
}

// ============================================================================
// ENGINE INPUTS & OUTPUTS
// ============================================================================

#[derive(Debug, Clone)]
pub struct PlaceBet {
    pub user_id: String,
    pub market_id: String,
    pub amount: u64,
    pub selection: Selection,
    pub idempotency_key: Option<String>,
}

/// Success shape of a bet placement. Replays of an idempotency key return the
/// original receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BetReceipt {
    pub bet_id: String,
    pub shares: f64,
}

#[derive(Debug, Clone)]
pub struct ResolveMarket {
    pub caller_is_creator_or_admin: bool,
    pub market_id: String,
    pub winning_option_id: Option<String>,
    pub winning_value: Option<f64>,
    pub evidence_ref: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolveOutcome {
    pub market_id: String,
    /// user id → total payout credited
    pub payouts: BTreeMap<String, u64>,
    pub winning_option_id: Option<String>,
    pub winning_label: String,
    pub pool: f64,
    pub total_paid: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewOption {
    pub label: String,
    pub liquidity: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewMarket {
    pub creator_id: String,
    pub arena_id: String,
    pub title: String,
    pub market_type: MarketType,
    #[serde(default)]
    pub options: Vec<NewOption>,
    pub resolution_date: DateTime<Utc>,
    pub min_bet: Option<u64>,
    pub max_bet: Option<u64>,
    #[serde(default)]
    pub hidden: bool,
}

// ============================================================================
// MARKET VIEW
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct OptionView {
    pub id: String,
    pub label: String,
    pub liquidity: f64,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct OptionPrice {
    pub option_id: String,
    pub price: f64,
}

/// All snapshots written by one repricing event.
#[derive(Debug, Clone, Serialize)]
pub struct PriceTick {
    pub created_at: DateTime<Utc>,
    pub prices: Vec<OptionPrice>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MarketView {
    pub market: Market,
    pub topology: Topology,
    pub options: Vec<OptionView>,
    pub pool: f64,
    pub price_history: Vec<PriceTick>,
    pub my_bets: Vec<Bet>,
}

// ============================================================================
// HTTP REQUEST BODIES
// ============================================================================

/// The bettor is the `x-user-id` caller, never a body field
#[derive(Debug, Deserialize)]
pub struct PlaceBetRequest {
    pub amount: u64,
    pub option_id: Option<String>,
    pub numeric_value: Option<f64>,
    pub idempotency_key: Option<String>,
}

impl PlaceBetRequest {
    /// Exactly one of `option_id` / `numeric_value` must be present.
    pub fn selection(&self) -> Option<Selection> {
        match (&self.option_id, self.numeric_value) {
            (Some(option_id), None) => Some(Selection::Option(option_id.clone())),
            (None, Some(value)) => Some(Selection::Value(value)),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub winning_option_id: Option<String>,
    pub winning_value: Option<f64>,
    pub evidence_ref: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct CreateMarketRequest {
    pub arena_id: String,
    pub title: String,
    pub market_type: MarketType,
    #[serde(default)]
    pub options: Vec<NewOption>,
    pub resolution_date: DateTime<Utc>,
    pub min_bet: Option<u64>,
    pub max_bet: Option<u64>,
    #[serde(default)]
    pub hidden: bool,
}

#[derive(Debug, Deserialize)]
pub struct JoinArenaRequest {
    #[serde(default)]
    pub starting_points: u64,
}

#[derive(Debug, Deserialize)]
pub struct LedgerQuery {
    pub market_id: Option<String>,
    pub user_id: Option<String>,
    pub limit: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn market(market_type: MarketType) -> Market {
        Market {
            id: "m1".into(),
            arena_id: "a1".into(),
            creator_id: "creator".into(),
            title: "Test".into(),
            market_type,
            status: MarketStatus::Open,
            resolution_date: Utc::now() + Duration::days(1),
            min_bet: None,
            max_bet: None,
            hidden: false,
            winning_option_id: None,
            winning_value: None,
            evidence_ref: None,
            created_at: Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn test_topology_by_type_and_options() {
        assert_eq!(market(MarketType::Binary).topology(true), Topology::Discrete);
        assert_eq!(market(MarketType::MultipleChoice).topology(true), Topology::Discrete);
        assert_eq!(market(MarketType::NumericRange).topology(true), Topology::Bucketed);
        assert_eq!(market(MarketType::NumericRange).topology(false), Topology::Parimutuel);
        assert!(!Topology::Parimutuel.is_amm());
    }

    #[test]
    fn test_bet_request_selection() {
        let both = PlaceBetRequest {
            amount: 1,
            option_id: Some("o".into()),
            numeric_value: Some(1.0),
            idempotency_key: None,
        };
        assert_eq!(both.selection(), None);

        let value = PlaceBetRequest { option_id: None, ..both };
        assert_eq!(value.selection(), Some(Selection::Value(1.0)));
    }

    #[test]
    fn test_status_serializes_upper_case() {
        let json = serde_json::to_string(&MarketStatus::Resolved).unwrap();
        assert_eq!(json, "\"RESOLVED\"");
    }
}
