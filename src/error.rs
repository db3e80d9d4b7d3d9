// Error taxonomy for the market engine
//
// Validation, state and resource errors abort before any mutation. Anything
// raised from inside a store transaction rolls the whole unit back.

use thiserror::Error;

use crate::models::MarketStatus;

/// Errors raised by the transactional store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("idempotency key {0} already used")]
    DuplicateIdempotencyKey(String),

    #[error("insufficient funds: have {have}, need {need}")]
    InsufficientFunds { have: u64, need: u64 },

    #[error("no membership for user {user_id} in arena {arena_id}")]
    MembershipNotFound { user_id: String, arena_id: String },

    #[error("market {0} not found")]
    MarketNotFound(String),

    #[error("option {0} not found")]
    OptionNotFound(String),

    #[error("market {market_id} is {status}, expected open")]
    MarketNotOpen { market_id: String, status: MarketStatus },

    #[error("balance overflow for user {0}")]
    BalanceOverflow(String),

    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    #[error("persistence failed: {0}")]
    Persistence(String),
}

/// Failures of the constant-product pool.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PoolError {
    #[error("pool has no outcomes")]
    EmptyPool,

    #[error("invalid reserve {0}, must be finite and positive")]
    InvalidReserve(f64),

    #[error("invalid outcome index {0}")]
    InvalidOutcome(usize),

    #[error("invalid stake {0}")]
    InvalidAmount(f64),
}

/// Failures of `place_bet`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BetError {
    #[error("market {0} not found")]
    MarketNotFound(String),

    #[error("market is closed for betting")]
    MarketClosed,

    #[error("market was cancelled")]
    MarketCancelled,

    #[error("market passed its resolution date")]
    MarketExpired,

    #[error("bet of {amount} is below the minimum of {min}")]
    BelowMinBet { amount: u64, min: u64 },

    #[error("bet of {amount} is above the maximum of {max}")]
    AboveMaxBet { amount: u64, max: u64 },

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("not a member of this arena")]
    NotAMember,

    #[error("restricted: {current} other bettors, {threshold} required before betting again")]
    RestrictedByThreshold { current: u32, threshold: u32 },

    #[error("insufficient balance: have {have}, need {need}")]
    InsufficientBalance { have: u64, need: u64 },

    #[error("repricing failed: {0}")]
    Pricing(#[from] PoolError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of `resolve_market`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolveError {
    #[error("only the market creator or an admin may resolve")]
    Unauthorized,

    #[error("market {0} not found")]
    MarketNotFound(String),

    #[error("market already resolved")]
    AlreadyResolved,

    #[error("market was cancelled")]
    MarketCancelled,

    #[error("invalid selection: {0}")]
    InvalidSelection(String),

    #[error("value {0} does not fall in any bucket")]
    ValueOutOfRange(f64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failures of `create_market`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CreateMarketError {
    #[error("creator is not a member of arena {0}")]
    NotAMember(String),

    #[error("invalid options: {0}")]
    InvalidOptions(String),

    #[error("invalid liquidity {0}, must be finite and positive")]
    InvalidLiquidity(f64),

    #[error("bucket label {0:?} is not of the form \"min - max\"")]
    InvalidBucketLabel(String),

    #[error("min bet {min} exceeds max bet {max}")]
    InvalidBetBounds { min: u64, max: u64 },

    #[error("resolution date must be in the future")]
    ResolutionInPast,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bad environment configuration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid { var: &'static str, value: String, reason: String },
}

/// Failures of a best-effort collaborator call. Logged, never surfaced.
#[derive(Debug, Error)]
pub enum EffectError {
    #[error("webhook request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("webhook returned status {0}")]
    Status(u16),
}
