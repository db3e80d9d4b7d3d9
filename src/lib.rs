/// Arena Prediction Market
/// Exports all modules for use as a library crate

pub mod app_state;
pub mod auth;
pub mod config;
pub mod effects;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod market_resolve;
pub mod models;
pub mod routes;
pub mod store;

pub use app_state::{AppState, SharedState};
pub use auth::Caller;
pub use config::{Config, LoggingConfig};
pub use effects::{EventKind, Notifier, SentimentTrigger, SideEffect, SideEffects};
pub use error::{BetError, ConfigError, CreateMarketError, EffectError, PoolError, ResolveError, StoreError};
pub use ledger::{Ledger, LedgerEntry, LedgerStats, MembershipBalance, TxType};
pub use market_resolve::{CPMMPool, MarketEngine, Settlement, SwapResult};
pub use models::*;
pub use store::{DeletedMarket, Store, StoreState, Tx};
