use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use super::buckets::{overlapping_labels, parse_bucket_label};
use super::cpmm::inverse_liquidity_prices;
use crate::effects::SideEffects;
use crate::error::{CreateMarketError, StoreError};
use crate::ledger::{LedgerEntry, LedgerStats};
use crate::models::{
    ArenaSettings, Market, MarketOption, MarketStatus, MarketType, MarketView, NewMarket, OptionPrice, OptionView,
    PriceSnapshot, PriceTick,
};
use crate::store::{DeletedMarket, Store, StoreState};

/// Prediction market engine
///
/// Owns the store handle and the post-commit side effect queue. Market
/// lifecycle lives here; `place_bet` and `resolve_market` live in their own
/// modules as further `impl MarketEngine` blocks.
#[derive(Clone)]
pub struct MarketEngine {
    pub(crate) store: Arc<Store>,
    pub(crate) effects: SideEffects,
    pub(crate) arena_defaults: ArenaSettings,
    pub(crate) hidden_watchers: Vec<String>,
}

impl MarketEngine {
    pub fn new(store: Arc<Store>, effects: SideEffects) -> Self {
        Self {
            store,
            effects,
            arena_defaults: ArenaSettings::default(),
            hidden_watchers: Vec::new(),
        }
    }

    /// Policy for arenas without explicit settings
    pub fn with_arena_defaults(mut self, defaults: ArenaSettings) -> Self {
        self.arena_defaults = defaults;
        self
    }

    /// Users told about every hidden market resolution
    pub fn with_hidden_watchers(mut self, watchers: Vec<String>) -> Self {
        self.hidden_watchers = watchers;
        self
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    // ========================================================================
    // ARENAS & MEMBERSHIP
    // ========================================================================

    pub(crate) fn settings_in(&self, state: &StoreState, arena_id: &str) -> ArenaSettings {
        state
            .arena_settings(arena_id)
            .cloned()
            .unwrap_or_else(|| self.arena_defaults.clone())
    }

    pub fn arena_settings(&self, arena_id: &str) -> ArenaSettings {
        self.store.read(|state| self.settings_in(state, arena_id))
    }

    /// Override the betting policy of one arena.
    pub fn configure_arena(&self, arena_id: &str, settings: ArenaSettings) -> Result<(), StoreError> {
        if settings.fee_percent < Decimal::ZERO || settings.fee_percent >= Decimal::ONE {
            return Err(StoreError::InvariantViolation(format!(
                "fee_percent {} must satisfy 0 <= fee < 1",
                settings.fee_percent
            )));
        }
        self.store.transaction(|tx| -> Result<(), StoreError> {
            tx.set_arena_settings(arena_id, settings);
            Ok(())
        })?;
        info!("⚙️ Arena {} configured", arena_id);
        Ok(())
    }

    /// Join an arena with `starting_points`. Joining twice keeps the existing
    /// balance. Returns the member's balance.
    pub fn join_arena(&self, user_id: &str, arena_id: &str, starting_points: u64) -> Result<u64, StoreError> {
        let (balance, created) = self.store.transaction(|tx| -> Result<(u64, bool), StoreError> {
            let created = tx.open_membership(user_id, arena_id, starting_points);
            if created && starting_points > 0 {
                tx.record_entry(LedgerEntry::grant(user_id, arena_id, starting_points));
            }
            let balance = tx.balance(user_id, arena_id).ok_or_else(|| StoreError::MembershipNotFound {
                user_id: user_id.to_string(),
                arena_id: arena_id.to_string(),
            })?;
            Ok((balance, created))
        })?;

        if created {
            info!("🆕 {} joined arena {} with {} points", user_id, arena_id, starting_points);
        }
        Ok(balance)
    }

    pub fn balance(&self, user_id: &str, arena_id: &str) -> Option<u64> {
        self.store.read(|state| state.balance(user_id, arena_id))
    }

    // ========================================================================
    // MARKETS
    // ========================================================================

    /// Validate and insert a market with its options.
    ///
    /// AMM markets get an initial price tick so their chart starts at creation.
    pub fn create_market(&self, new: NewMarket) -> Result<Market, CreateMarketError> {
        validate_new_market(&new)?;

        let now = Utc::now();
        let market_id = Uuid::new_v4().to_string();
        let options: Vec<MarketOption> = new
            .options
            .iter()
            .map(|o| MarketOption {
                id: Uuid::new_v4().to_string(),
                market_id: market_id.clone(),
                label: o.label.trim().to_string(),
                liquidity: o.liquidity,
            })
            .collect();
        let market = Market {
            id: market_id.clone(),
            arena_id: new.arena_id.clone(),
            creator_id: new.creator_id.clone(),
            title: new.title.trim().to_string(),
            market_type: new.market_type,
            status: MarketStatus::Open,
            resolution_date: new.resolution_date,
            min_bet: new.min_bet,
            max_bet: new.max_bet,
            hidden: new.hidden,
            winning_option_id: None,
            winning_value: None,
            evidence_ref: None,
            created_at: now,
            resolved_at: None,
        };

        let snapshots = initial_snapshots(&options, now);
        self.store.transaction(|tx| -> Result<(), CreateMarketError> {
            if tx.balance(&new.creator_id, &new.arena_id).is_none() {
                return Err(CreateMarketError::NotAMember(new.arena_id.clone()));
            }
            tx.insert_market(market.clone(), options);
            if !snapshots.is_empty() {
                tx.record_snapshots(&market_id, snapshots);
            }
            Ok(())
        })?;

        info!(
            "📊 Market created: {} ({:?}) in arena {} by {}",
            market.title, market.market_type, market.arena_id, market.creator_id
        );
        Ok(market)
    }

    pub fn market(&self, market_id: &str) -> Option<Market> {
        self.store.read(|state| state.market(market_id).cloned())
    }

    pub fn markets_in_arena(&self, arena_id: &str) -> Vec<Market> {
        self.store
            .read(|state| state.markets_in_arena(arena_id).into_iter().cloned().collect())
    }

    /// Market, current prices, chart history and the caller's own bets, all
    /// read from one consistent snapshot.
    pub fn market_view(&self, market_id: &str, caller_id: Option<&str>) -> Option<MarketView> {
        self.store.read(|state| {
            let market = state.market(market_id)?.clone();
            let options = state.options_for(market_id);
            let topology = market.topology(!options.is_empty());

            let liquidities: Vec<f64> = options.iter().map(|o| o.liquidity).collect();
            let prices = inverse_liquidity_prices(&liquidities);
            let pool: f64 = if topology.is_amm() {
                liquidities.iter().sum()
            } else {
                state.bets_for(market_id).iter().map(|b| b.amount as f64).sum()
            };

            let option_views = options
                .into_iter()
                .zip(prices)
                .map(|(o, price)| OptionView {
                    id: o.id,
                    label: o.label,
                    liquidity: o.liquidity,
                    price,
                })
                .collect();
            let my_bets = caller_id
                .map(|user_id| state.bets_by_user(market_id, user_id))
                .unwrap_or_default();

            Some(MarketView {
                market,
                topology,
                options: option_views,
                pool,
                price_history: group_ticks(state.snapshots_for(market_id)),
                my_bets,
            })
        })
    }

    /// Admin cascade delete. Points already moved stay where they are.
    pub fn delete_market(&self, market_id: &str) -> Result<DeletedMarket, StoreError> {
        self.store.delete_market(market_id)
    }

    // ========================================================================
    // LEDGER READS
    // ========================================================================

    /// Newest first, optionally filtered by market and/or user
    pub fn ledger_entries(&self, market_id: Option<&str>, user_id: Option<&str>, limit: usize) -> Vec<LedgerEntry> {
        self.store.read(|state| {
            state
                .ledger()
                .entries()
                .iter()
                .rev()
                .filter(|e| market_id.map_or(true, |m| e.market_id.as_deref() == Some(m)))
                .filter(|e| user_id.map_or(true, |u| e.touches_user(u)))
                .take(limit)
                .cloned()
                .collect()
        })
    }

    /// Ok, or the index of the first entry whose hash does not chain
    pub fn verify_ledger(&self) -> Result<(), usize> {
        self.store.read(|state| state.ledger().verify())
    }

    pub fn ledger_stats(&self) -> LedgerStats {
        self.store.read(|state| state.ledger().stats())
    }
}

// ============================================================================
// HELPERS
// ============================================================================

fn validate_new_market(new: &NewMarket) -> Result<(), CreateMarketError> {
    let count = new.options.len();
    match new.market_type {
        MarketType::Binary if count != 2 => {
            return Err(CreateMarketError::InvalidOptions(format!(
                "binary markets need exactly 2 options, got {}",
                count
            )));
        }
        MarketType::MultipleChoice if count < 2 => {
            return Err(CreateMarketError::InvalidOptions(format!(
                "multiple choice markets need at least 2 options, got {}",
                count
            )));
        }
        MarketType::NumericRange if count == 1 => {
            return Err(CreateMarketError::InvalidOptions(
                "numeric markets need no options or at least 2 buckets".into(),
            ));
        }
        _ => {}
    }

    let mut labels = HashSet::new();
    for option in &new.options {
        let label = option.label.trim();
        if label.is_empty() {
            return Err(CreateMarketError::InvalidOptions("option labels cannot be empty".into()));
        }
        if !labels.insert(label) {
            return Err(CreateMarketError::InvalidOptions(format!("duplicate option {:?}", label)));
        }
        if !option.liquidity.is_finite() || option.liquidity <= 0.0 {
            return Err(CreateMarketError::InvalidLiquidity(option.liquidity));
        }
        if new.market_type == MarketType::NumericRange && parse_bucket_label(label).is_none() {
            return Err(CreateMarketError::InvalidBucketLabel(option.label.clone()));
        }
    }
    if new.market_type == MarketType::NumericRange {
        let labels: Vec<&str> = new.options.iter().map(|o| o.label.trim()).collect();
        if let Some((first, second)) = overlapping_labels(&labels) {
            return Err(CreateMarketError::InvalidOptions(format!(
                "buckets {:?} and {:?} overlap",
                first, second
            )));
        }
    }

    if let (Some(min), Some(max)) = (new.min_bet, new.max_bet) {
        if min > max {
            return Err(CreateMarketError::InvalidBetBounds { min, max });
        }
    }
    if new.resolution_date <= Utc::now() {
        return Err(CreateMarketError::ResolutionInPast);
    }
    Ok(())
}

fn initial_snapshots(options: &[MarketOption], at: chrono::DateTime<Utc>) -> Vec<PriceSnapshot> {
    let liquidities: Vec<f64> = options.iter().map(|o| o.liquidity).collect();
    price_snapshots(options, &inverse_liquidity_prices(&liquidities), at)
}

/// One snapshot per option, all stamped `at`
pub(crate) fn price_snapshots(options: &[MarketOption], prices: &[f64], at: chrono::DateTime<Utc>) -> Vec<PriceSnapshot> {
    options
        .iter()
        .zip(prices)
        .map(|(option, price)| PriceSnapshot {
            market_id: option.market_id.clone(),
            option_id: option.id.clone(),
            price: *price,
            created_at: at,
        })
        .collect()
}

/// Consecutive snapshots sharing a timestamp form one chart tick
fn group_ticks(snapshots: &[PriceSnapshot]) -> Vec<PriceTick> {
    let mut ticks: Vec<PriceTick> = Vec::new();
    for snapshot in snapshots {
        let price = OptionPrice {
            option_id: snapshot.option_id.clone(),
            price: snapshot.price,
        };
        match ticks.last_mut() {
            Some(tick) if tick.created_at == snapshot.created_at => tick.prices.push(price),
            _ => ticks.push(PriceTick {
                created_at: snapshot.created_at,
                prices: vec![price],
            }),
        }
    }
    ticks
}
