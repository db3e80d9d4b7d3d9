// Bet placement
//
// Preconditions are checked in order and abort before any write. The writes
// themselves (debit, creator fee, repricing, snapshots, bet row) run in one
// store transaction. A repeated idempotency key resolves to the original
// receipt.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;

use super::cpmm::CPMMPool;
use super::markets::{price_snapshots, MarketEngine};
use crate::effects::SideEffect;
use crate::error::{BetError, StoreError};
use crate::ledger::LedgerEntry;
use crate::models::{Bet, BetReceipt, MarketOption, MarketStatus, PlaceBet, Selection, Topology};
use crate::store::Tx;

/// Relative drift of k tolerated across one repricing
const K_TOLERANCE: f64 = 1e-9;

enum Placement {
    New {
        receipt: BetReceipt,
        arena_id: String,
        text: String,
        fee: u64,
    },
    Replayed(BetReceipt),
}

impl MarketEngine {
    /// Place a bet and return `{bet_id, shares}`.
    pub fn place_bet(&self, req: PlaceBet) -> Result<BetReceipt, BetError> {
        let result = self.store.transaction(|tx| self.place_in_tx(tx, &req));

        match result {
            Ok(Placement::New { receipt, arena_id, text, fee }) => {
                info!(
                    "🎯 {} bet {} on market {} in arena {} (fee {}, {:.4} shares)",
                    req.user_id, req.amount, req.market_id, arena_id, fee, receipt.shares
                );
                self.effects.emit(SideEffect::Sentiment {
                    market_id: req.market_id.clone(),
                    text,
                });
                Ok(receipt)
            }
            Ok(Placement::Replayed(receipt)) => {
                debug!("🔁 Idempotent replay of bet {}", receipt.bet_id);
                Ok(receipt)
            }
            Err(BetError::Store(StoreError::DuplicateIdempotencyKey(key))) => self
                .store
                .read(|state| state.bet_by_idempotency_key(&key).map(receipt_for))
                .ok_or(BetError::Store(StoreError::DuplicateIdempotencyKey(key))),
            Err(e) => Err(e),
        }
    }

    fn place_in_tx(&self, tx: &mut Tx<'_>, req: &PlaceBet) -> Result<Placement, BetError> {
        if let Some(key) = &req.idempotency_key {
            if let Some(original) = tx.bet_by_idempotency_key(key) {
                return Ok(Placement::Replayed(receipt_for(original)));
            }
        }

        // 1. market is open and not past its resolution date
        let market = tx
            .market(&req.market_id)
            .cloned()
            .ok_or_else(|| BetError::MarketNotFound(req.market_id.clone()))?;
        match market.status {
            MarketStatus::Open => {}
            MarketStatus::Resolved => return Err(BetError::MarketClosed),
            MarketStatus::Cancelled => return Err(BetError::MarketCancelled),
        }
        if Utc::now() > market.resolution_date {
            return Err(BetError::MarketExpired);
        }

        // 2. stake bounds; a stake must be positive whatever min_bet says
        let min = market.min_bet.unwrap_or(1).max(1);
        if req.amount < min {
            return Err(BetError::BelowMinBet { amount: req.amount, min });
        }
        if let Some(max) = market.max_bet {
            if req.amount > max {
                return Err(BetError::AboveMaxBet { amount: req.amount, max });
            }
        }

        // 3. selection matches the market's topology
        let options = tx.options_for(&market.id);
        let topology = market.topology(!options.is_empty());
        let target = select_target(topology, &options, &req.selection)?;

        // 4. membership
        let balance = tx.balance(&req.user_id, &market.arena_id).ok_or(BetError::NotAMember)?;

        // 5. repeat-bet policy
        let settings = self.settings_in(&**tx, &market.arena_id);
        if settings.limit_multiple_bets {
            let bettors = tx.distinct_bettors(&market.id);
            if bettors.contains(&req.user_id) {
                let others = (bettors.len() - 1) as u32;
                if others < settings.multiple_bet_threshold {
                    return Err(BetError::RestrictedByThreshold {
                        current: others,
                        threshold: settings.multiple_bet_threshold,
                    });
                }
            }
        }

        // 6. funds
        if balance < req.amount {
            return Err(BetError::InsufficientBalance {
                have: balance,
                need: req.amount,
            });
        }

        // ====================================================================
        // atomic unit
        // ====================================================================

        tx.debit(
            &req.user_id,
            &market.arena_id,
            req.amount,
            LedgerEntry::bet_placed(&req.user_id, &market.id, &market.arena_id, req.amount),
        )?;

        let fee = creator_fee(req.amount, settings.fee_percent);
        let net_amount = req.amount - fee;
        if fee > 0 {
            tx.credit(
                &market.creator_id,
                &market.arena_id,
                fee,
                LedgerEntry::fee_collected(&req.user_id, &market.creator_id, &market.id, &market.arena_id, fee),
            )?;
        }

        let now = Utc::now();
        let shares = match target {
            Some(index) => {
                let pool = CPMMPool::new(options.iter().map(|o| o.liquidity).collect())?;
                let k_before = pool.k();
                let swap = pool.quote(index, net_amount as f64)?;

                for (option, liquidity) in options.iter().zip(&swap.new_reserves) {
                    tx.set_liquidity(&option.id, *liquidity)?;
                }
                let k_after: f64 = swap.new_reserves.iter().product();
                if ((k_after - k_before) / k_before).abs() > K_TOLERANCE {
                    return Err(StoreError::InvariantViolation(format!(
                        "k drifted from {} to {} on market {}",
                        k_before, k_after, market.id
                    ))
                    .into());
                }
                debug!(
                    "💱 Repriced {}: {:.4} -> {:.4} for {}",
                    market.id, swap.old_price, swap.new_price, options[index].label
                );

                tx.record_snapshots(&market.id, price_snapshots(&options, &swap.new_prices, now));
                swap.shares
            }
            None => net_amount as f64,
        };

        let bet = Bet {
            id: Uuid::new_v4().to_string(),
            user_id: req.user_id.clone(),
            market_id: market.id.clone(),
            option_id: target.map(|i| options[i].id.clone()),
            numeric_value: match req.selection {
                Selection::Value(v) => Some(v),
                Selection::Option(_) => None,
            },
            amount: net_amount,
            shares,
            idempotency_key: req.idempotency_key.clone(),
            created_at: now,
        };
        let receipt = receipt_for(&bet);
        let picked = match target {
            Some(i) => options[i].label.clone(),
            None => bet.numeric_value.map(|v| v.to_string()).unwrap_or_default(),
        };
        tx.insert_bet(bet)?;

        Ok(Placement::New {
            receipt,
            arena_id: market.arena_id.clone(),
            text: format!("{} bet {} points on \"{}\" in \"{}\"", req.user_id, req.amount, picked, market.title),
            fee,
        })
    }
}

/// Index of the option a bet buys, or None for a parimutuel prediction
fn select_target(topology: Topology, options: &[MarketOption], selection: &Selection) -> Result<Option<usize>, BetError> {
    match (topology, selection) {
        (Topology::Discrete | Topology::Bucketed, Selection::Option(option_id)) => options
            .iter()
            .position(|o| &o.id == option_id)
            .map(Some)
            .ok_or_else(|| BetError::InvalidSelection(format!("option {} not in market", option_id))),
        (Topology::Discrete | Topology::Bucketed, Selection::Value(_)) => {
            Err(BetError::InvalidSelection("this market takes an option id".into()))
        }
        (Topology::Parimutuel, Selection::Value(v)) if v.is_finite() => Ok(None),
        (Topology::Parimutuel, Selection::Value(v)) => {
            Err(BetError::InvalidSelection(format!("prediction {} is not finite", v)))
        }
        (Topology::Parimutuel, Selection::Option(_)) => {
            Err(BetError::InvalidSelection("this market takes a numeric value".into()))
        }
    }
}

/// floor(amount * fee_percent), computed exactly
fn creator_fee(amount: u64, fee_percent: Decimal) -> u64 {
    if fee_percent <= Decimal::ZERO {
        return 0;
    }
    (Decimal::from(amount) * fee_percent)
        .floor()
        .to_u64()
        .unwrap_or(0)
        .min(amount)
}

fn receipt_for(bet: &Bet) -> BetReceipt {
    BetReceipt {
        bet_id: bet.id.clone(),
        shares: bet.shares,
    }
}
