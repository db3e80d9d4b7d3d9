// Market resolution
//
// Settlement is computed and credited inside the same transaction that flips
// the market to RESOLVED, so a second resolver always sees the flipped status.
// Notifications go out after commit.

use std::collections::BTreeSet;

use serde_json::json;
use tracing::info;

use super::markets::MarketEngine;
use super::settlement::{settle, Settlement};
use crate::effects::{EventKind, SideEffect};
use crate::error::{ResolveError, StoreError};
use crate::ledger::LedgerEntry;
use crate::models::{Bet, Market, MarketStatus, ResolveMarket, ResolveOutcome};

impl MarketEngine {
    /// Resolve an open market and pay its winners.
    pub fn resolve_market(&self, req: ResolveMarket) -> Result<ResolveOutcome, ResolveError> {
        if !req.caller_is_creator_or_admin {
            return Err(ResolveError::Unauthorized);
        }

        let (market, bets, settlement) = self.store.transaction(|tx| -> Result<(Market, Vec<Bet>, Settlement), ResolveError> {
            let market = tx
                .market(&req.market_id)
                .cloned()
                .ok_or_else(|| ResolveError::MarketNotFound(req.market_id.clone()))?;
            match market.status {
                MarketStatus::Open => {}
                MarketStatus::Resolved => return Err(ResolveError::AlreadyResolved),
                MarketStatus::Cancelled => return Err(ResolveError::MarketCancelled),
            }

            let options = tx.options_for(&market.id);
            let bets = tx.bets_for(&market.id);
            let settlement = settle(
                &market,
                &options,
                &bets,
                req.winning_option_id.as_deref(),
                req.winning_value,
            )?;

            for payout in settlement.payouts.iter().filter(|p| p.amount > 0) {
                tx.credit(
                    &payout.user_id,
                    &market.arena_id,
                    payout.amount,
                    LedgerEntry::win_payout(&payout.user_id, &market.id, &market.arena_id, payout.amount),
                )?;
            }

            tx.mark_resolved(
                &market.id,
                settlement.winning_option_id.clone(),
                settlement.winning_value,
                req.evidence_ref.clone(),
            )
            .map_err(|e| match e {
                StoreError::MarketNotOpen { status: MarketStatus::Cancelled, .. } => ResolveError::MarketCancelled,
                StoreError::MarketNotOpen { .. } => ResolveError::AlreadyResolved,
                other => other.into(),
            })?;

            Ok((market, bets, settlement))
        })?;

        info!(
            "🏁 Market {} resolved to {:?}: {} winning bets, paid {} of pool {:.2} (dust {:.2})",
            market.id,
            settlement.winning_label,
            settlement.payouts.len(),
            settlement.total_paid(),
            settlement.pool,
            settlement.dust()
        );
        self.notify_resolution(&market, &bets, &settlement);

        Ok(ResolveOutcome {
            market_id: market.id,
            payouts: settlement.payouts_by_user(),
            winning_option_id: settlement.winning_option_id.clone(),
            winning_label: settlement.winning_label.clone(),
            pool: settlement.pool,
            total_paid: settlement.total_paid(),
        })
    }

    /// BET_WON / BET_LOST per bettor, MARKET_RESOLVED to the creator and,
    /// for hidden markets, to every watcher.
    fn notify_resolution(&self, market: &Market, bets: &[Bet], settlement: &Settlement) {
        let payouts = settlement.payouts_by_user();
        let bettors: BTreeSet<&str> = bets.iter().map(|b| b.user_id.as_str()).collect();

        for user_id in bettors {
            let won = bets
                .iter()
                .any(|b| b.user_id == user_id && settlement.is_winner(&b.id));
            let (kind, payload) = if won {
                let payout = payouts.get(user_id).copied().unwrap_or(0);
                (
                    EventKind::BetWon,
                    json!({
                        "market_id": market.id,
                        "title": market.title,
                        "winning_label": settlement.winning_label,
                        "payout": payout,
                    }),
                )
            } else {
                (
                    EventKind::BetLost,
                    json!({
                        "market_id": market.id,
                        "title": market.title,
                        "winning_label": settlement.winning_label,
                    }),
                )
            };
            self.effects.emit(SideEffect::Notify {
                user_id: user_id.to_string(),
                kind,
                payload,
            });
        }

        let mut resolved_to: BTreeSet<&str> = BTreeSet::new();
        resolved_to.insert(market.creator_id.as_str());
        if market.hidden {
            resolved_to.extend(self.hidden_watchers.iter().map(String::as_str));
        }
        let summary = json!({
            "market_id": market.id,
            "title": market.title,
            "winning_label": settlement.winning_label,
            "total_paid": settlement.total_paid(),
        });
        for user_id in resolved_to {
            self.effects.emit(SideEffect::Notify {
                user_id: user_id.to_string(),
                kind: EventKind::MarketResolved,
                payload: summary.clone(),
            });
        }
    }
}
