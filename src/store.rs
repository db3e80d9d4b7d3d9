//! Transactional store for markets, options, bets, snapshots and balances
//!
//! Every write goes through [`Store::transaction`]: the closure runs while the
//! store lock is held, each mutation records how to undo itself, and unless
//! the closure returns `Ok` the undo log is replayed in reverse. Readers see
//! either all of a transaction or none of it.
//!
//! The lock is store-wide, so two bets on the same market, two debits of the
//! same balance, and a bet racing a resolution are all serialized.

use std::collections::{HashMap, HashSet};
use std::ops::Deref;
use std::path::Path;

use chrono::Utc;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::StoreError;
use crate::ledger::{Ledger, LedgerEntry};
use crate::models::{ArenaSettings, Bet, Market, MarketOption, MarketStatus, PriceSnapshot};

// ============================================================================
// STATE
// ============================================================================

/// Arena-owned index: market -> options (in display order) and bets (in
/// placement order)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MarketIndex {
    pub option_ids: Vec<String>,
    pub bet_ids: Vec<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct StoreState {
    arenas: HashMap<String, ArenaSettings>,
    arena_markets: HashMap<String, Vec<String>>,
    markets: HashMap<String, Market>,
    index: HashMap<String, MarketIndex>,
    options: HashMap<String, MarketOption>,
    bets: HashMap<String, Bet>,
    /// Unique index: idempotency key -> bet id
    idempotency_keys: HashMap<String, String>,
    snapshots: HashMap<String, Vec<PriceSnapshot>>,
    ledger: Ledger,
}

impl StoreState {
    pub fn arena_settings(&self, arena_id: &str) -> Option<&ArenaSettings> {
        self.arenas.get(arena_id)
    }

    pub fn market(&self, market_id: &str) -> Option<&Market> {
        self.markets.get(market_id)
    }

    pub fn markets_in_arena(&self, arena_id: &str) -> Vec<&Market> {
        self.arena_markets
            .get(arena_id)
            .map(|ids| ids.iter().filter_map(|id| self.markets.get(id)).collect())
            .unwrap_or_default()
    }

    /// Options in creation order
    pub fn options_for(&self, market_id: &str) -> Vec<MarketOption> {
        self.index
            .get(market_id)
            .map(|idx| idx.option_ids.iter().filter_map(|id| self.options.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    /// Bets in placement order
    pub fn bets_for(&self, market_id: &str) -> Vec<Bet> {
        self.index
            .get(market_id)
            .map(|idx| idx.bet_ids.iter().filter_map(|id| self.bets.get(id).cloned()).collect())
            .unwrap_or_default()
    }

    pub fn bets_by_user(&self, market_id: &str, user_id: &str) -> Vec<Bet> {
        self.bets_for(market_id).into_iter().filter(|b| b.user_id == user_id).collect()
    }

    pub fn distinct_bettors(&self, market_id: &str) -> HashSet<String> {
        self.index
            .get(market_id)
            .map(|idx| {
                idx.bet_ids
                    .iter()
                    .filter_map(|id| self.bets.get(id))
                    .map(|b| b.user_id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn bet(&self, bet_id: &str) -> Option<&Bet> {
        self.bets.get(bet_id)
    }

    pub fn bet_by_idempotency_key(&self, key: &str) -> Option<&Bet> {
        self.idempotency_keys.get(key).and_then(|id| self.bets.get(id))
    }

    pub fn snapshots_for(&self, market_id: &str) -> &[PriceSnapshot] {
        self.snapshots.get(market_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn balance(&self, user_id: &str, arena_id: &str) -> Option<u64> {
        self.ledger.balance(user_id, arena_id)
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }
}

// ============================================================================
// TRANSACTION
// ============================================================================

enum Undo {
    ArenaSettings { arena_id: String, previous: Option<ArenaSettings> },
    Membership { user_id: String, arena_id: String },
    Points { user_id: String, arena_id: String, previous: u64 },
    Entry,
    MarketInserted { market_id: String },
    Market(Box<Market>),
    Liquidity { option_id: String, previous: f64 },
    BetInserted { bet_id: String },
    Snapshots { market_id: String, previous_len: usize },
}

/// A unit of work over the store. Reads go through `Deref<Target = StoreState>`,
/// writes through the methods below. Dropped without commit, it rolls back.
pub struct Tx<'a> {
    state: &'a mut StoreState,
    undo: Vec<Undo>,
    committed: bool,
}

impl Deref for Tx<'_> {
    type Target = StoreState;

    fn deref(&self) -> &StoreState {
        &*self.state
    }
}

impl Drop for Tx<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.rollback();
        }
    }
}

impl<'a> Tx<'a> {
    pub fn set_arena_settings(&mut self, arena_id: &str, settings: ArenaSettings) {
        let previous = self.state.arenas.insert(arena_id.to_string(), settings);
        self.undo.push(Undo::ArenaSettings { arena_id: arena_id.to_string(), previous });
    }

    /// Create a membership with `points`. Returns false if it already existed.
    pub fn open_membership(&mut self, user_id: &str, arena_id: &str, points: u64) -> bool {
        let created = self.state.ledger.open_membership(user_id, arena_id, points);
        if created {
            self.undo.push(Undo::Membership {
                user_id: user_id.to_string(),
                arena_id: arena_id.to_string(),
            });
        }
        created
    }

    /// Check-and-subtract in one step, recording `entry`. Returns the new balance.
    pub fn debit(&mut self, user_id: &str, arena_id: &str, amount: u64, entry: LedgerEntry) -> Result<u64, StoreError> {
        let previous = self.state.ledger.debit(user_id, arena_id, amount)?;
        self.undo.push(Undo::Points {
            user_id: user_id.to_string(),
            arena_id: arena_id.to_string(),
            previous,
        });
        self.record_entry(entry);
        Ok(previous - amount)
    }

    /// Add points, recording `entry`. Returns the new balance.
    pub fn credit(&mut self, user_id: &str, arena_id: &str, amount: u64, entry: LedgerEntry) -> Result<u64, StoreError> {
        let previous = self.state.ledger.credit(user_id, arena_id, amount)?;
        self.undo.push(Undo::Points {
            user_id: user_id.to_string(),
            arena_id: arena_id.to_string(),
            previous,
        });
        self.record_entry(entry);
        Ok(previous + amount)
    }

    pub fn record_entry(&mut self, entry: LedgerEntry) {
        self.state.ledger.append(entry);
        self.undo.push(Undo::Entry);
    }

    pub fn insert_market(&mut self, market: Market, options: Vec<MarketOption>) {
        let market_id = market.id.clone();
        let index = MarketIndex {
            option_ids: options.iter().map(|o| o.id.clone()).collect(),
            bet_ids: Vec::new(),
        };

        self.state
            .arena_markets
            .entry(market.arena_id.clone())
            .or_default()
            .push(market_id.clone());
        for option in options {
            self.state.options.insert(option.id.clone(), option);
        }
        self.state.index.insert(market_id.clone(), index);
        self.state.markets.insert(market_id.clone(), market);
        self.undo.push(Undo::MarketInserted { market_id });
    }

    /// Overwrite an option's reserve. Only the repricing step calls this.
    pub fn set_liquidity(&mut self, option_id: &str, liquidity: f64) -> Result<(), StoreError> {
        if !liquidity.is_finite() || liquidity <= 0.0 {
            return Err(StoreError::InvariantViolation(format!(
                "liquidity {} for option {} must be finite and positive",
                liquidity, option_id
            )));
        }
        let option = self
            .state
            .options
            .get_mut(option_id)
            .ok_or_else(|| StoreError::OptionNotFound(option_id.to_string()))?;
        let previous = option.liquidity;
        option.liquidity = liquidity;
        self.undo.push(Undo::Liquidity { option_id: option_id.to_string(), previous });
        Ok(())
    }

    /// Insert a bet. Fails if its idempotency key is already taken.
    pub fn insert_bet(&mut self, bet: Bet) -> Result<(), StoreError> {
        if let Some(key) = &bet.idempotency_key {
            if self.state.idempotency_keys.contains_key(key) {
                return Err(StoreError::DuplicateIdempotencyKey(key.clone()));
            }
        }
        let index = self
            .state
            .index
            .get_mut(&bet.market_id)
            .ok_or_else(|| StoreError::MarketNotFound(bet.market_id.clone()))?;

        index.bet_ids.push(bet.id.clone());
        if let Some(key) = &bet.idempotency_key {
            self.state.idempotency_keys.insert(key.clone(), bet.id.clone());
        }
        let bet_id = bet.id.clone();
        self.state.bets.insert(bet_id.clone(), bet);
        self.undo.push(Undo::BetInserted { bet_id });
        Ok(())
    }

    pub fn record_snapshots(&mut self, market_id: &str, snapshots: Vec<PriceSnapshot>) {
        let series = self.state.snapshots.entry(market_id.to_string()).or_default();
        let previous_len = series.len();
        series.extend(snapshots);
        self.undo.push(Undo::Snapshots { market_id: market_id.to_string(), previous_len });
    }

    /// Flip an open market to resolved. The status check and the write happen
    /// under the same lock, so only the first resolver gets through.
    pub fn mark_resolved(
        &mut self,
        market_id: &str,
        winning_option_id: Option<String>,
        winning_value: Option<f64>,
        evidence_ref: Option<String>,
    ) -> Result<(), StoreError> {
        let market = self
            .state
            .markets
            .get_mut(market_id)
            .ok_or_else(|| StoreError::MarketNotFound(market_id.to_string()))?;
        if market.status != MarketStatus::Open {
            return Err(StoreError::MarketNotOpen {
                market_id: market_id.to_string(),
                status: market.status,
            });
        }

        let previous = Box::new(market.clone());
        market.status = MarketStatus::Resolved;
        market.winning_option_id = winning_option_id;
        market.winning_value = winning_value;
        market.evidence_ref = evidence_ref;
        market.resolved_at = Some(Utc::now());
        self.undo.push(Undo::Market(previous));
        Ok(())
    }

    fn rollback(&mut self) {
        if !self.undo.is_empty() {
            debug!("↩️ Rolling back {} staged writes", self.undo.len());
        }
        while let Some(op) = self.undo.pop() {
            let state = &mut *self.state;
            match op {
                Undo::ArenaSettings { arena_id, previous } => match previous {
                    Some(settings) => {
                        state.arenas.insert(arena_id, settings);
                    }
                    None => {
                        state.arenas.remove(&arena_id);
                    }
                },
                Undo::Membership { user_id, arena_id } => state.ledger.close_membership(&user_id, &arena_id),
                Undo::Points { user_id, arena_id, previous } => {
                    state.ledger.restore_points(&user_id, &arena_id, previous)
                }
                Undo::Entry => state.ledger.pop_entry(),
                Undo::MarketInserted { market_id } => {
                    state.remove_market_rows(&market_id);
                }
                Undo::Market(previous) => {
                    state.markets.insert(previous.id.clone(), *previous);
                }
                Undo::Liquidity { option_id, previous } => {
                    if let Some(option) = state.options.get_mut(&option_id) {
                        option.liquidity = previous;
                    }
                }
                Undo::BetInserted { bet_id } => {
                    if let Some(bet) = state.bets.remove(&bet_id) {
                        if let Some(key) = &bet.idempotency_key {
                            state.idempotency_keys.remove(key);
                        }
                        if let Some(index) = state.index.get_mut(&bet.market_id) {
                            index.bet_ids.retain(|id| id != &bet_id);
                        }
                    }
                }
                Undo::Snapshots { market_id, previous_len } => {
                    if let Some(series) = state.snapshots.get_mut(&market_id) {
                        series.truncate(previous_len);
                    }
                }
            }
        }
    }
}

/// Rows removed by a cascade delete
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DeletedMarket {
    pub market_id: String,
    pub options: usize,
    pub bets: usize,
    pub snapshots: usize,
}

impl StoreState {
    /// Remove a market and everything it owns. Ledger entries are kept.
    fn remove_market_rows(&mut self, market_id: &str) -> Option<DeletedMarket> {
        let market = self.markets.remove(market_id)?;
        let index = self.index.remove(market_id).unwrap_or_default();

        for option_id in &index.option_ids {
            self.options.remove(option_id);
        }
        for bet_id in &index.bet_ids {
            if let Some(bet) = self.bets.remove(bet_id) {
                if let Some(key) = bet.idempotency_key {
                    self.idempotency_keys.remove(&key);
                }
            }
        }
        let snapshots = self.snapshots.remove(market_id).map(|s| s.len()).unwrap_or(0);
        if let Some(ids) = self.arena_markets.get_mut(&market.arena_id) {
            ids.retain(|id| id != market_id);
            if ids.is_empty() {
                self.arena_markets.remove(&market.arena_id);
            }
        }

        Some(DeletedMarket {
            market_id: market_id.to_string(),
            options: index.option_ids.len(),
            bets: index.bet_ids.len(),
            snapshots,
        })
    }
}

// ============================================================================
// STORE
// ============================================================================

#[derive(Debug, Default)]
pub struct Store {
    state: Mutex<StoreState>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` as one all-or-nothing unit under the store lock.
    pub fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Tx<'_>) -> Result<T, E>,
    {
        let mut guard = self.state.lock();
        let mut tx = Tx {
            state: &mut *guard,
            undo: Vec::new(),
            committed: false,
        };
        let result = f(&mut tx);
        if result.is_ok() {
            tx.committed = true;
        }
        result
    }

    /// Consistent read-only view
    pub fn read<T>(&self, f: impl FnOnce(&StoreState) -> T) -> T {
        let guard = self.state.lock();
        f(&*guard)
    }

    /// Cascade delete of a market, its options, bets, snapshots and keys
    pub fn delete_market(&self, market_id: &str) -> Result<DeletedMarket, StoreError> {
        let mut guard = self.state.lock();
        let deleted = guard
            .remove_market_rows(market_id)
            .ok_or_else(|| StoreError::MarketNotFound(market_id.to_string()))?;
        info!(
            "🗑️ Deleted market {} ({} options, {} bets, {} snapshots)",
            market_id, deleted.options, deleted.bets, deleted.snapshots
        );
        Ok(deleted)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<(), StoreError> {
        let json = {
            let guard = self.state.lock();
            serde_json::to_string_pretty(&*guard)
                .map_err(|e| StoreError::Persistence(format!("Failed to serialize state: {}", e)))?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| StoreError::Persistence(format!("Failed to create {}: {}", parent.display(), e)))?;
        }
        std::fs::write(path, json)
            .map_err(|e| StoreError::Persistence(format!("Failed to write state file: {}", e)))?;

        info!("💾 State saved to {}", path.display());
        Ok(())
    }

    pub fn load_from_path(path: &Path) -> Result<Self, StoreError> {
        let json = std::fs::read_to_string(path)
            .map_err(|e| StoreError::Persistence(format!("Failed to read {}: {}", path.display(), e)))?;
        let state: StoreState = serde_json::from_str(&json)
            .map_err(|e| StoreError::Persistence(format!("Failed to deserialize state: {}", e)))?;

        if let Err(index) = state.ledger.verify() {
            return Err(StoreError::Persistence(format!("ledger hash chain broken at entry {}", index)));
        }
        Ok(Self { state: Mutex::new(state) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MarketType;
    use chrono::Duration;

    fn market() -> Market {
        Market {
            id: "m1".into(),
            arena_id: "arena".into(),
            creator_id: "creator".into(),
            title: "Test".into(),
            market_type: MarketType::Binary,
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

    fn option(id: &str) -> MarketOption {
        MarketOption {
            id: id.into(),
            market_id: "m1".into(),
            label: id.into(),
            liquidity: 100.0,
        }
    }

    fn bet(id: &str, key: Option<&str>) -> Bet {
        Bet {
            id: id.into(),
            user_id: "ALICE".into(),
            market_id: "m1".into(),
            option_id: Some("A".into()),
            numeric_value: None,
            amount: 10,
            shares: 15.0,
            idempotency_key: key.map(Into::into),
            created_at: Utc::now(),
        }
    }

    fn seeded_store() -> Store {
        let store = Store::new();
        store
            .transaction(|tx| -> Result<(), StoreError> {
                tx.open_membership("ALICE", "arena", 1000);
                tx.insert_market(market(), vec![option("A"), option("B")]);
                Ok(())
            })
            .unwrap();
        store
    }

    #[test]
    fn test_commit_applies_all_writes() {
        let store = seeded_store();

        store
            .transaction(|tx| -> Result<(), StoreError> {
                tx.debit("ALICE", "arena", 10, LedgerEntry::bet_placed("ALICE", "m1", "arena", 10))?;
                tx.set_liquidity("A", 50.0)?;
                tx.insert_bet(bet("b1", Some("key-1")))?;
                Ok(())
            })
            .unwrap();

        store.read(|s| {
            assert_eq!(s.balance("ALICE", "arena"), Some(990));
            assert_eq!(s.options_for("m1")[0].liquidity, 50.0);
            assert_eq!(s.bets_for("m1").len(), 1);
            assert_eq!(s.bet_by_idempotency_key("key-1").map(|b| b.id.as_str()), Some("b1"));
            assert_eq!(s.ledger().entries().len(), 1);
        });
    }

    #[test]
    fn test_error_rolls_back_every_write() {
        let store = seeded_store();

        let result = store.transaction(|tx| -> Result<(), StoreError> {
            tx.debit("ALICE", "arena", 10, LedgerEntry::bet_placed("ALICE", "m1", "arena", 10))?;
            tx.set_liquidity("A", 50.0)?;
            tx.set_liquidity("B", 200.0)?;
            tx.insert_bet(bet("b1", Some("key-1")))?;
            tx.record_snapshots("m1", vec![]);
            Err(StoreError::InvariantViolation("late failure".into()))
        });

        assert!(result.is_err());
        store.read(|s| {
            assert_eq!(s.balance("ALICE", "arena"), Some(1000));
            assert!(s.options_for("m1").iter().all(|o| o.liquidity == 100.0));
            assert!(s.bets_for("m1").is_empty());
            assert!(s.bet_by_idempotency_key("key-1").is_none());
            assert!(s.ledger().entries().is_empty());
            assert!(s.ledger().verify().is_ok());
        });
    }

    #[test]
    fn test_duplicate_idempotency_key_rejected_at_write() {
        let store = seeded_store();

        store.transaction(|tx| tx.insert_bet(bet("b1", Some("same")))).unwrap();
        let second = store.transaction(|tx| -> Result<(), StoreError> {
            tx.debit("ALICE", "arena", 10, LedgerEntry::bet_placed("ALICE", "m1", "arena", 10))?;
            tx.insert_bet(bet("b2", Some("same")))
        });

        assert_eq!(second, Err(StoreError::DuplicateIdempotencyKey("same".into())));
        store.read(|s| {
            assert_eq!(s.bets_for("m1").len(), 1);
            assert_eq!(s.balance("ALICE", "arena"), Some(1000));
        });
    }

    #[test]
    fn test_insufficient_funds_leaves_balance() {
        let store = seeded_store();

        let result = store.transaction(|tx| {
            tx.debit("ALICE", "arena", 1001, LedgerEntry::bet_placed("ALICE", "m1", "arena", 1001))
        });

        assert_eq!(result, Err(StoreError::InsufficientFunds { have: 1000, need: 1001 }));
        store.read(|s| assert_eq!(s.balance("ALICE", "arena"), Some(1000)));
    }

    #[test]
    fn test_mark_resolved_only_once() {
        let store = seeded_store();

        store
            .transaction(|tx| tx.mark_resolved("m1", Some("A".into()), None, Some("evidence".into())))
            .unwrap();
        let again = store.transaction(|tx| tx.mark_resolved("m1", Some("B".into()), None, None));

        assert!(matches!(again, Err(StoreError::MarketNotOpen { status: MarketStatus::Resolved, .. })));
        store.read(|s| {
            let m = s.market("m1").unwrap();
            assert_eq!(m.winning_option_id.as_deref(), Some("A"));
            assert_eq!(m.evidence_ref.as_deref(), Some("evidence"));
        });
    }

    #[test]
    fn test_rejects_non_positive_liquidity() {
        let store = seeded_store();
        let result = store.transaction(|tx| tx.set_liquidity("A", 0.0));
        assert!(matches!(result, Err(StoreError::InvariantViolation(_))));
    }

    #[test]
    fn test_cascade_delete() {
        let store = seeded_store();
        store.transaction(|tx| tx.insert_bet(bet("b1", Some("k")))).unwrap();

        let deleted = store.delete_market("m1").unwrap();

        assert_eq!(deleted.options, 2);
        assert_eq!(deleted.bets, 1);
        store.read(|s| {
            assert!(s.market("m1").is_none());
            assert!(s.options_for("m1").is_empty());
            assert!(s.bet("b1").is_none());
            assert!(s.bet_by_idempotency_key("k").is_none());
            assert!(s.markets_in_arena("arena").is_empty());
        });
        assert_eq!(store.delete_market("m1"), Err(StoreError::MarketNotFound("m1".into())));
    }

    #[test]
    fn test_save_and_load() {
        let store = seeded_store();
        store
            .transaction(|tx| tx.debit("ALICE", "arena", 5, LedgerEntry::bet_placed("ALICE", "m1", "arena", 5)))
            .unwrap();

        let path = std::env::temp_dir().join(format!("arena-store-{}.json", uuid::Uuid::new_v4()));
        store.save_to_path(&path).unwrap();
        let loaded = Store::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        loaded.read(|s| {
            assert_eq!(s.balance("ALICE", "arena"), Some(995));
            assert_eq!(s.market("m1").map(|m| m.status), Some(MarketStatus::Open));
            assert!(s.ledger().verify().is_ok());
        });
    }
}
