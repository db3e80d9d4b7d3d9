//! Balance Ledger for arena memberships
//!
//! Single source of truth for points per (user, arena), plus the append-only
//! audit trail of every credit and debit:
//! - balances are `u64`, a debit larger than the balance is rejected
//! - entries are hash-chained, so any rewrite of history breaks `verify`
//! - mutators are crate-private; the store calls them from inside a transaction

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StoreError;

/// Hash that precedes the first entry
pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

// ============================================================================
// CORE TYPES
// ============================================================================

/// Points held by one user inside one arena
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipBalance {
    pub user_id: String,
    pub arena_id: String,
    pub points: u64,
    pub joined_at: DateTime<Utc>,
}

/// Ledger entry kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    BetPlaced,
    WinPayout,
    FeeCollected,
    Grant,
}

/// A single append-only ledger record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: String,
    pub kind: TxType,
    pub amount: u64,
    pub from_user_id: Option<String>,
    pub to_user_id: Option<String>,
    pub market_id: Option<String>,
    pub arena_id: String,
    pub created_at: DateTime<Utc>,
    pub prev_hash: String,
    pub hash: String,
}

impl LedgerEntry {
    fn new(kind: TxType, arena_id: &str, amount: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            amount,
            from_user_id: None,
            to_user_id: None,
            market_id: None,
            arena_id: arena_id.to_string(),
            created_at: Utc::now(),
            prev_hash: String::new(),
            hash: String::new(),
        }
    }

    pub fn bet_placed(user_id: &str, market_id: &str, arena_id: &str, amount: u64) -> Self {
        let mut tx = Self::new(TxType::BetPlaced, arena_id, amount);
        tx.from_user_id = Some(user_id.to_string());
        tx.market_id = Some(market_id.to_string());
        tx
    }

    pub fn win_payout(user_id: &str, market_id: &str, arena_id: &str, amount: u64) -> Self {
        let mut tx = Self::new(TxType::WinPayout, arena_id, amount);
        tx.to_user_id = Some(user_id.to_string());
        tx.market_id = Some(market_id.to_string());
        tx
    }

    pub fn fee_collected(from: &str, creator_id: &str, market_id: &str, arena_id: &str, amount: u64) -> Self {
        let mut tx = Self::new(TxType::FeeCollected, arena_id, amount);
        tx.from_user_id = Some(from.to_string());
        tx.to_user_id = Some(creator_id.to_string());
        tx.market_id = Some(market_id.to_string());
        tx
    }

    pub fn grant(user_id: &str, arena_id: &str, amount: u64) -> Self {
        let mut tx = Self::new(TxType::Grant, arena_id, amount);
        tx.to_user_id = Some(user_id.to_string());
        tx
    }

    fn compute_hash(&self, prev_hash: &str) -> String {
        let data = format!(
            "{}|{}|{:?}|{}|{}|{}|{}|{}|{}",
            prev_hash,
            self.id,
            self.kind,
            self.amount,
            self.from_user_id.as_deref().unwrap_or(""),
            self.to_user_id.as_deref().unwrap_or(""),
            self.market_id.as_deref().unwrap_or(""),
            self.arena_id,
            self.created_at.to_rfc3339(),
        );
        hash(&data)
    }

    pub fn touches_user(&self, user_id: &str) -> bool {
        self.from_user_id.as_deref() == Some(user_id) || self.to_user_id.as_deref() == Some(user_id)
    }
}

// ============================================================================
// LEDGER
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    /// arena id -> user id -> balance
    balances: HashMap<String, HashMap<String, MembershipBalance>>,
    entries: Vec<LedgerEntry>,
    head: String,
}

impl Default for Ledger {
    fn default() -> Self {
        Self {
            balances: HashMap::new(),
            entries: Vec::new(),
            head: GENESIS_HASH.to_string(),
        }
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn membership(&self, user_id: &str, arena_id: &str) -> Option<&MembershipBalance> {
        self.balances.get(arena_id).and_then(|members| members.get(user_id))
    }

    /// Points for a member, `None` if the user never joined the arena
    pub fn balance(&self, user_id: &str, arena_id: &str) -> Option<u64> {
        self.membership(user_id, arena_id).map(|m| m.points)
    }

    /// Returns false when the membership already existed.
    pub(crate) fn open_membership(&mut self, user_id: &str, arena_id: &str, points: u64) -> bool {
        let members = self.balances.entry(arena_id.to_string()).or_default();
        if members.contains_key(user_id) {
            return false;
        }
        members.insert(
            user_id.to_string(),
            MembershipBalance {
                user_id: user_id.to_string(),
                arena_id: arena_id.to_string(),
                points,
                joined_at: Utc::now(),
            },
        );
        true
    }

    pub(crate) fn close_membership(&mut self, user_id: &str, arena_id: &str) {
        if let Some(members) = self.balances.get_mut(arena_id) {
            members.remove(user_id);
            if members.is_empty() {
                self.balances.remove(arena_id);
            }
        }
    }

    fn membership_mut(&mut self, user_id: &str, arena_id: &str) -> Result<&mut MembershipBalance, StoreError> {
        self.balances
            .get_mut(arena_id)
            .and_then(|members| members.get_mut(user_id))
            .ok_or_else(|| StoreError::MembershipNotFound {
                user_id: user_id.to_string(),
                arena_id: arena_id.to_string(),
            })
    }

    /// Subtract points, returning the previous balance.
    pub(crate) fn debit(&mut self, user_id: &str, arena_id: &str, amount: u64) -> Result<u64, StoreError> {
        let membership = self.membership_mut(user_id, arena_id)?;
        let previous = membership.points;
        membership.points = previous
            .checked_sub(amount)
            .ok_or(StoreError::InsufficientFunds { have: previous, need: amount })?;
        Ok(previous)
    }

    /// Add points, returning the previous balance.
    pub(crate) fn credit(&mut self, user_id: &str, arena_id: &str, amount: u64) -> Result<u64, StoreError> {
        let membership = self.membership_mut(user_id, arena_id)?;
        let previous = membership.points;
        membership.points = previous
            .checked_add(amount)
            .ok_or_else(|| StoreError::BalanceOverflow(user_id.to_string()))?;
        Ok(previous)
    }

    pub(crate) fn restore_points(&mut self, user_id: &str, arena_id: &str, points: u64) {
        if let Ok(membership) = self.membership_mut(user_id, arena_id) {
            membership.points = points;
        }
    }

    /// Chain and append an entry
    pub(crate) fn append(&mut self, mut entry: LedgerEntry) -> &LedgerEntry {
        entry.prev_hash = self.head.clone();
        entry.hash = entry.compute_hash(&self.head);
        self.head = entry.hash.clone();
        self.entries.push(entry);
        &self.entries[self.entries.len() - 1]
    }

    /// Drop the newest entry. Only used to roll back an aborted transaction.
    pub(crate) fn pop_entry(&mut self) {
        if let Some(entry) = self.entries.pop() {
            self.head = entry.prev_hash;
        }
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn entries_for_market(&self, market_id: &str) -> Vec<&LedgerEntry> {
        self.entries
            .iter()
            .filter(|tx| tx.market_id.as_deref() == Some(market_id))
            .collect()
    }

    pub fn entries_for_user(&self, user_id: &str) -> Vec<&LedgerEntry> {
        self.entries.iter().filter(|tx| tx.touches_user(user_id)).collect()
    }

    pub fn head(&self) -> &str {
        &self.head
    }

    /// Walk the chain; on failure returns the index of the first bad entry.
    pub fn verify(&self) -> Result<(), usize> {
        let mut prev: &str = GENESIS_HASH;
        for (i, entry) in self.entries.iter().enumerate() {
            if entry.prev_hash != prev || entry.hash != entry.compute_hash(prev) {
                return Err(i);
            }
            prev = entry.hash.as_str();
        }
        if prev != self.head {
            return Err(self.entries.len());
        }
        Ok(())
    }

    pub fn stats(&self) -> LedgerStats {
        let sum_of = |kind: TxType| -> u64 {
            self.entries.iter().filter(|tx| tx.kind == kind).map(|tx| tx.amount).sum()
        };

        LedgerStats {
            members: self.balances.values().map(|m| m.len()).sum(),
            entries: self.entries.len(),
            total_bets: self.entries.iter().filter(|tx| tx.kind == TxType::BetPlaced).count(),
            bet_volume: sum_of(TxType::BetPlaced),
            fees_collected: sum_of(TxType::FeeCollected),
            payouts: sum_of(TxType::WinPayout),
            granted: sum_of(TxType::Grant),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerStats {
    pub members: usize,
    pub entries: usize,
    pub total_bets: usize,
    pub bet_volume: u64,
    pub fees_collected: u64,
    pub payouts: u64,
    pub granted: u64,
}

// ============================================================================
// HELPERS
// ============================================================================

/// Compute SHA256 hash
pub fn hash(data: &str) -> String {
    hex::encode(Sha256::digest(data.as_bytes()))
}
