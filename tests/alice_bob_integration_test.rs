/// Engine scenarios with Alice, Bob and Carol betting in one arena
///
/// Everything runs in-process against a fresh store per test.

use std::sync::Arc;

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use tokio::sync::mpsc::Receiver;
use tokio_test::{assert_err, assert_ok};

use arena_prediction_market::{
    ArenaSettings, BetError, EventKind, MarketEngine, MarketType, NewMarket, NewOption, PlaceBet, ResolveError,
    ResolveMarket, Selection, SideEffect, SideEffects, Store, Topology, TxType,
};

// ============================================================================
// TEST ACCOUNTS
// ============================================================================

const ARENA: &str = "arena-1";
const CREATOR: &str = "CREATOR";
const ALICE: &str = "ALICE";
const BOB: &str = "BOB";
const CAROL: &str = "CAROL";
const WATCHER: &str = "MODERATOR";
const STARTING_POINTS: u64 = 1000;

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn setup() -> (MarketEngine, Receiver<SideEffect>) {
    let (effects, rx) = SideEffects::channel();
    let engine = MarketEngine::new(Arc::new(Store::new()), effects).with_hidden_watchers(vec![WATCHER.to_string()]);
    engine.join_arena(CREATOR, ARENA, 0).unwrap();
    for user in [ALICE, BOB, CAROL] {
        engine.join_arena(user, ARENA, STARTING_POINTS).unwrap();
    }
    (engine, rx)
}

fn create(engine: &MarketEngine, market_type: MarketType, labels: &[&str]) -> (String, Vec<String>) {
    let market = engine
        .create_market(NewMarket {
            creator_id: CREATOR.into(),
            arena_id: ARENA.into(),
            title: "Test market".into(),
            market_type,
            options: labels
                .iter()
                .map(|label| NewOption {
                    label: label.to_string(),
                    liquidity: 100.0,
                })
                .collect(),
            resolution_date: Utc::now() + Duration::days(1),
            min_bet: None,
            max_bet: None,
            hidden: false,
        })
        .unwrap();

    let option_ids = engine
        .market_view(&market.id, None)
        .unwrap()
        .options
        .into_iter()
        .map(|o| o.id)
        .collect();
    (market.id, option_ids)
}

fn bet_on(market_id: &str, user: &str, amount: u64, option_id: &str) -> PlaceBet {
    PlaceBet {
        user_id: user.into(),
        market_id: market_id.into(),
        amount,
        selection: Selection::Option(option_id.into()),
        idempotency_key: None,
    }
}

fn predict(market_id: &str, user: &str, amount: u64, value: f64) -> PlaceBet {
    PlaceBet {
        user_id: user.into(),
        market_id: market_id.into(),
        amount,
        selection: Selection::Value(value),
        idempotency_key: None,
    }
}

fn resolve(market_id: &str, option_id: Option<&str>, value: Option<f64>) -> ResolveMarket {
    ResolveMarket {
        caller_is_creator_or_admin: true,
        market_id: market_id.into(),
        winning_option_id: option_id.map(Into::into),
        winning_value: value,
        evidence_ref: Some("https://example.com/result".into()),
    }
}

fn liquidities(engine: &MarketEngine, market_id: &str) -> Vec<f64> {
    engine
        .market_view(market_id, None)
        .unwrap()
        .options
        .iter()
        .map(|o| o.liquidity)
        .collect()
}

fn drain(rx: &mut Receiver<SideEffect>) -> Vec<SideEffect> {
    let mut effects = Vec::new();
    while let Ok(effect) = rx.try_recv() {
        effects.push(effect);
    }
    effects
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
}

// ============================================================================
// PLACEMENT
// ============================================================================

#[test]
fn test_alice_buys_yes_and_reprices_pool() {
    let (engine, mut rx) = setup();
    let (market_id, options) = create(&engine, MarketType::Binary, &["Yes", "No"]);

    let receipt = assert_ok!(engine.place_bet(bet_on(&market_id, ALICE, 100, &options[0])));

    assert_close(receipt.shares, 150.0);
    let pools = liquidities(&engine, &market_id);
    assert_close(pools[0], 50.0);
    assert_close(pools[1], 200.0);
    assert_close(pools[0] * pools[1], 10_000.0);
    assert_eq!(engine.balance(ALICE, ARENA), Some(900));

    let view = engine.market_view(&market_id, Some(ALICE)).unwrap();
    assert_eq!(view.topology, Topology::Discrete);
    assert_eq!(view.price_history.len(), 2);
    assert_close(view.options[0].price, 0.8);
    assert_eq!(view.my_bets.len(), 1);
    assert_eq!(view.my_bets[0].amount, 100);

    let effects = drain(&mut rx);
    assert!(matches!(&effects[..], [SideEffect::Sentiment { market_id: m, .. }] if m == &market_id));
}

#[test]
fn test_product_invariant_across_many_bets() {
    let (engine, _rx) = setup();
    let (market_id, options) = create(&engine, MarketType::MultipleChoice, &["Red", "Green", "Blue", "Gold"]);
    let k_before: f64 = liquidities(&engine, &market_id).iter().product();

    for (i, (user, amount)) in [(ALICE, 40), (BOB, 75), (CAROL, 5), (ALICE, 300), (BOB, 1)].into_iter().enumerate() {
        assert_ok!(engine.place_bet(bet_on(&market_id, user, amount, &options[i % options.len()])));
        let k_after: f64 = liquidities(&engine, &market_id).iter().product();
        assert!(((k_after - k_before) / k_before).abs() < 1e-9);
    }
}

#[test]
fn test_creator_fee_goes_to_creator() {
    let (engine, _rx) = setup();
    engine
        .configure_arena(
            ARENA,
            ArenaSettings {
                fee_percent: dec!(0.1),
                ..ArenaSettings::default()
            },
        )
        .unwrap();
    let (market_id, options) = create(&engine, MarketType::Binary, &["Yes", "No"]);

    let receipt = assert_ok!(engine.place_bet(bet_on(&market_id, ALICE, 100, &options[0])));

    assert_eq!(engine.balance(ALICE, ARENA), Some(900));
    assert_eq!(engine.balance(CREATOR, ARENA), Some(10));
    // net 90: No grows to 190, Yes shrinks to 10000 / 190
    assert_close(receipt.shares, 90.0 + (100.0 - 10_000.0 / 190.0));
    let view = engine.market_view(&market_id, Some(ALICE)).unwrap();
    assert_eq!(view.my_bets[0].amount, 90);

    let kinds: Vec<TxType> = engine
        .ledger_entries(Some(&market_id), None, 10)
        .iter()
        .map(|e| e.kind)
        .collect();
    assert_eq!(kinds, vec![TxType::FeeCollected, TxType::BetPlaced]);
}

#[test]
fn test_betting_whole_balance() {
    let (engine, _rx) = setup();
    let (market_id, options) = create(&engine, MarketType::Binary, &["Yes", "No"]);
    let entries_before = engine.ledger_entries(None, None, usize::MAX).len();

    let err = assert_err!(engine.place_bet(bet_on(&market_id, ALICE, STARTING_POINTS + 1, &options[0])));
    assert_eq!(
        err,
        BetError::InsufficientBalance {
            have: STARTING_POINTS,
            need: STARTING_POINTS + 1
        }
    );
    assert_eq!(engine.balance(ALICE, ARENA), Some(STARTING_POINTS));
    assert_eq!(liquidities(&engine, &market_id), vec![100.0, 100.0]);
    assert_eq!(engine.ledger_entries(None, None, usize::MAX).len(), entries_before);
    assert!(engine.market_view(&market_id, Some(ALICE)).unwrap().my_bets.is_empty());

    assert_ok!(engine.place_bet(bet_on(&market_id, ALICE, STARTING_POINTS, &options[0])));
    assert_eq!(engine.balance(ALICE, ARENA), Some(0));
}

#[test]
fn test_idempotent_retry_returns_original_receipt() {
    let (engine, mut rx) = setup();
    let (market_id, options) = create(&engine, MarketType::Binary, &["Yes", "No"]);
    let mut req = bet_on(&market_id, ALICE, 100, &options[0]);
    req.idempotency_key = Some("alice-retry-1".into());

    let first = assert_ok!(engine.place_bet(req.clone()));
    let second = assert_ok!(engine.place_bet(req));

    assert_eq!(first, second);
    assert_eq!(engine.balance(ALICE, ARENA), Some(900));
    assert_eq!(engine.market_view(&market_id, Some(ALICE)).unwrap().my_bets.len(), 1);
    assert_eq!(drain(&mut rx).len(), 1);
}

#[test]
fn test_idempotent_retry_survives_spent_balance() {
    let (engine, _rx) = setup();
    let (market_id, options) = create(&engine, MarketType::Binary, &["Yes", "No"]);
    let mut req = bet_on(&market_id, ALICE, STARTING_POINTS, &options[1]);
    req.idempotency_key = Some("all-in".into());

    let first = assert_ok!(engine.place_bet(req.clone()));
    assert_eq!(assert_ok!(engine.place_bet(req)), first);
    assert_eq!(engine.balance(ALICE, ARENA), Some(0));
}

#[test]
fn test_precondition_failures() {
    let (engine, _rx) = setup();
    let (market_id, options) = create(&engine, MarketType::Binary, &["Yes", "No"]);

    assert!(matches!(
        engine.place_bet(bet_on("missing", ALICE, 10, &options[0])),
        Err(BetError::MarketNotFound(_))
    ));
    assert_eq!(
        engine.place_bet(bet_on(&market_id, ALICE, 0, &options[0])),
        Err(BetError::BelowMinBet { amount: 0, min: 1 })
    );
    assert!(matches!(
        engine.place_bet(bet_on(&market_id, ALICE, 10, "not-an-option")),
        Err(BetError::InvalidSelection(_))
    ));
    assert!(matches!(
        engine.place_bet(predict(&market_id, ALICE, 10, 3.0)),
        Err(BetError::InvalidSelection(_))
    ));
    assert_eq!(
        engine.place_bet(bet_on(&market_id, "STRANGER", 10, &options[0])),
        Err(BetError::NotAMember)
    );
}

#[test]
fn test_bet_bounds() {
    let (engine, _rx) = setup();
    let market = engine
        .create_market(NewMarket {
            creator_id: CREATOR.into(),
            arena_id: ARENA.into(),
            title: "Bounded".into(),
            market_type: MarketType::Binary,
            options: vec![
                NewOption { label: "Yes".into(), liquidity: 100.0 },
                NewOption { label: "No".into(), liquidity: 100.0 },
            ],
            resolution_date: Utc::now() + Duration::days(1),
            min_bet: Some(10),
            max_bet: Some(50),
            hidden: false,
        })
        .unwrap();
    let yes = engine.market_view(&market.id, None).unwrap().options[0].id.clone();

    assert_eq!(
        engine.place_bet(bet_on(&market.id, ALICE, 9, &yes)),
        Err(BetError::BelowMinBet { amount: 9, min: 10 })
    );
    assert_eq!(
        engine.place_bet(bet_on(&market.id, ALICE, 51, &yes)),
        Err(BetError::AboveMaxBet { amount: 51, max: 50 })
    );
    assert_ok!(engine.place_bet(bet_on(&market.id, ALICE, 10, &yes)));
    assert_ok!(engine.place_bet(bet_on(&market.id, ALICE, 50, &yes)));
}

#[test]
fn test_expired_market_rejects_bets() {
    let (engine, _rx) = setup();
    let market = engine
        .create_market(NewMarket {
            creator_id: CREATOR.into(),
            arena_id: ARENA.into(),
            title: "Closing soon".into(),
            market_type: MarketType::Binary,
            options: vec![
                NewOption { label: "Yes".into(), liquidity: 100.0 },
                NewOption { label: "No".into(), liquidity: 100.0 },
            ],
            resolution_date: Utc::now() + Duration::milliseconds(50),
            min_bet: None,
            max_bet: None,
            hidden: false,
        })
        .unwrap();
    let yes = engine.market_view(&market.id, None).unwrap().options[0].id.clone();

    std::thread::sleep(std::time::Duration::from_millis(100));

    assert_eq!(engine.place_bet(bet_on(&market.id, ALICE, 10, &yes)), Err(BetError::MarketExpired));
}

#[test]
fn test_repeat_bets_need_other_bettors() {
    let (engine, _rx) = setup();
    engine
        .configure_arena(
            ARENA,
            ArenaSettings {
                limit_multiple_bets: true,
                multiple_bet_threshold: 1,
                ..ArenaSettings::default()
            },
        )
        .unwrap();
    let (market_id, options) = create(&engine, MarketType::Binary, &["Yes", "No"]);

    assert_ok!(engine.place_bet(bet_on(&market_id, ALICE, 10, &options[0])));
    assert_eq!(
        engine.place_bet(bet_on(&market_id, ALICE, 10, &options[0])),
        Err(BetError::RestrictedByThreshold { current: 0, threshold: 1 })
    );

    assert_ok!(engine.place_bet(bet_on(&market_id, BOB, 10, &options[1])));
    assert_ok!(engine.place_bet(bet_on(&market_id, ALICE, 10, &options[0])));
}

// ============================================================================
// RESOLUTION
// ============================================================================

#[test]
fn test_binary_resolution_pays_pool_to_winner() {
    let (engine, mut rx) = setup();
    let (market_id, options) = create(&engine, MarketType::Binary, &["Yes", "No"]);
    assert_ok!(engine.place_bet(bet_on(&market_id, ALICE, 100, &options[0])));
    assert_ok!(engine.place_bet(bet_on(&market_id, BOB, 50, &options[1])));
    let pool: f64 = liquidities(&engine, &market_id).iter().sum();
    drain(&mut rx);

    let outcome = assert_ok!(engine.resolve_market(resolve(&market_id, Some(&options[0]), None)));

    // Alice holds every Yes share
    assert_eq!(outcome.payouts.get(ALICE).copied(), Some(pool.floor() as u64));
    assert!(!outcome.payouts.contains_key(BOB));
    assert_eq!(outcome.winning_label, "Yes");
    assert_eq!(engine.balance(ALICE, ARENA), Some(900 + pool.floor() as u64));
    assert_eq!(engine.balance(BOB, ARENA), Some(950));

    let market = engine.market(&market_id).unwrap();
    assert_eq!(market.winning_option_id.as_deref(), Some(options[0].as_str()));
    assert_eq!(market.evidence_ref.as_deref(), Some("https://example.com/result"));
    assert!(engine.verify_ledger().is_ok());

    let notes: Vec<(String, EventKind)> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            SideEffect::Notify { user_id, kind, .. } => Some((user_id, kind)),
            SideEffect::Sentiment { .. } => None,
        })
        .collect();
    assert!(notes.contains(&(ALICE.to_string(), EventKind::BetWon)));
    assert!(notes.contains(&(BOB.to_string(), EventKind::BetLost)));
    assert!(notes.contains(&(CREATOR.to_string(), EventKind::MarketResolved)));
    assert!(!notes.iter().any(|(user, _)| user == WATCHER));
}

#[test]
fn test_split_pool_leaves_bounded_dust() {
    let (engine, _rx) = setup();
    let (market_id, options) = create(&engine, MarketType::MultipleChoice, &["A", "B", "C"]);
    for (user, amount, option) in [(ALICE, 37, 0), (BOB, 13, 0), (CAROL, 29, 0), (BOB, 41, 2)] {
        assert_ok!(engine.place_bet(bet_on(&market_id, user, amount, &options[option])));
    }
    let pool: f64 = liquidities(&engine, &market_id).iter().sum();

    let outcome = assert_ok!(engine.resolve_market(resolve(&market_id, Some(&options[0]), None)));

    let paid: u64 = outcome.payouts.values().sum();
    assert_eq!(paid, outcome.total_paid);
    assert!(paid as f64 <= pool);
    assert!(pool - (paid as f64) < 3.0);
}

#[test]
fn test_bucket_boundary_goes_to_upper_bucket() {
    let (engine, _rx) = setup();
    let (market_id, options) = create(&engine, MarketType::NumericRange, &["0 - 10", "10 - 20", "20 - 30"]);
    assert_ok!(engine.place_bet(bet_on(&market_id, ALICE, 100, &options[1])));
    assert_ok!(engine.place_bet(bet_on(&market_id, BOB, 100, &options[0])));

    assert_eq!(
        engine.resolve_market(resolve(&market_id, None, Some(30.5))),
        Err(ResolveError::ValueOutOfRange(30.5))
    );
    assert!(engine.market(&market_id).unwrap().is_open());

    let outcome = assert_ok!(engine.resolve_market(resolve(&market_id, None, Some(10.0))));

    assert_eq!(outcome.winning_label, "10 - 20");
    assert_eq!(outcome.winning_option_id.as_deref(), Some(options[1].as_str()));
    assert!(outcome.payouts.contains_key(ALICE));
    assert!(!outcome.payouts.contains_key(BOB));
    assert_eq!(engine.market(&market_id).unwrap().winning_value, Some(10.0));
}

#[test]
fn test_parimutuel_nearest_predictions_split_pool() {
    let (engine, _rx) = setup();
    let (market_id, _) = create(&engine, MarketType::NumericRange, &[]);

    let receipt = assert_ok!(engine.place_bet(predict(&market_id, ALICE, 100, 5.0)));
    assert_close(receipt.shares, 100.0);
    assert_ok!(engine.place_bet(predict(&market_id, BOB, 100, 7.0)));
    assert_ok!(engine.place_bet(predict(&market_id, CAROL, 100, 12.0)));
    assert_eq!(engine.market_view(&market_id, None).unwrap().pool, 300.0);

    let outcome = assert_ok!(engine.resolve_market(resolve(&market_id, None, Some(6.0))));

    assert_eq!(outcome.payouts.get(ALICE).copied(), Some(150));
    assert_eq!(outcome.payouts.get(BOB).copied(), Some(150));
    assert!(!outcome.payouts.contains_key(CAROL));
    assert_eq!(outcome.winning_option_id, None);
    assert_eq!(engine.balance(ALICE, ARENA), Some(1050));
    assert_eq!(engine.balance(CAROL, ARENA), Some(900));
}

#[test]
fn test_resolution_guards() {
    let (engine, _rx) = setup();
    let (market_id, options) = create(&engine, MarketType::Binary, &["Yes", "No"]);

    let mut unauthorized = resolve(&market_id, Some(&options[0]), None);
    unauthorized.caller_is_creator_or_admin = false;
    assert_eq!(engine.resolve_market(unauthorized), Err(ResolveError::Unauthorized));

    assert!(matches!(
        engine.resolve_market(resolve("missing", Some(&options[0]), None)),
        Err(ResolveError::MarketNotFound(_))
    ));
    assert!(matches!(
        engine.resolve_market(resolve(&market_id, None, None)),
        Err(ResolveError::InvalidSelection(_))
    ));

    assert_ok!(engine.resolve_market(resolve(&market_id, Some(&options[0]), None)));
    assert_eq!(
        engine.resolve_market(resolve(&market_id, Some(&options[1]), None)),
        Err(ResolveError::AlreadyResolved)
    );
    assert_eq!(
        engine.place_bet(bet_on(&market_id, ALICE, 10, &options[0])),
        Err(BetError::MarketClosed)
    );
}

#[test]
fn test_hidden_market_notifies_watchers() {
    let (engine, mut rx) = setup();
    let market = engine
        .create_market(NewMarket {
            creator_id: CREATOR.into(),
            arena_id: ARENA.into(),
            title: "Secret".into(),
            market_type: MarketType::Binary,
            options: vec![
                NewOption { label: "Yes".into(), liquidity: 100.0 },
                NewOption { label: "No".into(), liquidity: 100.0 },
            ],
            resolution_date: Utc::now() + Duration::days(1),
            min_bet: None,
            max_bet: None,
            hidden: true,
        })
        .unwrap();
    let yes = engine.market_view(&market.id, None).unwrap().options[0].id.clone();

    assert_ok!(engine.resolve_market(resolve(&market.id, Some(&yes), None)));

    let resolved_to: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            SideEffect::Notify { user_id, kind: EventKind::MarketResolved, .. } => Some(user_id),
            _ => None,
        })
        .collect();
    assert_eq!(resolved_to, vec![CREATOR.to_string(), WATCHER.to_string()]);
}

#[test]
fn test_delete_market_cascades() {
    let (engine, _rx) = setup();
    let (market_id, options) = create(&engine, MarketType::Binary, &["Yes", "No"]);
    assert_ok!(engine.place_bet(bet_on(&market_id, ALICE, 100, &options[0])));

    let deleted = assert_ok!(engine.delete_market(&market_id));

    assert_eq!(deleted.bets, 1);
    assert_eq!(deleted.options, 2);
    assert!(engine.market_view(&market_id, None).is_none());
    assert!(engine.markets_in_arena(ARENA).is_empty());
    // audit trail survives
    assert_eq!(engine.ledger_entries(Some(&market_id), None, 10).len(), 1);
}
