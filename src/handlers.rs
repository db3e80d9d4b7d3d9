// HTTP request handlers for the market API

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};

use crate::app_state::SharedState;
use crate::error::{BetError, CreateMarketError, ResolveError, StoreError};
use crate::models::*;

// ===== ERROR RESPONSES =====

/// `{success: false, error, code}` with a status matching the failure class
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub(crate) fn unauthenticated() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "UNAUTHENTICATED", "missing x-user-id header")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "success": false,
            "error": self.message,
            "code": self.code,
        }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        let (status, code) = match &e {
            StoreError::DuplicateIdempotencyKey(_) => (StatusCode::CONFLICT, "DUPLICATE_IDEMPOTENCY_KEY"),
            StoreError::InsufficientFunds { .. } => (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_BALANCE"),
            StoreError::MembershipNotFound { .. } => (StatusCode::FORBIDDEN, "NOT_A_MEMBER"),
            StoreError::MarketNotFound(_) => (StatusCode::NOT_FOUND, "MARKET_NOT_FOUND"),
            StoreError::OptionNotFound(_) => (StatusCode::NOT_FOUND, "OPTION_NOT_FOUND"),
            StoreError::MarketNotOpen { .. } => (StatusCode::CONFLICT, "MARKET_NOT_OPEN"),
            StoreError::BalanceOverflow(_) | StoreError::InvariantViolation(_) | StoreError::Persistence(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL")
            }
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<BetError> for ApiError {
    fn from(e: BetError) -> Self {
        let (status, code) = match &e {
            BetError::Store(inner) => return inner.clone().into(),
            BetError::MarketNotFound(_) => (StatusCode::NOT_FOUND, "MARKET_NOT_FOUND"),
            BetError::MarketClosed => (StatusCode::CONFLICT, "MARKET_CLOSED"),
            BetError::MarketCancelled => (StatusCode::CONFLICT, "MARKET_CANCELLED"),
            BetError::MarketExpired => (StatusCode::CONFLICT, "MARKET_EXPIRED"),
            BetError::BelowMinBet { .. } => (StatusCode::BAD_REQUEST, "BELOW_MIN_BET"),
            BetError::AboveMaxBet { .. } => (StatusCode::BAD_REQUEST, "ABOVE_MAX_BET"),
            BetError::InvalidSelection(_) => (StatusCode::BAD_REQUEST, "INVALID_SELECTION"),
            BetError::NotAMember => (StatusCode::FORBIDDEN, "NOT_A_MEMBER"),
            BetError::RestrictedByThreshold { .. } => (StatusCode::FORBIDDEN, "RESTRICTED_BY_THRESHOLD"),
            BetError::InsufficientBalance { .. } => (StatusCode::PAYMENT_REQUIRED, "INSUFFICIENT_BALANCE"),
            BetError::Pricing(_) => (StatusCode::INTERNAL_SERVER_ERROR, "PRICING_FAILED"),
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<ResolveError> for ApiError {
    fn from(e: ResolveError) -> Self {
        let (status, code) = match &e {
            ResolveError::Store(inner) => return inner.clone().into(),
            ResolveError::Unauthorized => (StatusCode::FORBIDDEN, "UNAUTHORIZED"),
            ResolveError::MarketNotFound(_) => (StatusCode::NOT_FOUND, "MARKET_NOT_FOUND"),
            ResolveError::AlreadyResolved => (StatusCode::CONFLICT, "ALREADY_RESOLVED"),
            ResolveError::MarketCancelled => (StatusCode::CONFLICT, "MARKET_CANCELLED"),
            ResolveError::InvalidSelection(_) => (StatusCode::BAD_REQUEST, "INVALID_SELECTION"),
            ResolveError::ValueOutOfRange(_) => (StatusCode::BAD_REQUEST, "VALUE_OUT_OF_RANGE"),
        };
        Self::new(status, code, e.to_string())
    }
}

impl From<CreateMarketError> for ApiError {
    fn from(e: CreateMarketError) -> Self {
        let (status, code) = match &e {
            CreateMarketError::Store(inner) => return inner.clone().into(),
            CreateMarketError::NotAMember(_) => (StatusCode::FORBIDDEN, "NOT_A_MEMBER"),
            _ => (StatusCode::BAD_REQUEST, "INVALID_MARKET"),
        };
        Self::new(status, code, e.to_string())
    }
}

// ===== HEALTH =====

pub async fn health_check() -> &'static str {
    "Arena Prediction Market - Online ✅"
}

// ===== MARKET ENDPOINTS =====

/// POST /markets
/// Creator is the `x-user-id` caller
pub async fn create_market(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(payload): Json<CreateMarketRequest>,
) -> Result<(StatusCode, Json<Market>), ApiError> {
    let creator_id = state.caller(&headers).user_id.ok_or_else(ApiError::unauthenticated)?;

    let market = state.engine.create_market(NewMarket {
        creator_id,
        arena_id: payload.arena_id,
        title: payload.title,
        market_type: payload.market_type,
        options: payload.options,
        resolution_date: payload.resolution_date,
        min_bet: payload.min_bet,
        max_bet: payload.max_bet,
        hidden: payload.hidden,
    })?;

    Ok((StatusCode::CREATED, Json(market)))
}

/// GET /arenas/:arena_id/markets
pub async fn get_arena_markets(State(state): State<SharedState>, Path(arena_id): Path<String>) -> Json<Value> {
    let markets = state.engine.markets_in_arena(&arena_id);
    Json(json!({ "arena_id": arena_id, "markets": markets }))
}

/// GET /markets/:id
/// Caller's own bets are included when `x-user-id` is given
pub async fn get_market(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<MarketView>, ApiError> {
    let caller_id = state.caller(&headers).user_id;

    state
        .engine
        .market_view(&id, caller_id.as_deref())
        .map(Json)
        .ok_or_else(|| StoreError::MarketNotFound(id).into())
}

/// DELETE /markets/:id
/// Admin only; removes the market with its options, bets and snapshots
pub async fn delete_market(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    if !state.caller(&headers).is_admin {
        return Err(ResolveError::Unauthorized.into());
    }
    let deleted = state.engine.delete_market(&id)?;
    Ok(Json(json!({ "success": true, "deleted": deleted })))
}

// ===== BETTING =====

/// POST /markets/:id/bets
/// Bettor is the `x-user-id` caller
pub async fn place_bet(
    State(state): State<SharedState>,
    Path(market_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<PlaceBetRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_id = state.caller(&headers).user_id.ok_or_else(ApiError::unauthenticated)?;
    let selection = request.selection().ok_or_else(|| {
        ApiError::from(BetError::InvalidSelection(
            "exactly one of option_id or numeric_value is required".into(),
        ))
    })?;

    let receipt = state.engine.place_bet(PlaceBet {
        user_id,
        market_id,
        amount: request.amount,
        selection,
        idempotency_key: request.idempotency_key,
    })?;

    Ok(Json(json!({
        "success": true,
        "bet_id": receipt.bet_id,
        "shares": receipt.shares,
    })))
}

// ===== RESOLUTION =====

/// POST /markets/:id/resolve
/// Market creator or admin
pub async fn resolve_market(
    State(state): State<SharedState>,
    Path(market_id): Path<String>,
    headers: HeaderMap,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<Value>, ApiError> {
    let caller = state.caller(&headers);
    let market = state
        .engine
        .market(&market_id)
        .ok_or_else(|| ResolveError::MarketNotFound(market_id.clone()))?;

    let outcome = state.engine.resolve_market(ResolveMarket {
        caller_is_creator_or_admin: caller.can_resolve(&market),
        market_id,
        winning_option_id: request.winning_option_id,
        winning_value: request.winning_value,
        evidence_ref: request.evidence_ref,
    })?;

    Ok(Json(json!({
        "success": true,
        "market_id": outcome.market_id,
        "winning_option_id": outcome.winning_option_id,
        "winning_label": outcome.winning_label,
        "payouts": outcome.payouts,
        "pool": outcome.pool,
        "total_paid": outcome.total_paid,
    })))
}

// ===== LEDGER ENDPOINTS =====

/// GET /ledger?market_id=&user_id=&limit=
pub async fn get_ledger_activity(
    State(state): State<SharedState>,
    Query(query): Query<LedgerQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(100).min(1000);
    let entries = state
        .engine
        .ledger_entries(query.market_id.as_deref(), query.user_id.as_deref(), limit);

    Json(json!({
        "count": entries.len(),
        "entries": entries,
    }))
}

/// GET /ledger/verify
pub async fn verify_ledger(State(state): State<SharedState>) -> Json<Value> {
    match state.engine.verify_ledger() {
        Ok(()) => Json(json!({ "valid": true })),
        Err(index) => Json(json!({ "valid": false, "broken_at": index })),
    }
}

/// GET /ledger/stats
pub async fn get_ledger_stats(State(state): State<SharedState>) -> Json<Value> {
    Json(json!(state.engine.ledger_stats()))
}
