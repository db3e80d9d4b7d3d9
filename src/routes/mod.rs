// Routes module - organizes all HTTP endpoints

pub mod members;

pub use members::*;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::app_state::SharedState;
use crate::handlers::*;

/// Build the router with all endpoints
pub fn router(state: SharedState) -> Router {
    Router::new()
        // ===== MEMBERSHIP =====
        .route("/arenas/:arena_id/members", post(join_arena))
        .route("/arenas/:arena_id/members/:user_id/balance", get(get_balance))
        .route("/arenas/:arena_id/markets", get(get_arena_markets))
        // ===== MARKETS =====
        .route("/markets", post(create_market))
        .route("/markets/:id", get(get_market).delete(delete_market))
        // ===== BETTING & RESOLUTION =====
        .route("/markets/:id/bets", post(place_bet))
        .route("/markets/:id/resolve", post(resolve_market))
        // ===== LEDGER =====
        .route("/ledger", get(get_ledger_activity))
        .route("/ledger/verify", get(verify_ledger))
        .route("/ledger/stats", get(get_ledger_stats))
        // ===== HEALTH CHECK =====
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
