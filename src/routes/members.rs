// Arena membership routes
// Identity comes from upstream; joining just opens a points balance

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::Json,
};
use serde_json::{json, Value};

use crate::app_state::SharedState;
use crate::handlers::ApiError;
use crate::models::JoinArenaRequest;

/// POST /arenas/:arena_id/members
/// Opens a membership for the `x-user-id` caller; re-joining keeps the balance
pub async fn join_arena(
    State(state): State<SharedState>,
    Path(arena_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<JoinArenaRequest>,
) -> Result<Json<Value>, ApiError> {
    let user_id = state.caller(&headers).user_id.ok_or_else(ApiError::unauthenticated)?;
    let existed = state.engine.balance(&user_id, &arena_id).is_some();
    let balance = state.engine.join_arena(&user_id, &arena_id, payload.starting_points)?;

    Ok(Json(json!({
        "success": true,
        "user_id": user_id,
        "arena_id": arena_id,
        "balance": balance,
        "is_new_member": !existed,
    })))
}

/// GET /arenas/:arena_id/members/:user_id/balance
pub async fn get_balance(
    State(state): State<SharedState>,
    Path((arena_id, user_id)): Path<(String, String)>,
) -> Result<Json<Value>, ApiError> {
    let balance = state.engine.balance(&user_id, &arena_id).ok_or_else(|| {
        ApiError::new(
            StatusCode::NOT_FOUND,
            "NOT_A_MEMBER",
            format!("{} is not a member of arena {}", user_id, arena_id),
        )
    })?;

    Ok(Json(json!({
        "user_id": user_id,
        "arena_id": arena_id,
        "balance": balance,
    })))
}
