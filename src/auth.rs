// Caller identity
//
// Authentication happens upstream. Requests arrive with the caller's user id
// in `x-user-id` and, for operators, the shared admin token in
// `x-admin-token`. This module only turns those headers into the booleans the
// engine consumes.

use axum::http::HeaderMap;
use sha2::{Digest, Sha256};

use crate::models::Market;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<String>,
    pub is_admin: bool,
}

impl Caller {
    /// Read the caller from request headers. Without a configured admin token
    /// nobody is admin.
    pub fn from_headers(headers: &HeaderMap, admin_token: Option<&str>) -> Self {
        let user_id = header_value(headers, USER_ID_HEADER);
        let is_admin = match (admin_token, header_value(headers, ADMIN_TOKEN_HEADER)) {
            (Some(expected), Some(presented)) => tokens_match(expected, &presented),
            _ => false,
        };
        Self { user_id, is_admin }
    }

    pub fn is_creator_of(&self, market: &Market) -> bool {
        self.user_id.as_deref() == Some(market.creator_id.as_str())
    }

    /// Creators resolve their own markets; admins resolve any
    pub fn can_resolve(&self, market: &Market) -> bool {
        self.is_admin || self.is_creator_of(market)
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Compare digests so the comparison does not short-circuit on the token itself
fn tokens_match(expected: &str, presented: &str) -> bool {
    Sha256::digest(expected.as_bytes()) == Sha256::digest(presented.as_bytes())
}
