use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::ledger::repo_types::{HistoryEntry, User};

#[derive(Debug, Deserialize)]
pub struct GiveEhreForm {
    #[serde(rename = "receiver-id")]
    pub receiver_id: Option<String>,
    pub amount: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(rename = "receiver-id")]
    pub receiver_id: Option<String>,
}

/// Data for the `index` and `leaderboard` views.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaderboardModel {
    pub users: Vec<User>,
}

/// Data for the `history` view.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryModel {
    pub receiver: User,
    pub history: Vec<HistoryEntry>,
}

/// Parses a required numeric form or query field.
pub fn parse_required(value: Option<&str>, field: &str) -> Result<i32, (StatusCode, String)> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| (StatusCode::BAD_REQUEST, format!("{field} is required")))?
        .parse::<i32>()
        .map_err(|_| (StatusCode::BAD_REQUEST, format!("{field} must be an integer")))
}
