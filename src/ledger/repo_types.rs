use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;

/// User record in the database.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "PascalCase")]
pub struct User {
    pub user_id: i32,
    pub username: String,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string
    #[serde(skip_serializing)]
    pub salt: Vec<u8>,
    #[serde(rename = "Ehre")]
    pub ehre_balance: i32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Append-only transfer record.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "PascalCase")]
pub struct EhreTransaction {
    pub transaction_id: i32,
    pub giver_id: i32,
    pub receiver_id: i32,
    pub amount: i32,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub transaction_date: OffsetDateTime,
}

/// One row of a receiver's history, with the giver's name resolved.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
#[serde(rename_all = "PascalCase")]
pub struct HistoryEntry {
    pub transaction_id: i32,
    pub giver_name: String,
    pub amount: i32,
    pub description: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub transaction_date: OffsetDateTime,
}
