use crate::state::AppState;
use axum::Router;

mod dto;
pub mod error;
pub mod handlers;
pub mod repo;
pub mod repo_types;

pub use repo::Ledger;

pub fn router() -> Router<AppState> {
    handlers::ledger_routes()
}
