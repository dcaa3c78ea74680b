use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
    Form, Router,
};
use tracing::{info, instrument, warn};

use crate::{
    auth::jwt::AuthUser,
    ledger::{
        dto::{parse_required, GiveEhreForm, HistoryModel, HistoryQuery, LeaderboardModel},
        error::reject,
        repo::DEFAULT_TOP_USERS,
    },
    state::AppState,
};

pub fn ledger_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/ehre", post(give_ehre))
        .route("/ehre-history", get(ehre_history))
}

async fn top_users(state: &AppState) -> Result<LeaderboardModel, (StatusCode, String)> {
    let users = state
        .ledger
        .get_top_users(DEFAULT_TOP_USERS)
        .await
        .map_err(reject)?;
    Ok(LeaderboardModel { users })
}

/// Public landing page with the current leaderboard.
#[instrument(skip(state))]
pub async fn index(State(state): State<AppState>) -> Result<Html<String>, (StatusCode, String)> {
    let model = top_users(&state).await?;
    Ok(state.views.render("index", Some(&model)).await)
}

#[instrument(skip(state, form))]
pub async fn give_ehre(
    State(state): State<AppState>,
    AuthUser(giver_id): AuthUser,
    Form(form): Form<GiveEhreForm>,
) -> Result<Html<String>, (StatusCode, String)> {
    let receiver_id = parse_required(form.receiver_id.as_deref(), "receiver-id")?;
    let amount = parse_required(form.amount.as_deref(), "amount")?;
    if amount <= 0 {
        warn!(giver_id, amount, "non-positive amount");
        return Err((StatusCode::BAD_REQUEST, "amount must be positive".into()));
    }
    let description = form
        .description
        .as_deref()
        .map(str::trim)
        .filter(|d| !d.is_empty());

    let record = state
        .ledger
        .give_ehre(giver_id, receiver_id, amount, description)
        .await
        .map_err(reject)?;
    info!(transaction_id = record.transaction_id, "transfer recorded");

    let model = top_users(&state).await?;
    Ok(state.views.render("leaderboard", Some(&model)).await)
}

#[instrument(skip(state))]
pub async fn ehre_history(
    State(state): State<AppState>,
    AuthUser(user_id): AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Html<String>, (StatusCode, String)> {
    let receiver_id = parse_required(query.receiver_id.as_deref(), "receiver-id")?;

    let Some(receiver) = state.ledger.get_user(receiver_id).await.map_err(reject)? else {
        warn!(receiver_id, "history for unknown receiver");
        return Err((StatusCode::BAD_REQUEST, "Unknown receiver".into()));
    };
    let history = state
        .ledger
        .get_user_ehre_history(receiver_id)
        .await
        .map_err(reject)?;

    let model = HistoryModel { receiver, history };
    Ok(state.views.render("history", Some(&model)).await)
}
