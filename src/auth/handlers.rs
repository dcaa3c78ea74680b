use axum::{extract::State, http::StatusCode, routing::post, Form, Json, Router};
use tracing::{error, info, instrument, warn};

use crate::{
    auth::dto::{CredentialsForm, TokenResponse},
    ledger::error::{reject, LedgerError},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/login", post(login))
        .route("/signup", post(signup))
}

fn issue_token(state: &AppState, user_id: i32) -> Result<Json<TokenResponse>, (StatusCode, String)> {
    match state.jwt.generate_token(user_id) {
        Ok(token) => Ok(Json(TokenResponse { token })),
        Err(e) => {
            error!(error = %e, user_id, "jwt sign failed");
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Internal error".into()))
        }
    }
}

#[instrument(skip(state, form))]
pub async fn login(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> Result<Json<TokenResponse>, (StatusCode, String)> {
    let Some((username, password)) = form.fields() else {
        warn!("login without username or password");
        return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
    };

    let user_id = match state.ledger.authenticate_user(username, password).await {
        Ok(Some(id)) => id,
        Ok(None) => {
            warn!(username, "login rejected");
            return Err((StatusCode::UNAUTHORIZED, "Invalid credentials".into()));
        }
        Err(e) => return Err(reject(e)),
    };

    info!(user_id, "user logged in");
    issue_token(&state, user_id)
}

#[instrument(skip(state, form))]
pub async fn signup(
    State(state): State<AppState>,
    Form(form): Form<CredentialsForm>,
) -> Result<Json<TokenResponse>, (StatusCode, String)> {
    let Some((username, password)) = form.fields() else {
        warn!("signup without username or password");
        return Err((StatusCode::BAD_REQUEST, "Username and password are required".into()));
    };

    let user = match state.ledger.register_user(username, password).await {
        Ok(u) => u,
        Err(LedgerError::UsernameTaken(_)) => {
            return Err((StatusCode::BAD_REQUEST, "Username already taken".into()));
        }
        Err(e) => return Err(reject(e)),
    };

    issue_token(&state, user.user_id)
}
