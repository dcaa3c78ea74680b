use std::time::Duration;

use axum::{
    extract::FromRequestParts,
    http::request::Parts,
    response::Response,
};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{config::JwtConfig, state::AppState, views::login_page};

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("token rejected: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("subject {0:?} is not a user id")]
    InvalidSubject(String),
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub jti: Uuid,
    pub iat: usize,
    pub exp: usize,
    pub iss: String,
    pub aud: String,
}

/// Only the subject, read without checking anything else.
#[derive(Debug, Deserialize)]
struct Subject {
    sub: String,
}

/// A user id taken from a token whose signature, issuer, audience and expiry
/// have all been checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Identity {
    pub user_id: i32,
}

#[derive(Clone)]
pub struct JwtKeys {
    pub encoding: EncodingKey,
    pub decoding: DecodingKey,
    pub issuer: String,
    pub audience: String,
    pub ttl: Duration,
}

impl From<&JwtConfig> for JwtKeys {
    fn from(cfg: &JwtConfig) -> Self {
        Self {
            encoding: EncodingKey::from_secret(cfg.secret.as_bytes()),
            decoding: DecodingKey::from_secret(cfg.secret.as_bytes()),
            issuer: cfg.issuer.clone(),
            audience: cfg.audience.clone(),
            ttl: Duration::from_secs((cfg.ttl_minutes.max(0) as u64) * 60),
        }
    }
}

impl JwtKeys {
    pub fn generate_token(&self, user_id: i32) -> Result<String, TokenError> {
        self.sign_at(user_id, OffsetDateTime::now_utc())
    }

    pub(crate) fn sign_at(&self, user_id: i32, now: OffsetDateTime) -> Result<String, TokenError> {
        let exp = now + TimeDuration::seconds(self.ttl.as_secs() as i64);
        let claims = Claims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4(),
            iat: now.unix_timestamp().max(0) as usize,
            exp: exp.unix_timestamp().max(0) as usize,
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;
        debug!(user_id, jti = %claims.jti, "jwt signed");
        Ok(token)
    }

    /// Full check of a bearer token, yielding the identity it proves.
    pub fn verify(&self, token: &str) -> Result<Identity, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.set_audience(std::slice::from_ref(&self.audience));
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        let data = decode::<Claims>(token, &self.decoding, &validation)?;
        let user_id = parse_subject(&data.claims.sub)?;
        debug!(user_id, jti = %data.claims.jti, "jwt verified");
        Ok(Identity { user_id })
    }

    pub fn validate_token(&self, token: &str) -> bool {
        self.verify(token).is_ok()
    }

    /// Reads the subject WITHOUT checking signature or expiry. Callers must
    /// have validated the token first; prefer [`JwtKeys::verify`].
    pub fn get_user_id(&self, token: &str) -> Result<i32, TokenError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.insecure_disable_signature_validation();
        validation.validate_exp = false;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();
        let data = decode::<Subject>(token, &DecodingKey::from_secret(&[]), &validation)?;
        parse_subject(&data.claims.sub)
    }
}

fn parse_subject(sub: &str) -> Result<i32, TokenError> {
    sub.parse::<i32>()
        .map_err(|_| TokenError::InvalidSubject(sub.to_string()))
}

/// Authenticated caller. Requests without a valid bearer token get the login
/// view instead of reaching the handler.
pub struct AuthUser(pub i32);

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer ").or_else(|| h.strip_prefix("bearer ")));

        let Some(token) = token else {
            debug!("missing bearer token");
            return Err(login_page(state).await);
        };

        match state.jwt.verify(token) {
            Ok(identity) => Ok(AuthUser(identity.user_id)),
            Err(e) => {
                warn!(error = %e, "invalid or expired token");
                Err(login_page(state).await)
            }
        }
    }
}
