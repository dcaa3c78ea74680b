use axum::http::StatusCode;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("username {0:?} is already taken")]
    UsernameTaken(String),

    #[error("user {user_id} holds {balance} Ehre, cannot give {amount}")]
    InsufficientBalance {
        user_id: i32,
        balance: i32,
        amount: i32,
    },

    #[error("{0}")]
    Validation(String),

    #[error("no user with id {0}")]
    UnknownUser(i32),

    #[error("ledger store unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    #[error("credential hashing failed: {0}")]
    Credential(String),

    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
}

pub type LedgerResult<T> = Result<T, LedgerError>;

impl LedgerError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

impl LedgerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::UsernameTaken(_) | Self::Validation(_) | Self::UnknownUser(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::InsufficientBalance { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Credential(_) | Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Handler rejection for a failed ledger call. Server-side details go to the
/// log, not to the client.
pub(crate) fn reject(e: LedgerError) -> (StatusCode, String) {
    let status = e.status();
    if status.is_server_error() {
        error!(error = %e, "ledger operation failed");
        let msg = match status {
            StatusCode::SERVICE_UNAVAILABLE => "Service unavailable, try again later",
            _ => "Internal error",
        };
        (status, msg.into())
    } else {
        (status, e.to_string())
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::Unavailable(e)
            }
            other => Self::Database(other),
        }
    }
}
