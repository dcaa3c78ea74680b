use lazy_static::lazy_static;
use regex::Regex;
use sqlx::PgPool;
use tracing::{debug, info, warn};

use crate::{
    auth::password::{PasswordService, SALT_LEN},
    config::GivingPolicy,
    ledger::{
        error::{LedgerError, LedgerResult},
        repo_types::{EhreTransaction, HistoryEntry, User},
    },
};

pub const DEFAULT_TOP_USERS: i64 = 10;

pub(crate) fn is_valid_username(username: &str) -> bool {
    lazy_static! {
        static ref USERNAME_RE: Regex = Regex::new(r"^[A-Za-z0-9_.-]{1,32}$").unwrap();
    }
    USERNAME_RE.is_match(username)
}

/// Users, balances and the append-only transaction log.
///
/// Every call checks a connection out of the pool for its own duration; the
/// pool's acquire timeout bounds the wait and surfaces as
/// [`LedgerError::Unavailable`].
#[derive(Clone)]
pub struct Ledger {
    db: PgPool,
    passwords: PasswordService,
    policy: GivingPolicy,
}

impl Ledger {
    pub fn new(db: PgPool, passwords: PasswordService, policy: GivingPolicy) -> Self {
        Self {
            db,
            passwords,
            policy,
        }
    }

    pub fn policy(&self) -> GivingPolicy {
        self.policy
    }

    /// Creates a user with a zero balance. A taken username fails with
    /// [`LedgerError::UsernameTaken`] and writes nothing.
    pub async fn register_user(&self, username: &str, password: &str) -> LedgerResult<User> {
        if !is_valid_username(username) {
            return Err(LedgerError::validation(
                "username must be 1-32 letters, digits, '_', '.' or '-'",
            ));
        }
        if password.is_empty() {
            return Err(LedgerError::validation("password must not be empty"));
        }

        let (hash, salt) = self.hash_password(password).await?;

        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (username, password_hash, salt)
            VALUES ($1, $2, $3)
            RETURNING user_id, username, password_hash, salt, ehre AS ehre_balance, created_at
            "#,
        )
        .bind(username)
        .bind(&hash)
        .bind(&salt[..])
        .fetch_one(&self.db)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                warn!(username, "username already registered");
                LedgerError::UsernameTaken(username.to_string())
            }
            other => other.into(),
        })?;

        info!(user_id = user.user_id, username = %user.username, "user registered");
        Ok(user)
    }

    /// `Some(user_id)` when the password matches. Unknown usernames and wrong
    /// passwords both give `None`.
    pub async fn authenticate_user(&self, username: &str, password: &str) -> LedgerResult<Option<i32>> {
        let row = sqlx::query_as::<_, (i32, String, Vec<u8>)>(
            r#"SELECT user_id, password_hash, salt FROM users WHERE username = $1"#,
        )
        .bind(username)
        .fetch_optional(&self.db)
        .await?;

        let Some((user_id, hash, salt)) = row else {
            debug!(username, "login for unknown username");
            return Ok(None);
        };

        let passwords = self.passwords.clone();
        let candidate = password.to_owned();
        let matches =
            tokio::task::spawn_blocking(move || passwords.verify_password(&hash, &salt, &candidate))
                .await
                .map_err(|e| LedgerError::Credential(e.to_string()))?;

        if !matches {
            debug!(user_id, "login with wrong password");
        }
        Ok(matches.then_some(user_id))
    }

    /// Records a transfer and credits the receiver in one database
    /// transaction. Under [`GivingPolicy::Backed`] the giver must hold
    /// `amount` and is debited by it.
    pub async fn give_ehre(
        &self,
        giver_id: i32,
        receiver_id: i32,
        amount: i32,
        description: Option<&str>,
    ) -> LedgerResult<EhreTransaction> {
        if amount <= 0 {
            return Err(LedgerError::validation("amount must be positive"));
        }
        if giver_id == receiver_id {
            return Err(LedgerError::validation("cannot give Ehre to yourself"));
        }

        let mut tx = self.db.begin().await?;

        // Lock both rows in id order so opposite transfers cannot deadlock.
        // Any early return drops `tx`, which rolls it back.
        let locked = sqlx::query_as::<_, (i32, i32)>(
            r#"
            SELECT user_id, ehre
            FROM users
            WHERE user_id = ANY($1)
            ORDER BY user_id
            FOR UPDATE
            "#,
        )
        .bind(vec![giver_id, receiver_id])
        .fetch_all(&mut *tx)
        .await?;

        let balance_of = |id: i32| locked.iter().find(|(uid, _)| *uid == id).map(|(_, e)| *e);
        let giver_balance = balance_of(giver_id).ok_or(LedgerError::UnknownUser(giver_id))?;
        let receiver_balance =
            balance_of(receiver_id).ok_or(LedgerError::UnknownUser(receiver_id))?;

        if receiver_balance.checked_add(amount).is_none() {
            warn!(receiver_id, receiver_balance, amount, "credit would overflow balance");
            return Err(LedgerError::validation("amount would overflow the receiver's balance"));
        }

        if self.policy == GivingPolicy::Backed {
            if giver_balance < amount {
                warn!(giver_id, giver_balance, amount, "not enough Ehre to give");
                return Err(LedgerError::InsufficientBalance {
                    user_id: giver_id,
                    balance: giver_balance,
                    amount,
                });
            }
            if giver_balance.checked_sub(amount).is_none() {
                return Err(LedgerError::validation("amount would overflow the giver's balance"));
            }
            sqlx::query(r#"UPDATE users SET ehre = ehre - $1 WHERE user_id = $2"#)
                .bind(amount)
                .bind(giver_id)
                .execute(&mut *tx)
                .await?;
        }

        let record = sqlx::query_as::<_, EhreTransaction>(
            r#"
            INSERT INTO ehre_transactions (giver_id, receiver_id, amount, description)
            VALUES ($1, $2, $3, $4)
            RETURNING transaction_id, giver_id, receiver_id, amount, description, transaction_date
            "#,
        )
        .bind(giver_id)
        .bind(receiver_id)
        .bind(amount)
        .bind(description)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(r#"UPDATE users SET ehre = ehre + $1 WHERE user_id = $2"#)
            .bind(amount)
            .bind(receiver_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        info!(transaction_id = record.transaction_id, giver_id, receiver_id, amount, "ehre given");
        Ok(record)
    }

    /// Transfers received by `receiver_id`, most recent first.
    pub async fn get_user_ehre_history(&self, receiver_id: i32) -> LedgerResult<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryEntry>(
            r#"
            SELECT t.transaction_id, u.username AS giver_name, t.amount, t.description,
                   t.transaction_date
            FROM ehre_transactions t
            JOIN users u ON u.user_id = t.giver_id
            WHERE t.receiver_id = $1
            ORDER BY t.transaction_date DESC, t.transaction_id DESC
            "#,
        )
        .bind(receiver_id)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    /// Highest balances first; equal balances in ascending id order.
    pub async fn get_top_users(&self, limit: i64) -> LedgerResult<Vec<User>> {
        let rows = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, username, password_hash, salt, ehre AS ehre_balance, created_at
            FROM users
            ORDER BY ehre DESC, user_id ASC
            LIMIT $1
            "#,
        )
        .bind(limit.max(0))
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    pub async fn get_user(&self, user_id: i32) -> LedgerResult<Option<User>> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT user_id, username, password_hash, salt, ehre AS ehre_balance, created_at
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    pub async fn get_user_ehre(&self, user_id: i32) -> LedgerResult<Option<i32>> {
        let ehre = sqlx::query_scalar::<_, i32>(r#"SELECT ehre FROM users WHERE user_id = $1"#)
            .bind(user_id)
            .fetch_optional(&self.db)
            .await?;
        Ok(ehre)
    }

    async fn hash_password(&self, password: &str) -> LedgerResult<(String, [u8; SALT_LEN])> {
        let passwords = self.passwords.clone();
        let password = password.to_owned();
        tokio::task::spawn_blocking(move || passwords.hash_password(&password))
            .await
            .map_err(|e| LedgerError::Credential(e.to_string()))?
            .map_err(|e| LedgerError::Credential(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::password::fast_service;

    #[test]
    fn username_shape() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("bob.the-builder_2"));
        assert!(!is_valid_username(""));
        assert!(!is_valid_username("has space"));
        assert!(!is_valid_username(&"x".repeat(33)));
    }

    // The tests below need PostgreSQL: DATABASE_URL=... cargo test -- --ignored

    fn ledger(pool: PgPool, policy: GivingPolicy) -> Ledger {
        Ledger::new(pool, fast_service(), policy)
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn register_then_authenticate(pool: PgPool) {
        let ledger = ledger(pool, GivingPolicy::Unbacked);
        let alice = ledger.register_user("alice", "s3cret").await.unwrap();
        assert_eq!(alice.ehre_balance, 0);
        assert_eq!(alice.salt.len(), SALT_LEN);

        let id = ledger.authenticate_user("alice", "s3cret").await.unwrap();
        assert_eq!(id, Some(alice.user_id));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn failed_logins_are_indistinguishable(pool: PgPool) {
        let ledger = ledger(pool, GivingPolicy::Unbacked);
        ledger.register_user("alice", "s3cret").await.unwrap();

        let wrong_password = ledger.authenticate_user("alice", "guess").await.unwrap();
        let unknown_user = ledger.authenticate_user("mallory", "s3cret").await.unwrap();
        let wrong_case = ledger.authenticate_user("Alice", "s3cret").await.unwrap();
        let padded = ledger.authenticate_user(" alice ", "s3cret").await.unwrap();
        assert_eq!(padded, None);
        assert_eq!(wrong_password, None);
        assert_eq!(unknown_user, None);
        assert_eq!(wrong_case, None);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn duplicate_username_conflicts(pool: PgPool) {
        let ledger = ledger(pool.clone(), GivingPolicy::Unbacked);
        ledger.register_user("alice", "x").await.unwrap();
        let err = ledger.register_user("alice", "x").await.unwrap_err();
        assert!(matches!(err, LedgerError::UsernameTaken(ref name) if name == "alice"));

        let count: i64 = sqlx::query_scalar("SELECT count(*) FROM users WHERE username = 'alice'")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn give_updates_leaderboard_and_history(pool: PgPool) {
        let ledger = ledger(pool, GivingPolicy::Unbacked);
        let alice = ledger.register_user("alice", "pw").await.unwrap();
        let bob = ledger.register_user("bob", "pw").await.unwrap();

        let record = ledger
            .give_ehre(alice.user_id, bob.user_id, 50, Some("thanks"))
            .await
            .unwrap();
        assert_eq!((record.giver_id, record.receiver_id), (alice.user_id, bob.user_id));
        assert_eq!(record.amount, 50);

        let top = ledger.get_top_users(1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].username, "bob");
        assert_eq!(top[0].ehre_balance, 50);

        let history = ledger.get_user_ehre_history(bob.user_id).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].giver_name, "alice");
        assert_eq!(history[0].amount, 50);
        assert_eq!(history[0].description.as_deref(), Some("thanks"));

        // Unbacked giving leaves the giver untouched.
        assert_eq!(ledger.get_user_ehre(alice.user_id).await.unwrap(), Some(0));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn history_is_most_recent_first(pool: PgPool) {
        let ledger = ledger(pool, GivingPolicy::Unbacked);
        let a = ledger.register_user("a", "pw").await.unwrap();
        let b = ledger.register_user("b", "pw").await.unwrap();
        let c = ledger.register_user("c", "pw").await.unwrap();

        ledger.give_ehre(a.user_id, c.user_id, 1, None).await.unwrap();
        ledger.give_ehre(b.user_id, c.user_id, 2, Some("later")).await.unwrap();

        let history = ledger.get_user_ehre_history(c.user_id).await.unwrap();
        let amounts: Vec<i32> = history.iter().map(|h| h.amount).collect();
        assert_eq!(amounts, vec![2, 1]);
        assert!(history[0].transaction_date >= history[1].transaction_date);
        assert!(ledger.get_user_ehre_history(a.user_id).await.unwrap().is_empty());
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn concurrent_credits_are_not_lost(pool: PgPool) {
        let ledger = ledger(pool, GivingPolicy::Unbacked);
        let receiver = ledger.register_user("receiver", "pw").await.unwrap();
        let mut givers = Vec::new();
        for i in 0..100 {
            givers.push(ledger.register_user(&format!("giver{i}"), "pw").await.unwrap());
        }

        let mut handles = Vec::new();
        for giver in givers {
            let ledger = ledger.clone();
            let receiver_id = receiver.user_id;
            handles.push(tokio::spawn(async move {
                ledger.give_ehre(giver.user_id, receiver_id, 10, Some("")).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        assert_eq!(ledger.get_user_ehre(receiver.user_id).await.unwrap(), Some(1000));
        assert_eq!(ledger.get_user_ehre_history(receiver.user_id).await.unwrap().len(), 100);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn backed_policy_debits_and_rejects_overdraft(pool: PgPool) {
        let ledger = ledger(pool.clone(), GivingPolicy::Backed);
        let alice = ledger.register_user("alice", "pw").await.unwrap();
        let bob = ledger.register_user("bob", "pw").await.unwrap();

        let err = ledger.give_ehre(alice.user_id, bob.user_id, 5, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { balance: 0, amount: 5, .. }));
        assert!(ledger.get_user_ehre_history(bob.user_id).await.unwrap().is_empty());

        sqlx::query("UPDATE users SET ehre = 20 WHERE user_id = $1")
            .bind(alice.user_id)
            .execute(&pool)
            .await
            .unwrap();
        ledger.give_ehre(alice.user_id, bob.user_id, 15, None).await.unwrap();

        assert_eq!(ledger.get_user_ehre(alice.user_id).await.unwrap(), Some(5));
        assert_eq!(ledger.get_user_ehre(bob.user_id).await.unwrap(), Some(15));
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn invalid_transfers_write_nothing(pool: PgPool) {
        let ledger = ledger(pool.clone(), GivingPolicy::Unbacked);
        let alice = ledger.register_user("alice", "pw").await.unwrap();

        let err = ledger.give_ehre(alice.user_id, 9999, 5, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::UnknownUser(9999)));
        let err = ledger.give_ehre(alice.user_id, alice.user_id, 5, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        let err = ledger.give_ehre(alice.user_id, 9999, 0, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));

        let rows: i64 = sqlx::query_scalar("SELECT count(*) FROM ehre_transactions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 0);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn credit_past_integer_range_is_rejected(pool: PgPool) {
        let ledger = ledger(pool.clone(), GivingPolicy::Unbacked);
        let alice = ledger.register_user("alice", "pw").await.unwrap();
        let bob = ledger.register_user("bob", "pw").await.unwrap();

        ledger.give_ehre(alice.user_id, bob.user_id, i32::MAX, None).await.unwrap();
        let err = ledger.give_ehre(alice.user_id, bob.user_id, 1, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(_)));
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);

        assert_eq!(ledger.get_user_ehre(bob.user_id).await.unwrap(), Some(i32::MAX));
        let rows: i64 = sqlx::query_scalar("SELECT count(*) FROM ehre_transactions")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(rows, 1);
    }

    #[sqlx::test(migrations = "./migrations")]
    #[ignore = "requires PostgreSQL"]
    async fn get_user_misses_cleanly(pool: PgPool) {
        let ledger = ledger(pool, GivingPolicy::Unbacked);
        assert!(ledger.get_user(42).await.unwrap().is_none());
        assert!(ledger.get_user_ehre(42).await.unwrap().is_none());
        let bob = ledger.register_user("bob", "pw").await.unwrap();
        assert_eq!(ledger.get_user(bob.user_id).await.unwrap().unwrap().username, "bob");
    }
}
