use std::{path::PathBuf, str::FromStr};

use anyhow::Context;
use serde::Deserialize;

/// Minimum HMAC secret length in bytes (256 bits).
pub const MIN_SECRET_LEN: usize = 32;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
}

impl JwtConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            self.secret.len() >= MIN_SECRET_LEN,
            "JWT_SECRET must be at least {} bytes",
            MIN_SECRET_LEN
        );
        anyhow::ensure!(self.ttl_minutes > 0, "JWT_TTL_MINUTES must be positive");
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

/// Argon2 work parameters, fixed for the whole process so that every stored
/// hash can be verified by every instance.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
pub struct PasswordConfig {
    pub time_cost: u32,
    pub memory_kib: u32,
    pub lanes: u32,
    pub output_len: usize,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            time_cost: 10,
            memory_kib: 32768,
            lanes: 5,
            output_len: 20,
        }
    }
}

/// How a transfer treats the giver's balance.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GivingPolicy {
    /// Only the receiver is credited; givers hand out Ehre freely.
    #[default]
    Unbacked,
    /// The giver must hold at least `amount` and is debited by it.
    Backed,
}

impl FromStr for GivingPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unbacked" => Ok(Self::Unbacked),
            "backed" => Ok(Self::Backed),
            other => anyhow::bail!("unknown giving policy {other:?}"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub db: DbConfig,
    pub jwt: JwtConfig,
    pub views_source: PathBuf,
    pub password: PasswordConfig,
    pub giving_policy: GivingPolicy,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let db = DbConfig {
            url: required("DATABASE_URL")?,
            max_connections: parsed_or("DB_MAX_CONNECTIONS", 10)?,
            acquire_timeout_secs: parsed_or("DB_ACQUIRE_TIMEOUT_SECS", 5)?,
        };
        let jwt = JwtConfig {
            secret: required("JWT_SECRET")?,
            issuer: std::env::var("JWT_ISSUER").unwrap_or_else(|_| "ehrenmeter".into()),
            audience: std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "ehrenmeter".into()),
            ttl_minutes: parsed_or("JWT_TTL_MINUTES", 60)?,
        };
        jwt.validate()?;

        let defaults = PasswordConfig::default();
        let password = PasswordConfig {
            time_cost: parsed_or("ARGON2_TIME_COST", defaults.time_cost)?,
            memory_kib: parsed_or("ARGON2_MEMORY_KIB", defaults.memory_kib)?,
            lanes: parsed_or("ARGON2_LANES", defaults.lanes)?,
            output_len: parsed_or("ARGON2_OUTPUT_LEN", defaults.output_len)?,
        };

        Ok(Self {
            db,
            jwt,
            views_source: PathBuf::from(required("VIEWS_SOURCE")?),
            password,
            giving_policy: parsed_or("EHRE_GIVING_POLICY", GivingPolicy::default())?,
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key).with_context(|| format!("missing required setting {key}"))
}

fn parsed_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
        Err(_) => Ok(default),
    }
}
