use argon2::{
    password_hash::{Output, PasswordHash, PasswordHasher, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::{rngs::OsRng, RngCore};
use tracing::{error, warn};

use crate::config::PasswordConfig;

pub const SALT_LEN: usize = 16;

/// Argon2i hashing with process-wide work parameters. The encoded PHC string
/// carries the parameters, so verification needs only the string and salt.
#[derive(Clone)]
pub struct PasswordService {
    params: Params,
}

impl PasswordService {
    pub fn new(cfg: &PasswordConfig) -> anyhow::Result<Self> {
        let params = Params::new(cfg.memory_kib, cfg.time_cost, cfg.lanes, Some(cfg.output_len))
            .map_err(|e| anyhow::anyhow!("invalid argon2 parameters: {e}"))?;
        Ok(Self { params })
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2i, Version::V0x13, self.params.clone())
    }

    pub fn hash_password(&self, plain: &str) -> anyhow::Result<(String, [u8; SALT_LEN])> {
        let mut salt = [0u8; SALT_LEN];
        OsRng.fill_bytes(&mut salt);
        let salt_string = SaltString::encode_b64(&salt).map_err(|e| {
            error!(error = %e, "argon2 salt encoding error");
            anyhow::anyhow!(e.to_string())
        })?;
        let hash = self
            .argon2()
            .hash_password(plain.as_bytes(), &salt_string)
            .map_err(|e| {
                error!(error = %e, "argon2 hash_password error");
                anyhow::anyhow!(e.to_string())
            })?
            .to_string();
        Ok((hash, salt))
    }

    /// Never errors: a stored hash that cannot be parsed simply fails to match.
    pub fn verify_password(&self, encoded: &str, salt: &[u8], candidate: &str) -> bool {
        match rederive(encoded, salt, candidate) {
            Ok(matches) => matches,
            Err(e) => {
                warn!(error = %e, "stored password hash unusable");
                false
            }
        }
    }
}

fn rederive(encoded: &str, salt: &[u8], candidate: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(encoded).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let expected = parsed
        .hash
        .ok_or_else(|| anyhow::anyhow!("hash string has no output"))?;
    let algorithm =
        Algorithm::try_from(parsed.algorithm).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    let version = match parsed.version {
        Some(v) => Version::try_from(v).map_err(|e| anyhow::anyhow!(e.to_string()))?,
        None => Version::default(),
    };
    let params = Params::try_from(&parsed).map_err(|e| anyhow::anyhow!(e.to_string()))?;

    let mut derived = vec![0u8; expected.len()];
    Argon2::new(algorithm, version, params)
        .hash_password_into(candidate.as_bytes(), salt, &mut derived)
        .map_err(|e| anyhow::anyhow!(e.to_string()))?;

    // Output equality is constant-time.
    let derived = Output::new(&derived).map_err(|e| anyhow::anyhow!(e.to_string()))?;
    Ok(derived == expected)
}

#[cfg(test)]
pub(crate) fn fast_service() -> PasswordService {
    PasswordService::new(&PasswordConfig {
        time_cost: 1,
        memory_kib: 64,
        lanes: 1,
        output_len: 20,
    })
    .expect("test params")
}
