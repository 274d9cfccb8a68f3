//! Password hashing with Argon2id PHC strings.
//!
//! Stored hashes embed their own parameters, so verification works for any
//! parameter set while `needs_rehash` flags hashes produced with an outdated one.

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher as _, PasswordVerifier, Version,
    password_hash::SaltString,
};
use rand::rngs::OsRng;
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

/// Default Argon2id memory cost in KiB.
pub const DEFAULT_M_COST: u32 = 19_456;
/// Default Argon2id iteration count.
pub const DEFAULT_T_COST: u32 = 2;
/// Default Argon2id parallelism.
pub const DEFAULT_P_COST: u32 = 1;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("invalid argon2 parameters: {0}")]
    Params(String),
    #[error("failed to hash password: {0}")]
    Hash(String),
}

/// A freshly computed hash and the algorithm tag stored beside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashedPassword {
    pub hash: String,
    pub algo: String,
}

pub trait PasswordHasher: Send + Sync {
    /// # Errors
    /// Returns an error if the hash cannot be computed.
    fn hash(&self, password: &SecretString) -> Result<HashedPassword, HashError>;

    /// Constant-time check of `password` against a stored PHC string.
    /// A stored value that is not a valid PHC string never matches.
    fn verify(&self, stored_hash: &str, password: &SecretString) -> bool;

    fn needs_rehash(&self, stored_hash: &str) -> bool;
}

#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: Params,
}

impl Argon2Hasher {
    /// # Errors
    /// Returns an error if the cost parameters are outside argon2's accepted range.
    pub fn new(m_cost: u32, t_cost: u32, p_cost: u32) -> Result<Self, HashError> {
        let params = Params::new(m_cost, t_cost, p_cost, None)
            .map_err(|err| HashError::Params(err.to_string()))?;
        Ok(Self { params })
    }

    #[must_use]
    pub fn algo_tag(&self) -> String {
        format!(
            "argon2id:m={},t={},p={}",
            self.params.m_cost(),
            self.params.t_cost(),
            self.params.p_cost()
        )
    }

    fn argon2(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl Default for Argon2Hasher {
    fn default() -> Self {
        Self {
            params: Params::new(DEFAULT_M_COST, DEFAULT_T_COST, DEFAULT_P_COST, None)
                .unwrap_or_default(),
        }
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, password: &SecretString) -> Result<HashedPassword, HashError> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = self
            .argon2()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map_err(|err| HashError::Hash(err.to_string()))?
            .to_string();
        Ok(HashedPassword {
            hash,
            algo: self.algo_tag(),
        })
    }

    fn verify(&self, stored_hash: &str, password: &SecretString) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return false;
        };
        // The verifier reads algorithm, version and costs from the PHC string itself.
        Argon2::default()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .is_ok()
    }

    fn needs_rehash(&self, stored_hash: &str) -> bool {
        let Ok(parsed) = PasswordHash::new(stored_hash) else {
            return true;
        };
        if parsed.algorithm != Algorithm::Argon2id.ident() {
            return true;
        }
        if parsed.version != Some(Version::V0x13.into()) {
            return true;
        }
        let Ok(stored) = Params::try_from(&parsed) else {
            return true;
        };
        stored.m_cost() != self.params.m_cost()
            || stored.t_cost() != self.params.t_cost()
            || stored.p_cost() != self.params.p_cost()
    }
}
