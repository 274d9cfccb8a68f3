//! Process-wide RS256 signing key.
//!
//! One key pair is created (or loaded) at startup and is read-only afterwards,
//! so it is shared behind an `Arc` without locking.

use super::jwks::{Jwk, Jwks};
use super::jwt::{self, JwtError, TokenClaims};
use base64ct::{Base64UrlUnpadded, Encoding};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, EncodeRsaPublicKey};
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::Serialize;
use sha2::{Digest, Sha256};

pub const KEY_BITS: usize = 2048;

pub struct KeyManager {
    signing_key: SigningKey<Sha256>,
    public_key: RsaPublicKey,
    kid: String,
    jwks: Jwks,
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("kid", &self.kid)
            .finish_non_exhaustive()
    }
}

impl KeyManager {
    /// Generate a fresh 2048-bit key from the OS CSPRNG. CPU heavy; call it
    /// from a blocking context.
    ///
    /// # Errors
    /// Returns an error if key generation fails.
    pub fn generate() -> Result<Self, JwtError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)?;
        Self::from_private_key(private_key)
    }

    /// Load a PKCS#8 or PKCS#1 PEM private key.
    ///
    /// # Errors
    /// Returns an error if the PEM cannot be parsed as an RSA private key.
    pub fn from_pem(pem: &str) -> Result<Self, JwtError> {
        let private_key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|_| JwtError::KeyParse)?;
        Self::from_private_key(private_key)
    }

    /// # Errors
    /// Returns an error if the public key cannot be DER encoded for the `kid`.
    pub fn from_private_key(private_key: RsaPrivateKey) -> Result<Self, JwtError> {
        let public_key = RsaPublicKey::from(&private_key);
        let kid = derive_kid(&public_key)?;
        let jwks = Jwks {
            keys: vec![Jwk::from_rsa_public_key(&public_key, kid.clone())],
        };
        Ok(Self {
            signing_key: SigningKey::<Sha256>::new(private_key),
            public_key,
            kid,
            jwks,
        })
    }

    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    #[must_use]
    pub const fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    #[must_use]
    pub const fn jwks(&self) -> &Jwks {
        &self.jwks
    }

    #[cfg(test)]
    pub(crate) const fn signing_key(&self) -> &SigningKey<Sha256> {
        &self.signing_key
    }

    /// # Errors
    /// Returns an error if the claims cannot be encoded or signing fails.
    pub fn sign<C: Serialize>(&self, claims: &C) -> Result<String, JwtError> {
        jwt::sign_rs256(&self.signing_key, &self.kid, claims)
    }

    /// # Errors
    /// Returns an error if the token does not verify against this key's JWKS or is expired.
    pub fn verify(&self, token: &str, now_unix_seconds: i64) -> Result<TokenClaims, JwtError> {
        jwt::verify_rs256(token, &self.jwks, now_unix_seconds)
    }
}

/// First 8 bytes of SHA-256 over the PKCS#1 DER public key, base64url.
fn derive_kid(public_key: &RsaPublicKey) -> Result<String, JwtError> {
    let der = public_key
        .to_pkcs1_der()
        .map_err(|_| JwtError::KeyParse)?;
    let digest = Sha256::digest(der.as_bytes());
    Ok(Base64UrlUnpadded::encode_string(&digest[..8]))
}
