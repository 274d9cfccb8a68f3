use super::jwt::JwtError;
use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPublicKey};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwks {
    pub keys: Vec<Jwk>,
}

impl Jwks {
    /// Find a key by `kid` (Key ID).
    #[must_use]
    pub fn find_by_kid(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Jwk {
    pub kty: String,
    #[serde(rename = "use")]
    pub key_use: String,
    pub alg: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

impl Jwk {
    /// Describe an RSA signing key. `n` and `e` are unsigned big-endian integers,
    /// base64url without padding.
    #[must_use]
    pub fn from_rsa_public_key(public_key: &RsaPublicKey, kid: impl Into<String>) -> Self {
        Self {
            kty: "RSA".to_string(),
            key_use: "sig".to_string(),
            alg: "RS256".to_string(),
            kid: kid.into(),
            n: Base64UrlUnpadded::encode_string(&public_key.n().to_bytes_be()),
            e: Base64UrlUnpadded::encode_string(&public_key.e().to_bytes_be()),
        }
    }

    /// Convert this JWK back into an `RsaPublicKey`.
    ///
    /// # Errors
    ///
    /// Returns an error if the base64url values cannot be decoded or the RSA key is invalid.
    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, JwtError> {
        if self.kty != "RSA" {
            return Err(JwtError::KeyParse);
        }
        let n_bytes = Base64UrlUnpadded::decode_vec(&self.n).map_err(|_| JwtError::Base64)?;
        let e_bytes = Base64UrlUnpadded::decode_vec(&self.e).map_err(|_| JwtError::Base64)?;
        let n = BigUint::from_bytes_be(&n_bytes);
        let e = BigUint::from_bytes_be(&e_bytes);
        RsaPublicKey::new(n, e).map_err(JwtError::Rsa)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::keys::tests::test_key_manager;
    use anyhow::Result;

    #[test]
    fn jwk_round_trips_public_key() -> Result<()> {
        let keys = test_key_manager()?;
        let jwk = Jwk::from_rsa_public_key(keys.public_key(), keys.kid());

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg, "RS256");
        assert_eq!(jwk.key_use, "sig");
        // 65537
        assert_eq!(jwk.e, "AQAB");
        assert_eq!(&jwk.to_rsa_public_key()?, keys.public_key());
        Ok(())
    }

    #[test]
    fn serializes_use_field() -> Result<()> {
        let keys = test_key_manager()?;
        let json = serde_json::to_value(keys.jwks())?;
        let first = &json["keys"][0];

        assert_eq!(first["use"], "sig");
        assert_eq!(first["kid"], keys.kid());
        assert!(first.get("key_use").is_none());
        Ok(())
    }

    #[test]
    fn find_by_kid_misses_unknown() -> Result<()> {
        let keys = test_key_manager()?;
        assert!(keys.jwks().find_by_kid(keys.kid()).is_some());
        assert!(keys.jwks().find_by_kid("nope").is_none());
        Ok(())
    }
}
