//! Compact RS256 JWS encoding and verification.

use super::jwks::Jwks;
use base64ct::{Base64UrlUnpadded, Encoding};
use rsa::errors::Error as RsaError;
use rsa::pkcs1v15::{Signature, SigningKey, VerifyingKey};
use rsa::signature::{SignatureEncoding, Signer, Verifier};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use sha2::Sha256;
use thiserror::Error;

pub const ALG_RS256: &str = "RS256";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub alg: String,
    pub typ: String,
    pub kid: String,
}

impl Header {
    fn rs256(kid: impl Into<String>) -> Self {
        Self {
            alg: ALG_RS256.to_string(),
            typ: "JWT".to_string(),
            kid: kid.into(),
        }
    }
}

/// Claims carried by both ID and access tokens. Access tokens leave the
/// email fields out.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub v: i64,
    #[serde(default)]
    pub user_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email_verified: Option<bool>,
}

#[derive(Debug, Error)]
pub enum JwtError {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("unknown key id: {0}")]
    UnknownKid(String),
    #[error("failed to parse RSA key")]
    KeyParse,
    #[error("rsa error")]
    Rsa(#[from] RsaError),
    #[error("signing failed")]
    Signing,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, JwtError> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: DeserializeOwned>(s: &str) -> Result<T, JwtError> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| JwtError::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Sign `claims` with RS256, tagging the header with `kid`.
///
/// # Errors
///
/// Returns an error if header/claims JSON cannot be encoded or signing fails.
pub fn sign_rs256<C: Serialize>(
    signing_key: &SigningKey<Sha256>,
    kid: &str,
    claims: &C,
) -> Result<String, JwtError> {
    let header_b64 = b64e_json(&Header::rs256(kid))?;
    let claims_b64 = b64e_json(claims)?;
    let signing_input = format!("{header_b64}.{claims_b64}");

    let signature: Signature = signing_key
        .try_sign(signing_input.as_bytes())
        .map_err(|_| JwtError::Signing)?;
    let signature_b64 = Base64UrlUnpadded::encode_string(&signature.to_vec());

    Ok(format!("{signing_input}.{signature_b64}"))
}

/// Verify an RS256 token against `jwks` and return its claims.
///
/// # Errors
///
/// Returns an error if:
/// - the token is malformed or contains invalid base64/json,
/// - the header names another algorithm or a `kid` missing from `jwks`,
/// - the signature does not verify,
/// - `exp` is not after `now_unix_seconds`.
pub fn verify_rs256(
    token: &str,
    jwks: &Jwks,
    now_unix_seconds: i64,
) -> Result<TokenClaims, JwtError> {
    let mut parts = token.split('.');
    let header_b64 = parts.next().ok_or(JwtError::TokenFormat)?;
    let claims_b64 = parts.next().ok_or(JwtError::TokenFormat)?;
    let sig_b64 = parts.next().ok_or(JwtError::TokenFormat)?;
    if parts.next().is_some() {
        return Err(JwtError::TokenFormat);
    }

    let header: Header = b64d_json(header_b64)?;
    if header.alg != ALG_RS256 {
        return Err(JwtError::UnsupportedAlg(header.alg));
    }

    let jwk = jwks
        .find_by_kid(&header.kid)
        .ok_or_else(|| JwtError::UnknownKid(header.kid.clone()))?;

    let verifying_key = VerifyingKey::<Sha256>::new(jwk.to_rsa_public_key()?);
    let signing_input = format!("{header_b64}.{claims_b64}");
    let signature_bytes = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| JwtError::Base64)?;
    let signature =
        Signature::try_from(signature_bytes.as_slice()).map_err(|_| JwtError::InvalidSignature)?;
    verifying_key
        .verify(signing_input.as_bytes(), &signature)
        .map_err(|_| JwtError::InvalidSignature)?;

    let claims: TokenClaims = b64d_json(claims_b64)?;
    if claims.exp <= now_unix_seconds {
        return Err(JwtError::Expired);
    }

    Ok(claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::keys::tests::{other_key_manager, test_key_manager};
    use anyhow::Result;

    fn claims(exp: i64) -> TokenClaims {
        TokenClaims {
            iss: "https://id.example".to_string(),
            sub: "42".to_string(),
            aud: "web".to_string(),
            exp,
            iat: 1_000,
            v: 3,
            user_type: Some("member".to_string()),
            email: None,
            email_verified: None,
        }
    }

    #[test]
    fn sign_then_verify() -> Result<()> {
        let keys = test_key_manager()?;
        let token = keys.sign(&claims(2_000))?;

        let header: Header = b64d_json(token.split('.').next().unwrap_or_default())?;
        assert_eq!(header.kid, keys.kid());
        assert_eq!(header.alg, "RS256");

        let verified = verify_rs256(&token, keys.jwks(), 1_500)?;
        assert_eq!(verified, claims(2_000));
        Ok(())
    }

    #[test]
    fn access_claims_omit_email_fields() -> Result<()> {
        let json = serde_json::to_value(claims(2_000))?;
        assert!(json.get("email").is_none());
        assert!(json.get("email_verified").is_none());
        assert_eq!(json["v"], 3);
        Ok(())
    }

    #[test]
    fn expired_token_rejected() -> Result<()> {
        let keys = test_key_manager()?;
        let token = keys.sign(&claims(2_000))?;
        assert!(matches!(
            verify_rs256(&token, keys.jwks(), 2_000),
            Err(JwtError::Expired)
        ));
        Ok(())
    }

    #[test]
    fn other_key_under_same_kid_fails() -> Result<()> {
        let keys = test_key_manager()?;
        let other = other_key_manager()?;

        // Signed by the other key but claiming our kid.
        let forged = sign_rs256(other.signing_key(), keys.kid(), &claims(2_000))?;
        assert!(matches!(
            verify_rs256(&forged, keys.jwks(), 1_500),
            Err(JwtError::InvalidSignature)
        ));

        // Signed by the other key under its own kid.
        let token = other.sign(&claims(2_000))?;
        assert!(matches!(
            verify_rs256(&token, keys.jwks(), 1_500),
            Err(JwtError::UnknownKid(_))
        ));
        Ok(())
    }

    #[test]
    fn tampered_payload_fails() -> Result<()> {
        let keys = test_key_manager()?;
        let token = keys.sign(&claims(2_000))?;
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged_claims = b64e_json(&claims(9_999))?;
        parts[1] = &forged_claims;
        let tampered = parts.join(".");

        assert!(matches!(
            verify_rs256(&tampered, keys.jwks(), 1_500),
            Err(JwtError::InvalidSignature)
        ));
        Ok(())
    }

    #[test]
    fn malformed_tokens() -> Result<()> {
        let keys = test_key_manager()?;
        assert!(matches!(
            verify_rs256("garbage", keys.jwks(), 0),
            Err(JwtError::TokenFormat)
        ));
        assert!(matches!(
            verify_rs256("a.b.c.d", keys.jwks(), 0),
            Err(JwtError::TokenFormat)
        ));
        assert!(matches!(
            verify_rs256("!!.e30.sig", keys.jwks(), 0),
            Err(JwtError::Base64)
        ));

        let none_header = b64e_json(&serde_json::json!({"alg": "none", "typ": "JWT", "kid": keys.kid()}))?;
        let body = b64e_json(&claims(2_000))?;
        assert!(matches!(
            verify_rs256(&format!("{none_header}.{body}."), keys.jwks(), 0),
            Err(JwtError::UnsupportedAlg(alg)) if alg == "none"
        ));
        Ok(())
    }
}
