//! Signed, time-bounded access and refresh tokens.
//!
//! Tokens are HS256 JWTs assembled from RustCrypto primitives: base64url
//! JSON header and claims segments signed with HMAC-SHA256. Verification
//! takes an explicit `now_unix_seconds` so expiry behavior is testable with
//! fixed clocks, and distinguishes three outcomes: valid, expired (so callers
//! can offer a refresh path), and invalid/malformed (always a hard reject).
//!
//! Claims carry an explicit `typ` discriminator so an access token can never
//! be accepted where a refresh token is required and vice versa.

use base64ct::{Base64UrlUnpadded, Encoding};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::identity::{PublicIdentity, Role};

type HmacSha256 = Hmac<Sha256>;

/// Discriminates the two token classes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Access => f.write_str("access"),
            Self::Refresh => f.write_str("refresh"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct TokenHeader {
    alg: String,
    typ: String,
}

impl TokenHeader {
    fn hs256() -> Self {
        Self {
            alg: "HS256".to_string(),
            typ: "JWT".to_string(),
        }
    }
}

/// Stateless claims carried by both token classes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenClaims {
    pub sub: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    pub typ: TokenKind,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid token format")]
    TokenFormat,
    #[error("invalid base64url encoding")]
    Base64,
    #[error("invalid json")]
    Json(#[from] serde_json::Error),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlg(String),
    #[error("invalid signing key")]
    Key,
    #[error("invalid signature")]
    InvalidSignature,
    #[error("token expired")]
    Expired,
    #[error("wrong token type: expected {expected}, got {actual}")]
    WrongType {
        expected: TokenKind,
        actual: TokenKind,
    },
}

fn b64e_json<T: Serialize>(value: &T) -> Result<String, Error> {
    let json = serde_json::to_vec(value)?;
    Ok(Base64UrlUnpadded::encode_string(&json))
}

fn b64d_json<T: for<'de> Deserialize<'de>>(s: &str) -> Result<T, Error> {
    let bytes = Base64UrlUnpadded::decode_vec(s).map_err(|_| Error::Base64)?;
    Ok(serde_json::from_slice(&bytes)?)
}

/// Creates and validates the two token classes with one symmetric key.
///
/// The signing key is injected at construction, never read from ambient
/// configuration and never logged.
pub struct TokenCodec {
    signing_key: SecretString,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
}

impl TokenCodec {
    #[must_use]
    pub fn new(
        signing_key: SecretString,
        access_ttl_seconds: i64,
        refresh_ttl_seconds: i64,
    ) -> Self {
        Self {
            signing_key,
            access_ttl_seconds,
            refresh_ttl_seconds,
        }
    }

    #[must_use]
    pub const fn ttl_seconds(&self, kind: TokenKind) -> i64 {
        match kind {
            TokenKind::Access => self.access_ttl_seconds,
            TokenKind::Refresh => self.refresh_ttl_seconds,
        }
    }

    fn mac(&self) -> Result<HmacSha256, Error> {
        HmacSha256::new_from_slice(self.signing_key.expose_secret().as_bytes())
            .map_err(|_| Error::Key)
    }

    /// Issue a signed token of the given class for an identity.
    ///
    /// # Errors
    ///
    /// Returns an error if claims cannot be encoded or the key is unusable.
    pub fn issue(
        &self,
        identity: &PublicIdentity,
        kind: TokenKind,
        now_unix_seconds: i64,
    ) -> Result<String, Error> {
        let claims = TokenClaims {
            sub: identity.id,
            username: identity.username.clone(),
            email: identity.email.clone(),
            role: identity.role,
            iat: now_unix_seconds,
            exp: now_unix_seconds + self.ttl_seconds(kind),
            jti: Uuid::new_v4().to_string(),
            typ: kind,
        };
        self.sign(&claims)
    }

    /// Re-issue an access token from previously verified refresh claims.
    ///
    /// # Errors
    ///
    /// Returns an error if claims cannot be encoded or the key is unusable.
    pub fn reissue_access(
        &self,
        claims: &TokenClaims,
        now_unix_seconds: i64,
    ) -> Result<String, Error> {
        let access = TokenClaims {
            sub: claims.sub,
            username: claims.username.clone(),
            email: claims.email.clone(),
            role: claims.role,
            iat: now_unix_seconds,
            exp: now_unix_seconds + self.access_ttl_seconds,
            jti: Uuid::new_v4().to_string(),
            typ: TokenKind::Access,
        };
        self.sign(&access)
    }

    fn sign(&self, claims: &TokenClaims) -> Result<String, Error> {
        let header_b64 = b64e_json(&TokenHeader::hs256())?;
        let claims_b64 = b64e_json(claims)?;
        let signing_input = format!("{header_b64}.{claims_b64}");

        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature_b64 = Base64UrlUnpadded::encode_string(mac.finalize().into_bytes().as_slice());

        Ok(format!("{signing_input}.{signature_b64}"))
    }

    /// Check signature and type, ignoring expiry.
    ///
    /// Used where expired-but-authentic claims still matter, e.g. attributing
    /// a logout audit entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the token is malformed, the signature does not
    /// verify, or the `typ` claim does not match `expected`.
    pub fn decode(&self, token: &str, expected: TokenKind) -> Result<TokenClaims, Error> {
        let mut parts = token.split('.');
        let header_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let claims_b64 = parts.next().ok_or(Error::TokenFormat)?;
        let sig_b64 = parts.next().ok_or(Error::TokenFormat)?;
        if parts.next().is_some() {
            return Err(Error::TokenFormat);
        }

        let header: TokenHeader = b64d_json(header_b64)?;
        if header.alg != "HS256" {
            return Err(Error::UnsupportedAlg(header.alg));
        }

        // Signature first; claims are untrusted until the MAC verifies.
        let signature = Base64UrlUnpadded::decode_vec(sig_b64).map_err(|_| Error::Base64)?;
        let mut mac = self.mac()?;
        mac.update(format!("{header_b64}.{claims_b64}").as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| Error::InvalidSignature)?;

        let claims: TokenClaims = b64d_json(claims_b64)?;
        if claims.typ != expected {
            return Err(Error::WrongType {
                expected,
                actual: claims.typ,
            });
        }

        Ok(claims)
    }

    /// Fully verify a token: signature, type, and expiry.
    ///
    /// # Errors
    ///
    /// As [`TokenCodec::decode`], plus `Error::Expired` once
    /// `exp <= now_unix_seconds`.
    pub fn verify(
        &self,
        token: &str,
        expected: TokenKind,
        now_unix_seconds: i64,
    ) -> Result<TokenClaims, Error> {
        let claims = self.decode(token, expected)?;
        if claims.exp <= now_unix_seconds {
            return Err(Error::Expired);
        }
        Ok(claims)
    }
}
