//! Auth core configuration.
//!
//! All knobs are passed in explicitly, notably the token signing secret,
//! which is injected here rather than read from ambient process state so
//! independently-configured instances (key rotation, multi-tenant) can
//! coexist. The secret is never logged; `Debug` on `SecretString` redacts it.

use secrecy::SecretString;
use std::time::Duration;

use crate::rate_limit::RateQuota;

/// Access tokens are short-lived and stateless.
const DEFAULT_ACCESS_TTL_SECONDS: i64 = 24 * 60 * 60;
/// Refresh tokens are long-lived and must also match a live session.
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_TOTP_ISSUER: &str = "Aula";
/// Authentication endpoints: max 10 attempts per 15-minute window.
const DEFAULT_AUTH_QUOTA: RateQuota = RateQuota {
    window: Duration::from_secs(15 * 60),
    max: 10,
};

#[derive(Clone, Debug)]
pub struct AuthConfig {
    signing_secret: SecretString,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    totp_issuer: String,
    login_quota: RateQuota,
    second_factor_quota: RateQuota,
}

impl AuthConfig {
    #[must_use]
    pub fn new(signing_secret: SecretString) -> Self {
        Self {
            signing_secret,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            totp_issuer: DEFAULT_TOTP_ISSUER.to_string(),
            login_quota: DEFAULT_AUTH_QUOTA,
            second_factor_quota: DEFAULT_AUTH_QUOTA,
        }
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_totp_issuer(mut self, issuer: String) -> Self {
        self.totp_issuer = issuer;
        self
    }

    #[must_use]
    pub fn with_login_quota(mut self, quota: RateQuota) -> Self {
        self.login_quota = quota;
        self
    }

    #[must_use]
    pub fn with_second_factor_quota(mut self, quota: RateQuota) -> Self {
        self.second_factor_quota = quota;
        self
    }

    #[must_use]
    pub const fn signing_secret(&self) -> &SecretString {
        &self.signing_secret
    }

    #[must_use]
    pub const fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl_seconds
    }

    #[must_use]
    pub const fn refresh_ttl_seconds(&self) -> i64 {
        self.refresh_ttl_seconds
    }

    #[must_use]
    pub fn totp_issuer(&self) -> &str {
        &self.totp_issuer
    }

    #[must_use]
    pub const fn login_quota(&self) -> RateQuota {
        self.login_quota
    }

    #[must_use]
    pub const fn second_factor_quota(&self) -> RateQuota {
        self.second_factor_quota
    }
}
