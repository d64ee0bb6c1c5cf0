//! # Aula Auth (Credential & Session Lifecycle Core)
//!
//! `aula-auth` is the authentication core of the Aula learning platform. It
//! issues and validates signed access/refresh tokens, persists revocable
//! sessions, manages TOTP second-factor enrollment, and throttles abusive
//! authentication attempts.
//!
//! ## Token Model
//!
//! - **Access tokens** are short-lived, stateless HS256 JWTs; validity is
//!   entirely signature + expiry, never a lookup.
//! - **Refresh tokens** are long-lived JWTs that must ALSO resolve to a live
//!   session row. Deleting the row revokes the token, which is what makes
//!   refresh tokens revocable despite being bearer tokens.
//! - Both carry an explicit `typ` claim; type confusion is always rejected.
//!
//! ## Boundaries
//!
//! The HTTP layer, page rendering, and the business-domain CRUD are external
//! collaborators. Persistence is consumed through the [`identity`],
//! [`session`], and [`audit`] adapter traits; PostgreSQL implementations and
//! in-memory test doubles ship for each. Transport-level storage of the
//! token strings (cookie attributes, max-age) is the caller's job; this
//! crate produces the strings and their intended lifetimes only.
//!
//! ## Failure Policy
//!
//! Absent identity and wrong password are indistinguishable
//! (`InvalidCredentials`); store outages surface as retryable `Unavailable`,
//! never as a credential failure; audit writes are best-effort and never
//! abort the operation that triggered them.

pub mod audit;
pub mod config;
pub mod error;
pub mod identity;
pub mod password;
pub mod rate_limit;
pub mod service;
pub mod session;
pub mod token;
pub mod totp;

pub use audit::{Actor, AuditEvent, AuditSink, MemoryAuditSink, PgAuditSink};
pub use config::AuthConfig;
pub use error::{AuthError, StoreError};
pub use identity::{
    Identity, IdentityStore, MemoryIdentityStore, PgIdentityStore, PublicIdentity, Role,
    SecondFactor,
};
pub use rate_limit::{
    FixedWindowLimiter, NoopRateLimiter, RateLimitAction, RateLimitDecision, RateLimiter,
    RateQuota, SweeperHandle,
};
pub use service::{AuthService, LoginOutcome, RefreshOutcome, TokenPair};
pub use session::{MemorySessionStore, PgSessionStore, Session, SessionStore};
pub use token::{TokenClaims, TokenCodec, TokenKind};
pub use totp::{GeneratedSecret, TotpService};

/// Seconds since the unix epoch. Saturates to 0 before the epoch.
pub(crate) fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| i64::try_from(elapsed.as_secs()).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unix_now_is_past_2023() {
        assert!(unix_now() > 1_700_000_000);
    }
}
