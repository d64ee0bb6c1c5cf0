//! Failure taxonomy for the auth core.
//!
//! Every caller-visible failure maps to a stable machine-readable code via
//! [`AuthError::code`]. Credential failures never reveal which check failed;
//! operational failures (rate limit, store outage) are specific and
//! actionable.

use std::time::Duration;
use thiserror::Error;

/// Caller-visible failures of the auth protocols.
#[derive(Debug, Error)]
pub enum AuthError {
    /// Bad username/password. Never distinguishes "no such user" from
    /// "wrong password".
    #[error("invalid credentials")]
    InvalidCredentials,

    /// The identity has a second factor enabled and no code was supplied.
    #[error("second factor code required")]
    SecondFactorRequired,

    /// The supplied second factor code did not match.
    #[error("second factor code invalid")]
    SecondFactorInvalid,

    /// Missing, expired, forged, or revoked token.
    #[error("not authenticated")]
    Unauthenticated,

    /// Too many attempts within the current window.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// Downstream store failure or timeout. Retryable by the caller; never
    /// conflated with credential failures.
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),

    /// Operation conflicts with current state (e.g. second factor setup
    /// while already enabled).
    #[error("conflict: {0}")]
    Conflict(&'static str),
}

impl AuthError {
    /// Stable machine-readable code for transport layers.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "invalid_credentials",
            Self::SecondFactorRequired => "second_factor_required",
            Self::SecondFactorInvalid => "second_factor_invalid",
            Self::Unauthenticated => "unauthenticated",
            Self::RateLimited { .. } => "rate_limited",
            Self::Unavailable(_) => "unavailable",
            Self::Conflict(_) => "conflict",
        }
    }

    /// Whether the caller may retry the same request unchanged.
    #[must_use]
    pub const fn retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited { .. })
    }
}

/// Failures surfaced by storage adapters.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Uniqueness violation on insert.
    #[error("conflicting record")]
    Conflict,

    /// The store could not be reached or timed out.
    #[error(transparent)]
    Unavailable(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict => Self::Conflict("conflicting record"),
            StoreError::Unavailable(source) => Self::Unavailable(source),
        }
    }
}
