//! The auth orchestrator: login, refresh, logout, per-device revocation and
//! second-factor enrollment, composed from the injected components.
//!
//! Each operation is request-scoped and may run fully in parallel with
//! others; the only shared mutable in-process state lives inside the rate
//! limiter. Audit writes are best-effort and never fail the primary
//! operation. Session creation on login is the one persistence call that is
//! fatal on failure: a token without a recorded session could never be
//! revoked.

use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{Actor, AuditEvent, AuditSink};
use crate::config::AuthConfig;
use crate::error::AuthError;
use crate::identity::{Identity, IdentityStore, PublicIdentity, SecondFactor};
use crate::password::verify_password;
use crate::rate_limit::{RateLimitAction, RateLimiter};
use crate::session::{Session, SessionStore};
use crate::token::{TokenCodec, TokenKind};
use crate::totp::{GeneratedSecret, TotpService};
use crate::unix_now;

/// Signed token strings plus their intended lifetimes. The transport layer
/// owns cookie attributes; this core only produces the strings.
#[derive(Clone, Debug)]
pub struct TokenPair {
    pub access_token: String,
    pub access_ttl_seconds: i64,
    pub refresh_token: String,
    pub refresh_ttl_seconds: i64,
}

#[derive(Clone, Debug)]
pub struct LoginOutcome {
    pub tokens: TokenPair,
    pub identity: PublicIdentity,
    pub session_id: Uuid,
}

#[derive(Clone, Debug)]
pub struct RefreshOutcome {
    pub access_token: String,
    pub access_ttl_seconds: i64,
}

pub struct AuthService {
    config: AuthConfig,
    codec: TokenCodec,
    totp: TotpService,
    identities: Arc<dyn IdentityStore>,
    sessions: Arc<dyn SessionStore>,
    limiter: Arc<dyn RateLimiter>,
    audit: Arc<dyn AuditSink>,
}

impl AuthService {
    #[must_use]
    pub fn new(
        config: AuthConfig,
        identities: Arc<dyn IdentityStore>,
        sessions: Arc<dyn SessionStore>,
        limiter: Arc<dyn RateLimiter>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let codec = TokenCodec::new(
            config.signing_secret().clone(),
            config.access_ttl_seconds(),
            config.refresh_ttl_seconds(),
        );
        let totp = TotpService::new(config.totp_issuer().to_string());
        Self {
            config,
            codec,
            totp,
            identities,
            sessions,
            limiter,
            audit,
        }
    }

    /// Authenticate with username-or-email and password, plus a one-time
    /// code when the identity has its second factor enabled.
    ///
    /// # Errors
    ///
    /// `RateLimited`, `InvalidCredentials` (absent identity and wrong
    /// password are indistinguishable), `SecondFactorRequired`,
    /// `SecondFactorInvalid`, or `Unavailable`. Session-creation failure
    /// fails the whole login.
    pub async fn login(
        &self,
        login: &str,
        password: &str,
        second_factor_code: Option<&str>,
        address: &str,
    ) -> Result<LoginOutcome, AuthError> {
        self.gate(address, RateLimitAction::Login)?;

        let login = normalize_login(login);
        let identity = self
            .identities
            .find_by_login(&login)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        verify_password(password, &identity.password_hash)?;

        if let SecondFactor::Enabled { secret } = &identity.second_factor {
            let code = second_factor_code.ok_or(AuthError::SecondFactorRequired)?;
            if !self.totp.verify_code(code, secret) {
                return Err(AuthError::SecondFactorInvalid);
            }
        }

        let public = PublicIdentity::from(&identity);
        let now = unix_now();
        let access_token = self
            .codec
            .issue(&public, TokenKind::Access, now)
            .map_err(issuance_failure)?;
        let refresh_token = self
            .codec
            .issue(&public, TokenKind::Refresh, now)
            .map_err(issuance_failure)?;

        // Fatal on failure: an unrecorded session cannot be revoked later.
        let session = self
            .sessions
            .create(
                identity.id,
                &refresh_token,
                address,
                self.config.refresh_ttl_seconds(),
            )
            .await?;

        self.audit_best_effort(AuditEvent {
            action: "LOGIN",
            resource: "session",
            resource_id: Some(session.id.to_string()),
            actor: Actor::Identity(identity.id),
            meta: None,
            ip: Some(address.to_string()),
        })
        .await;
        info!(identity = %identity.id, session = %session.id, "login succeeded");

        Ok(LoginOutcome {
            tokens: TokenPair {
                access_token,
                access_ttl_seconds: self.config.access_ttl_seconds(),
                refresh_token,
                refresh_ttl_seconds: self.config.refresh_ttl_seconds(),
            },
            identity: public,
            session_id: session.id,
        })
    }

    /// Mint a new access token from a refresh token.
    ///
    /// The refresh token must carry a valid signature, be of refresh type,
    /// be unexpired, and resolve to a live session row. The refresh token
    /// itself is reused until its own expiry.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for any token or session defect, `Unavailable` for
    /// store failures.
    pub async fn refresh(&self, refresh_token: &str) -> Result<RefreshOutcome, AuthError> {
        let now = unix_now();
        let claims = self
            .codec
            .verify(refresh_token, TokenKind::Refresh, now)
            .map_err(|_| AuthError::Unauthenticated)?;

        let session = self
            .sessions
            .find_by_refresh_token(refresh_token)
            .await?
            .ok_or(AuthError::Unauthenticated)?;

        if session.expired_at(now) {
            // Lazy cleanup of the dead row; the outcome is the same either way.
            if let Err(err) = self.sessions.delete_by_id(session.id).await {
                warn!(session = %session.id, "failed to delete expired session: {err}");
            }
            return Err(AuthError::Unauthenticated);
        }

        let access_token = self
            .codec
            .reissue_access(&claims, now)
            .map_err(issuance_failure)?;

        Ok(RefreshOutcome {
            access_token,
            access_ttl_seconds: self.config.access_ttl_seconds(),
        })
    }

    /// End a session. Idempotent: a missing or already-deleted session is
    /// not an error, and an undecodable access token only costs the audit
    /// attribution.
    pub async fn logout(&self, access_token: Option<&str>, refresh_token: Option<&str>) {
        let actor = access_token
            .and_then(|token| self.codec.decode(token, TokenKind::Access).ok())
            .map_or(Actor::System, |claims| Actor::Identity(claims.sub));

        if let Some(token) = refresh_token {
            if let Err(err) = self.sessions.delete_by_refresh_token(token).await {
                warn!("failed to delete session on logout: {err}");
            }
        }

        self.audit_best_effort(AuditEvent {
            action: "LOGOUT",
            resource: "session",
            resource_id: None,
            actor,
            meta: None,
            ip: None,
        })
        .await;
    }

    /// Sessions currently recorded for an identity, for device overviews.
    ///
    /// # Errors
    ///
    /// `Unavailable` on store failure.
    pub async fn list_sessions(&self, identity_id: Uuid) -> Result<Vec<Session>, AuthError> {
        Ok(self.sessions.list_by_identity(identity_id).await?)
    }

    /// Revoke one of the identity's own sessions (per-device sign-out).
    ///
    /// # Errors
    ///
    /// `Unauthenticated` if the session does not exist or belongs to another
    /// identity.
    pub async fn revoke_session(
        &self,
        identity_id: Uuid,
        session_id: Uuid,
    ) -> Result<(), AuthError> {
        let session = self
            .sessions
            .find_by_id(session_id)
            .await?
            .ok_or(AuthError::Unauthenticated)?;
        if session.identity_id != identity_id {
            return Err(AuthError::Unauthenticated);
        }
        self.sessions.delete_by_id(session_id).await?;

        self.audit_best_effort(AuditEvent {
            action: "SESSION_REVOKE",
            resource: "session",
            resource_id: Some(session_id.to_string()),
            actor: Actor::Identity(identity_id),
            meta: None,
            ip: None,
        })
        .await;
        Ok(())
    }

    /// Begin second-factor enrollment: generate a secret and provisioning
    /// URI and mark the enrollment pending. Re-running setup while pending
    /// regenerates the secret.
    ///
    /// # Errors
    ///
    /// `Conflict` if the second factor is already enabled.
    pub async fn second_factor_setup(
        &self,
        identity_id: Uuid,
    ) -> Result<GeneratedSecret, AuthError> {
        let identity = self.require_identity(identity_id).await?;
        if identity.second_factor.is_enabled() {
            return Err(AuthError::Conflict("second factor already enabled"));
        }

        let generated = self
            .totp
            .generate_secret(&identity.email)
            .map_err(AuthError::Unavailable)?;
        self.identities
            .set_second_factor_pending(identity_id, &generated.secret_base32)
            .await?;

        self.audit_best_effort(AuditEvent {
            action: "2FA_SETUP",
            resource: "second_factor",
            resource_id: None,
            actor: Actor::Identity(identity_id),
            meta: None,
            ip: None,
        })
        .await;
        Ok(generated)
    }

    /// Confirm a pending enrollment with one correct code.
    ///
    /// # Errors
    ///
    /// `RateLimited`, `SecondFactorInvalid` on a wrong code (enrollment
    /// stays pending), `Conflict` when setup was never started.
    pub async fn second_factor_confirm(
        &self,
        identity_id: Uuid,
        code: &str,
    ) -> Result<(), AuthError> {
        self.gate(&identity_id.to_string(), RateLimitAction::SecondFactor)?;

        let identity = self.require_identity(identity_id).await?;
        match &identity.second_factor {
            SecondFactor::Disabled => Err(AuthError::Conflict("second factor setup not started")),
            // A single correct code completes enrollment; confirming again
            // is a no-op.
            SecondFactor::Enabled { .. } => Ok(()),
            SecondFactor::Pending { secret } => {
                if !self.totp.verify_code(code, secret) {
                    return Err(AuthError::SecondFactorInvalid);
                }
                self.identities.enable_second_factor(identity_id).await?;
                self.audit_best_effort(AuditEvent {
                    action: "2FA_ENABLE",
                    resource: "second_factor",
                    resource_id: None,
                    actor: Actor::Identity(identity_id),
                    meta: None,
                    ip: None,
                })
                .await;
                info!(identity = %identity_id, "second factor enabled");
                Ok(())
            }
        }
    }

    /// Disable the second factor, discarding the secret. Valid from both
    /// pending and enabled states; a no-op when already disabled.
    ///
    /// # Errors
    ///
    /// `Unauthenticated` for an unknown identity, `Unavailable` on store
    /// failure.
    pub async fn second_factor_disable(&self, identity_id: Uuid) -> Result<(), AuthError> {
        self.require_identity(identity_id).await?;
        self.identities.disable_second_factor(identity_id).await?;

        self.audit_best_effort(AuditEvent {
            action: "2FA_DISABLE",
            resource: "second_factor",
            resource_id: None,
            actor: Actor::Identity(identity_id),
            meta: None,
            ip: None,
        })
        .await;
        Ok(())
    }

    fn gate(&self, caller: &str, action: RateLimitAction) -> Result<(), AuthError> {
        let decision = self.limiter.check(caller, action);
        if decision.allowed {
            Ok(())
        } else {
            Err(AuthError::RateLimited {
                retry_after: decision.retry_after.unwrap_or_default(),
            })
        }
    }

    async fn require_identity(&self, identity_id: Uuid) -> Result<Identity, AuthError> {
        self.identities
            .find_by_id(identity_id)
            .await?
            .ok_or(AuthError::Unauthenticated)
    }

    async fn audit_best_effort(&self, event: AuditEvent) {
        let action = event.action;
        if let Err(err) = self.audit.record(event).await {
            warn!(action, "audit write failed: {err}");
        }
    }
}

/// Normalize a username-or-email for lookup.
fn normalize_login(login: &str) -> String {
    login.trim().to_lowercase()
}

fn issuance_failure(err: crate::token::Error) -> AuthError {
    AuthError::Unavailable(anyhow::anyhow!("token issuance failed: {err}"))
}
