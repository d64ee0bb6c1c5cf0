//! Time-based one-time-password second factor.
//!
//! Standard 30-second step, 6-digit codes, 160-bit secrets. Verification
//! tolerates exactly ±1 step of clock drift and never more, to bound the
//! brute-force window. Enrollment state transitions live in the orchestrator;
//! this module only generates secrets and checks codes.

use anyhow::{Result, anyhow};
use totp_rs::{Algorithm, Secret, TOTP};

const TOTP_DIGITS: usize = 6;
const TOTP_SKEW: u8 = 1;
const TOTP_STEP: u64 = 30;

/// Fresh shared secret plus the `otpauth://` URI for authenticator apps.
#[derive(Clone, Debug)]
pub struct GeneratedSecret {
    pub secret_base32: String,
    pub provisioning_uri: String,
}

#[derive(Clone)]
pub struct TotpService {
    issuer: String,
}

impl TotpService {
    #[must_use]
    pub fn new(issuer: String) -> Self {
        Self { issuer }
    }

    fn totp_for(&self, secret_bytes: Vec<u8>, account_label: &str) -> Result<TOTP> {
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            secret_bytes,
            Some(self.issuer.clone()),
            account_label.to_string(),
        )
        .map_err(|e| anyhow!("TOTP init error: {e}"))
    }

    /// Generate a fresh random shared secret and its provisioning URI.
    ///
    /// # Errors
    ///
    /// Returns an error if secret generation or URI construction fails.
    pub fn generate_secret(&self, account_label: &str) -> Result<GeneratedSecret> {
        let secret = Secret::generate_secret();
        let secret_bytes = secret
            .to_bytes()
            .map_err(|e| anyhow!("secret generation error: {e}"))?;
        let totp = self.totp_for(secret_bytes, account_label)?;
        Ok(GeneratedSecret {
            secret_base32: totp.get_secret_base32(),
            provisioning_uri: totp.get_url(),
        })
    }

    /// Check a code against the current time step, ±1 step.
    #[must_use]
    pub fn verify_code(&self, code: &str, secret_base32: &str) -> bool {
        match self.totp_from_base32(secret_base32) {
            Ok(totp) => totp.check_current(code).unwrap_or(false),
            Err(_) => false,
        }
    }

    /// Check a code at a fixed unix timestamp. Exists so skew behavior is
    /// testable without a real clock.
    #[must_use]
    pub fn verify_code_at(&self, code: &str, secret_base32: &str, unix_seconds: u64) -> bool {
        self.totp_from_base32(secret_base32)
            .is_ok_and(|totp| totp.check(code, unix_seconds))
    }

    fn totp_from_base32(&self, secret_base32: &str) -> Result<TOTP> {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .map_err(|e| anyhow!("invalid secret encoding: {e}"))?;
        // Label is irrelevant for verification.
        self.totp_for(secret_bytes, "verify")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: u64 = 1_700_000_000;

    fn service() -> TotpService {
        TotpService::new("Aula".to_string())
    }

    fn code_at(secret_base32: &str, unix_seconds: u64) -> String {
        let secret_bytes = Secret::Encoded(secret_base32.to_string())
            .to_bytes()
            .unwrap();
        TOTP::new(
            Algorithm::SHA1,
            TOTP_DIGITS,
            TOTP_SKEW,
            TOTP_STEP,
            secret_bytes,
            Some("Aula".to_string()),
            "test".to_string(),
        )
        .unwrap()
        .generate(unix_seconds)
    }

    #[test]
    fn secret_has_at_least_160_bits() {
        let generated = service().generate_secret("ada@example.com").unwrap();
        let bytes = Secret::Encoded(generated.secret_base32).to_bytes().unwrap();
        assert!(bytes.len() * 8 >= 160);
    }

    #[test]
    fn provisioning_uri_is_standard_otpauth() {
        let generated = service().generate_secret("ada@example.com").unwrap();
        assert!(generated.provisioning_uri.starts_with("otpauth://totp/"));
        assert!(generated.provisioning_uri.contains("issuer=Aula"));
        assert!(generated.provisioning_uri.contains("secret="));
    }

    #[test]
    fn regenerating_produces_a_different_secret() {
        let service = service();
        let first = service.generate_secret("ada@example.com").unwrap();
        let second = service.generate_secret("ada@example.com").unwrap();
        assert_ne!(first.secret_base32, second.secret_base32);
    }

    #[test]
    fn accepts_current_and_adjacent_steps_only() {
        let service = service();
        let secret = service.generate_secret("ada@example.com").unwrap().secret_base32;

        // Current step and ±1 step pass.
        assert!(service.verify_code_at(&code_at(&secret, NOW), &secret, NOW));
        assert!(service.verify_code_at(&code_at(&secret, NOW - TOTP_STEP), &secret, NOW));
        assert!(service.verify_code_at(&code_at(&secret, NOW + TOTP_STEP), &secret, NOW));

        // ≥2 steps away is out of the window.
        assert!(!service.verify_code_at(&code_at(&secret, NOW - 2 * TOTP_STEP), &secret, NOW));
        assert!(!service.verify_code_at(&code_at(&secret, NOW + 2 * TOTP_STEP), &secret, NOW));
    }

    #[test]
    fn rejects_wrong_code_and_bad_secret() {
        let service = service();
        let secret = service.generate_secret("ada@example.com").unwrap().secret_base32;

        // Flip one digit of the valid code.
        let valid = code_at(&secret, NOW);
        let wrong: String = valid
            .char_indices()
            .map(|(i, c)| if i == 0 { if c == '9' { '0' } else { '9' } } else { c })
            .collect();
        assert!(!service.verify_code_at(&wrong, &secret, NOW));

        assert!(!service.verify_code("123456", "not base32 !!!"));
    }
}
