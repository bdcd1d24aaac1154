//! Time-based one-time passwords (RFC 6238) for the authenticator-app
//! second factor.

use std::time::{SystemTime, UNIX_EPOCH};

use totp_rs::{Algorithm, Secret, TOTP};

use crate::auth::{AuthError, AuthResult};

pub const DEFAULT_WINDOW: u8 = 2;
pub const STEP_SECS: u64 = 30;
pub const DIGITS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaEnrollment {
    /// Base32 shared secret.
    pub secret: String,
    /// `otpauth://totp/...` URI for authenticator apps.
    pub provisioning_uri: String,
}

pub trait OtpEngine: Send + Sync {
    fn generate_secret(&self, label: &str, issuer: &str) -> AuthResult<MfaEnrollment>;

    /// Renders the provisioning URI as a `data:image/png;base64,...` QR code.
    fn render_qr(&self, uri: &str) -> AuthResult<String>;

    fn verify_code_at(&self, secret: &str, code: &str, unix_time: u64) -> AuthResult<bool>;

    fn verify_code(&self, secret: &str, code: &str) -> AuthResult<bool> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| AuthError::Totp(format!("system clock before epoch: {e}")))?;
        self.verify_code_at(secret, code, now.as_secs())
    }
}

/// SHA-1, 6 digits, 30 second steps; accepts codes up to `window` steps on
/// either side of the current one.
#[derive(Debug, Clone)]
pub struct TotpEngine {
    window: u8,
}

impl TotpEngine {
    pub fn new(window: u8) -> Self {
        Self { window }
    }

    fn build(&self, secret: &str, issuer: Option<String>, label: String) -> AuthResult<TOTP> {
        let bytes = Secret::Encoded(secret.to_string())
            .to_bytes()
            .map_err(|e| AuthError::Totp(format!("secret decode: {e:?}")))?;
        TOTP::new(
            Algorithm::SHA1,
            DIGITS,
            self.window,
            STEP_SECS,
            bytes,
            issuer,
            label,
        )
        .map_err(|e| AuthError::Totp(format!("TOTP init: {e}")))
    }

    /// Code for an arbitrary instant; used by enrollment tooling and tests.
    pub fn code_at(&self, secret: &str, unix_time: u64) -> AuthResult<String> {
        Ok(self.build(secret, None, "account".into())?.generate(unix_time))
    }
}

impl Default for TotpEngine {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl OtpEngine for TotpEngine {
    fn generate_secret(&self, label: &str, issuer: &str) -> AuthResult<MfaEnrollment> {
        let secret = Secret::generate_secret().to_encoded().to_string();
        let totp = self.build(&secret, Some(issuer.to_string()), label.to_string())?;
        Ok(MfaEnrollment {
            secret,
            provisioning_uri: totp.get_url(),
        })
    }

    fn render_qr(&self, uri: &str) -> AuthResult<String> {
        let totp = TOTP::from_url(uri).map_err(|e| AuthError::Totp(format!("otpauth uri: {e}")))?;
        let png = totp
            .get_qr_base64()
            .map_err(|e| AuthError::Totp(format!("QR render: {e}")))?;
        Ok(format!("data:image/png;base64,{png}"))
    }

    fn verify_code_at(&self, secret: &str, code: &str, unix_time: u64) -> AuthResult<bool> {
        let code = code.trim();
        if code.len() != DIGITS || !code.bytes().all(|b| b.is_ascii_digit()) {
            return Ok(false);
        }
        let totp = self.build(secret, None, "account".into())?;
        Ok(totp.check(code, unix_time))
    }
}
