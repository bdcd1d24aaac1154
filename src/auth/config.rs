use std::str::FromStr;

use crate::auth::{AuthError, AuthResult};

const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;
const DEFAULT_RESET_TOKEN_TTL_SECS: i64 = 60 * 60;
const DEFAULT_BCRYPT_COST: u32 = 12;
const MIN_BCRYPT_COST: u32 = 4;
const MAX_BCRYPT_COST: u32 = 31;
const MAX_ACCESS_TOKEN_TTL_SECS: i64 = 30 * 24 * 60 * 60;
const MAX_RESET_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Authentication configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_secs: i64,
    pub bcrypt_cost: u32,
    pub mfa_issuer: String,
    pub reset_token_ttl_secs: i64,
    pub reset_url_base: String,
    pub token_cookie_name: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    /// Include internal error detail in responses; never on in production.
    pub expose_error_details: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            issuer: "insurance-portal".into(),
            audience: "portal-api".into(),
            access_token_ttl_secs: DEFAULT_ACCESS_TOKEN_TTL_SECS,
            bcrypt_cost: DEFAULT_BCRYPT_COST,
            mfa_issuer: "Insurance Portal".into(),
            reset_token_ttl_secs: DEFAULT_RESET_TOKEN_TTL_SECS,
            reset_url_base: "http://localhost:3000/reset-password".into(),
            token_cookie_name: "token".into(),
            cookie_domain: None,
            cookie_secure: true,
            expose_error_details: false,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let defaults = Self::default();

        let jwt_secret = std::env::var("PORTAL_JWT_SECRET")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .ok_or_else(|| AuthError::Config("PORTAL_JWT_SECRET is required".into()))?;
        let issuer = std::env::var("PORTAL_JWT_ISSUER").unwrap_or(defaults.issuer);
        let audience = std::env::var("PORTAL_JWT_AUDIENCE").unwrap_or(defaults.audience);
        let access_token_ttl_secs = match std::env::var("PORTAL_JWT_EXPIRES_IN") {
            Ok(value) => parse_ttl(&value).ok_or_else(|| {
                AuthError::Config(format!("PORTAL_JWT_EXPIRES_IN has invalid value '{value}'"))
            })?,
            Err(_) => defaults.access_token_ttl_secs,
        };
        let bcrypt_cost = parse_setting(
            "PORTAL_BCRYPT_COST",
            std::env::var("PORTAL_BCRYPT_COST").ok(),
            defaults.bcrypt_cost,
        )?;
        let mfa_issuer = std::env::var("PORTAL_MFA_ISSUER").unwrap_or(defaults.mfa_issuer);
        let reset_token_ttl_secs = parse_setting(
            "PORTAL_RESET_TOKEN_TTL_SECS",
            std::env::var("PORTAL_RESET_TOKEN_TTL_SECS").ok(),
            defaults.reset_token_ttl_secs,
        )?;
        let reset_url_base =
            std::env::var("PORTAL_RESET_URL_BASE").unwrap_or(defaults.reset_url_base);
        let token_cookie_name =
            std::env::var("PORTAL_TOKEN_COOKIE_NAME").unwrap_or(defaults.token_cookie_name);
        let cookie_domain = std::env::var("PORTAL_COOKIE_DOMAIN").ok();
        let cookie_secure = std::env::var("PORTAL_COOKIE_SECURE")
            .map(|value| is_truthy(&value))
            .unwrap_or(true);
        let expose_error_details = std::env::var("PORTAL_ENV")
            .map(|value| value.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        let config = Self {
            jwt_secret,
            issuer,
            audience,
            access_token_ttl_secs,
            bcrypt_cost,
            mfa_issuer,
            reset_token_ttl_secs,
            reset_url_base,
            token_cookie_name,
            cookie_domain,
            cookie_secure,
            expose_error_details,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AuthResult<()> {
        if self.jwt_secret.trim().is_empty() {
            return Err(AuthError::Config("jwt signing secret is empty".into()));
        }
        if !(1..=MAX_ACCESS_TOKEN_TTL_SECS).contains(&self.access_token_ttl_secs) {
            return Err(AuthError::Config(format!(
                "access token ttl {}s outside 1..={MAX_ACCESS_TOKEN_TTL_SECS}",
                self.access_token_ttl_secs
            )));
        }
        if !(1..=MAX_RESET_TOKEN_TTL_SECS).contains(&self.reset_token_ttl_secs) {
            return Err(AuthError::Config(format!(
                "reset token ttl {}s outside 1..={MAX_RESET_TOKEN_TTL_SECS}",
                self.reset_token_ttl_secs
            )));
        }
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&self.bcrypt_cost) {
            return Err(AuthError::Config(format!(
                "bcrypt cost {} outside {MIN_BCRYPT_COST}..={MAX_BCRYPT_COST}",
                self.bcrypt_cost
            )));
        }
        if self.mfa_issuer.contains(':') {
            return Err(AuthError::Config("MFA issuer must not contain ':'".into()));
        }
        Ok(())
    }
}

/// Parses `45s`, `30m`, `24h`, `7d` or a bare number of seconds.
pub fn parse_ttl(value: &str) -> Option<i64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    let (digits, multiplier) = match value.char_indices().last()? {
        (idx, 's') => (&value[..idx], 1),
        (idx, 'm') => (&value[..idx], 60),
        (idx, 'h') => (&value[..idx], 60 * 60),
        (idx, 'd') => (&value[..idx], 24 * 60 * 60),
        _ => (value, 1),
    };
    let amount = digits.trim().parse::<i64>().ok()?;
    if amount <= 0 {
        return None;
    }
    amount.checked_mul(multiplier)
}

/// Unset or blank falls back to `default`; anything unparsable is an error.
fn parse_setting<T: FromStr>(name: &str, raw: Option<String>, default: T) -> AuthResult<T> {
    match raw.as_deref().map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(default),
        Some(value) => value
            .parse::<T>()
            .map_err(|_| AuthError::Config(format!("{name} has invalid value '{value}'"))),
    }
}

fn is_truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "TRUE" | "yes" | "on")
}
