use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, AuthResult};
use crate::models::{Address, ProfileUpdate, UserProfile};

pub const MIN_PASSWORD_LEN: usize = 8;
/// bcrypt ignores input beyond 72 bytes.
pub const MAX_PASSWORD_BYTES: usize = 72;

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

fn email_regex() -> &'static Regex {
    EMAIL_REGEX.get_or_init(|| {
        Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("Invalid email regex")
    })
}

// ===== Requests =====
//
// Fields are optional so that a missing field surfaces as a 400 with a
// readable message instead of a body-parsing failure.

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<Address>,
    /// Defaults to `CLIENT`. Other roles need an authenticated admin.
    pub role: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub mfa_token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    pub current_password: Option<String>,
    pub new_password: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ForgotPasswordRequest {
    pub email: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest {
    pub token: Option<String>,
    pub password: Option<String>,
}

/// Body for MFA verify and disable.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MfaCodeRequest {
    pub token: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateProfileRequest {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub address: Option<Address>,
}

impl UpdateProfileRequest {
    pub fn into_update(self) -> AuthResult<ProfileUpdate> {
        let first_name = optional_name(self.first_name, "First name")?;
        let last_name = optional_name(self.last_name, "Last name")?;
        let address = self.address.unwrap_or_default();
        let update = ProfileUpdate {
            first_name,
            last_name,
            phone: trimmed(self.phone),
            street: trimmed(address.street),
            city: trimmed(address.city),
            state: trimmed(address.state),
            zip_code: trimmed(address.zip_code),
        };
        if update.is_empty() {
            return Err(AuthError::Validation("No profile fields to update".into()));
        }
        Ok(update)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StatusRequest {
    pub is_active: Option<bool>,
}

// ===== Responses =====

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AuthResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub user: UserProfile,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UsersResponse {
    pub users: Vec<UserProfile>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct MfaSetupResponse {
    pub secret: String,
    /// `data:image/png;base64,...`
    pub qr_code: String,
    pub manual_entry_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

// ===== Validation helpers =====

/// Trimmed, lowercased email; rejects anything that does not look like
/// `local@domain.tld`.
pub fn canonical_email(email: Option<&str>) -> AuthResult<String> {
    let email = email
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AuthError::Validation("Email is required".into()))?;
    if !email_regex().is_match(email) {
        return Err(AuthError::Validation("Invalid email address".into()));
    }
    Ok(email.to_lowercase())
}

pub fn validate_password<'a>(password: Option<&'a str>, field: &str) -> AuthResult<&'a str> {
    let password = password
        .filter(|value| !value.is_empty())
        .ok_or_else(|| AuthError::Validation(format!("{field} is required")))?;
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation(format!(
            "{field} must be at least {MIN_PASSWORD_LEN} characters"
        )));
    }
    if password.len() > MAX_PASSWORD_BYTES {
        return Err(AuthError::Validation(format!(
            "{field} must be at most {MAX_PASSWORD_BYTES} bytes"
        )));
    }
    Ok(password)
}

pub fn required_name(value: Option<String>, field: &str) -> AuthResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AuthError::Validation(format!("{field} is required")))
}

fn optional_name(value: Option<String>, field: &str) -> AuthResult<Option<String>> {
    match value {
        None => Ok(None),
        Some(value) => required_name(Some(value), field).map(Some),
    }
}

pub fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
