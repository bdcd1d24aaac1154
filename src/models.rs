use std::fmt;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ===== Roles =====

#[derive(
    Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    #[default]
    Client,
    Admin,
    SuperAdmin,
    ClaimsAdjuster,
    BillingSpecialist,
}

/// Roles that bypass ownership checks.
pub const ADMIN_TIER: &[Role] = &[Role::Admin, Role::SuperAdmin];

/// Internal staff roles allowed to browse accounts.
pub const STAFF: &[Role] = &[
    Role::Admin,
    Role::SuperAdmin,
    Role::ClaimsAdjuster,
    Role::BillingSpecialist,
];

impl Role {
    pub const ALL: [Role; 5] = [
        Role::Client,
        Role::Admin,
        Role::SuperAdmin,
        Role::ClaimsAdjuster,
        Role::BillingSpecialist,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "CLIENT",
            Role::Admin => "ADMIN",
            Role::SuperAdmin => "SUPER_ADMIN",
            Role::ClaimsAdjuster => "CLAIMS_ADJUSTER",
            Role::BillingSpecialist => "BILLING_SPECIALIST",
        }
    }

    /// Case-insensitive parse; `-` and `_` are interchangeable.
    pub fn parse(value: &str) -> Option<Self> {
        let canonical = value.trim().to_ascii_uppercase().replace('-', "_");
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == canonical)
    }

    pub fn is_admin_tier(&self) -> bool {
        ADMIN_TIER.contains(self)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ===== MFA =====

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MfaMethod {
    #[default]
    Authenticator,
    Sms,
}

impl MfaMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            MfaMethod::Authenticator => "AUTHENTICATOR",
            MfaMethod::Sms => "SMS",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "AUTHENTICATOR" => Some(MfaMethod::Authenticator),
            "SMS" => Some(MfaMethod::Sms),
            _ => None,
        }
    }
}

/// Second-factor settings, one per user. The secret never leaves the server
/// except in the setup response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MfaSettings {
    pub secret: String,
    pub method: MfaMethod,
    pub is_enabled: bool,
}

// ===== Users =====

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub street: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zip_code: Option<String>,
}

/// Stored account record. Deliberately not `Serialize`: responses go through
/// [`UserProfile`].
#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub address: Address,
    pub role: Role,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub mfa: Option<MfaSettings>,
}

impl User {
    pub fn mfa_enabled(&self) -> bool {
        self.mfa.as_ref().is_some_and(|mfa| mfa.is_enabled)
    }

    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            email: self.email.clone(),
            first_name: self.first_name.clone(),
            last_name: self.last_name.clone(),
            phone: self.phone.clone(),
            address: self.address.clone(),
            role: self.role,
            is_active: self.is_active,
            mfa_enabled: self.mfa_enabled(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Public view of a user account.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[schemars(with = "String")]
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Address,
    pub role: Role,
    pub is_active: bool,
    pub mfa_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub address: Address,
    pub role: Role,
}

/// Partial profile update; `None` leaves the column unchanged.
#[derive(Debug, Clone, Default)]
pub struct ProfileUpdate {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.phone.is_none()
            && self.street.is_none()
            && self.city.is_none()
            && self.state.is_none()
            && self.zip_code.is_none()
    }

    pub fn apply(&self, user: &mut User) {
        if let Some(first_name) = &self.first_name {
            user.first_name = first_name.clone();
        }
        if let Some(last_name) = &self.last_name {
            user.last_name = last_name.clone();
        }
        if let Some(phone) = &self.phone {
            user.phone = Some(phone.clone());
        }
        if let Some(street) = &self.street {
            user.address.street = Some(street.clone());
        }
        if let Some(city) = &self.city {
            user.address.city = Some(city.clone());
        }
        if let Some(state) = &self.state {
            user.address.state = Some(state.clone());
        }
        if let Some(zip_code) = &self.zip_code {
            user.address.zip_code = Some(zip_code.clone());
        }
    }
}

// ===== Principal =====

/// Identity attached to a request once its bearer token has been verified
/// and the account loaded.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    #[schemars(with = "String")]
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin_tier(&self) -> bool {
        self.role.is_admin_tier()
    }
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_parsing_ignores_case_and_separator() {
        assert_eq!(Role::parse("client"), Some(Role::Client));
        assert_eq!(Role::parse("Super_Admin"), Some(Role::SuperAdmin));
        assert_eq!(Role::parse("claims-adjuster"), Some(Role::ClaimsAdjuster));
        assert_eq!(Role::parse("owner"), None);
    }

    #[test]
    fn role_serializes_in_screaming_case() {
        let json = serde_json::to_string(&Role::BillingSpecialist).expect("serialize");
        assert_eq!(json, "\"BILLING_SPECIALIST\"");
    }

    #[test]
    fn profile_never_carries_password_hash() {
        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            email: "a@x.com".into(),
            password_hash: "$2b$12$abcdefghijklmnopqrstuv".into(),
            first_name: "A".into(),
            last_name: "B".into(),
            phone: None,
            address: Address::default(),
            role: Role::Client,
            is_active: true,
            created_at: now,
            updated_at: now,
            mfa: Some(MfaSettings {
                secret: "JBSWY3DPEHPK3PXP".into(),
                method: MfaMethod::Authenticator,
                is_enabled: true,
            }),
        };

        let json = serde_json::to_value(user.profile()).expect("serialize");
        let object = json.as_object().expect("object");
        assert!(!object.contains_key("passwordHash"));
        assert!(!object.contains_key("password"));
        assert!(!json.to_string().contains("JBSWY3DPEHPK3PXP"));
        assert_eq!(object["mfaEnabled"], serde_json::Value::Bool(true));
    }
}
