use rocket::http::Status;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Account is deactivated")]
    AccountDeactivated,
    #[error("MFA token required")]
    MfaRequired,
    #[error("Invalid MFA token")]
    InvalidMfaCode,
    #[error("Access token required")]
    AccessTokenRequired,
    #[error("Invalid token format")]
    InvalidTokenFormat,
    #[error("Token expired")]
    TokenExpired,
    #[error("Invalid token")]
    TokenInvalid,
    #[error("User not found")]
    PrincipalNotFound,
    #[error("Account disabled")]
    AccountDisabled,
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Insufficient permissions")]
    Forbidden,
    #[error("Resource ID required")]
    ResourceIdRequired,
    #[error("Access denied")]
    OwnershipMismatch,
    #[error("User not found")]
    UserNotFound,
    #[error("User already exists with this email")]
    EmailTaken,
    #[error("Current password is incorrect")]
    WrongCurrentPassword,
    #[error("Invalid reset token")]
    ResetTokenInvalid,
    #[error("Reset token has expired")]
    ResetTokenExpired,
    #[error("Invalid token type")]
    ResetTokenWrongPurpose,
    #[error("Reset token has already been used")]
    ResetTokenUsed,
    #[error("MFA token is required")]
    MfaCodeMissing,
    #[error("MFA not set up")]
    MfaNotSetUp,
    #[error("MFA is not enabled")]
    MfaNotEnabled,
    #[error("MFA is already enabled, disable it first")]
    MfaAlreadyEnabled,
    #[error("Invalid MFA token")]
    MfaVerificationFailed,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("jwt error: {0}")]
    Jwt(jsonwebtoken::errors::Error),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
    #[error("totp error: {0}")]
    Totp(String),
    #[error("unexpected error: {0}")]
    Other(String),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::Validation(_)
            | AuthError::ResourceIdRequired
            | AuthError::WrongCurrentPassword
            | AuthError::ResetTokenInvalid
            | AuthError::ResetTokenExpired
            | AuthError::ResetTokenWrongPurpose
            | AuthError::ResetTokenUsed
            | AuthError::MfaCodeMissing
            | AuthError::MfaNotSetUp
            | AuthError::MfaNotEnabled
            | AuthError::MfaAlreadyEnabled
            | AuthError::MfaVerificationFailed => Status::BadRequest,
            AuthError::InvalidCredentials
            | AuthError::MfaRequired
            | AuthError::InvalidMfaCode
            | AuthError::AccessTokenRequired
            | AuthError::InvalidTokenFormat
            | AuthError::TokenExpired
            | AuthError::TokenInvalid
            | AuthError::PrincipalNotFound
            | AuthError::AccountDisabled
            | AuthError::Unauthenticated => Status::Unauthorized,
            AuthError::AccountDeactivated
            | AuthError::Forbidden
            | AuthError::OwnershipMismatch => Status::Forbidden,
            AuthError::UserNotFound => Status::NotFound,
            AuthError::EmailTaken => Status::Conflict,
            AuthError::Config(_)
            | AuthError::Sqlx(_)
            | AuthError::Jwt(_)
            | AuthError::PasswordHash(_)
            | AuthError::Totp(_)
            | AuthError::Other(_) => Status::InternalServerError,
        }
    }

    pub fn is_internal(&self) -> bool {
        self.status().code >= 500
    }

    /// Message safe to hand to clients. Server-side failures collapse to a
    /// generic line; the detail only goes to the log.
    pub fn public_message(&self) -> String {
        match self {
            AuthError::Config(_) => "Server configuration error".to_string(),
            err if err.is_internal() => "Internal server error".to_string(),
            err => err.to_string(),
        }
    }

    pub fn mfa_required(&self) -> bool {
        matches!(self, AuthError::MfaRequired)
    }
}

impl From<bcrypt::BcryptError> for AuthError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        AuthError::Other(format!("blocking task failed: {err}"))
    }
}
