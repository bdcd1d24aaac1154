use std::sync::Arc;

use chrono::{Duration, Utc};
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::auth::jwt::{JwtService, SignedAccessToken, TokenCodec};
use crate::auth::mfa::{OtpEngine, TotpEngine};
use crate::auth::notifier::{LogNotifier, ResetLink, ResetNotifier};
use crate::auth::passwords::{PasswordHasher, PasswordService};
use crate::auth::reset_store::{self, PASSWORD_RESET_PURPOSE, ParsedResetToken, ResetTokenStore};
use crate::auth::responses::{
    ChangePasswordRequest, LoginRequest, RegisterRequest, ResetPasswordRequest, canonical_email,
    required_name, trimmed, validate_password,
};
use crate::auth::store::UserStore;
use crate::auth::{AuthConfig, AuthError, AuthResult};
use crate::models::{MfaMethod, NewUser, Principal, Role, User, UserProfile};

/// Plaintext behind the hash verified when a login names an unknown email.
const TIMING_PASSWORD: &str = "portal-timing-equalizer";

/// Token plus the public view of the account it was issued for.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: SignedAccessToken,
    pub user: UserProfile,
}

#[derive(Debug, Clone)]
pub struct MfaSetup {
    pub secret: String,
    pub qr_code: String,
    pub manual_entry_key: String,
}

/// Orchestrates every credential flow on top of the store, hasher, token
/// codec and OTP engine. Cheap to share behind an `Arc`.
pub struct AuthService {
    config: AuthConfig,
    users: Arc<dyn UserStore>,
    reset_tokens: Arc<dyn ResetTokenStore>,
    hasher: Arc<dyn PasswordHasher>,
    tokens: Arc<dyn TokenCodec>,
    otp: Arc<dyn OtpEngine>,
    notifier: Arc<dyn ResetNotifier>,
    timing_hash: OnceCell<String>,
}

impl AuthService {
    pub fn new(
        config: AuthConfig,
        users: Arc<dyn UserStore>,
        reset_tokens: Arc<dyn ResetTokenStore>,
    ) -> AuthResult<Self> {
        config.validate()?;
        let tokens = JwtService::from_config(&config)?;
        let hasher = PasswordService::new(config.bcrypt_cost);
        let notifier = LogNotifier::new(config.expose_error_details);

        Ok(Self {
            config,
            users,
            reset_tokens,
            hasher: Arc::new(hasher),
            tokens: Arc::new(tokens),
            otp: Arc::new(TotpEngine::default()),
            notifier: Arc::new(notifier),
            timing_hash: OnceCell::new(),
        })
    }

    pub fn with_hasher(mut self, hasher: Arc<dyn PasswordHasher>) -> Self {
        self.hasher = hasher;
        self.timing_hash = OnceCell::new();
        self
    }

    pub fn with_token_codec(mut self, tokens: Arc<dyn TokenCodec>) -> Self {
        self.tokens = tokens;
        self
    }

    pub fn with_otp_engine(mut self, otp: Arc<dyn OtpEngine>) -> Self {
        self.otp = otp;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn ResetNotifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn users(&self) -> &dyn UserStore {
        self.users.as_ref()
    }

    pub fn tokens(&self) -> &dyn TokenCodec {
        self.tokens.as_ref()
    }

    pub async fn register(
        &self,
        request: RegisterRequest,
        actor: Option<&Principal>,
    ) -> AuthResult<AuthSession> {
        let email = canonical_email(request.email.as_deref())?;
        let password = validate_password(request.password.as_deref(), "Password")?;
        let first_name = required_name(request.first_name, "First name")?;
        let last_name = required_name(request.last_name, "Last name")?;
        let role = match request.role.as_deref().map(str::trim) {
            None | Some("") => Role::Client,
            Some(value) => Role::parse(value)
                .ok_or_else(|| AuthError::Validation(format!("Unknown role '{value}'")))?,
        };
        authorize_role_grant(role, actor)?;

        if self.users.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        let password_hash = self.hasher.hash_password(password).await?;
        let mut address = request.address.unwrap_or_default();
        address.street = trimmed(address.street);
        address.city = trimmed(address.city);
        address.state = trimmed(address.state);
        address.zip_code = trimmed(address.zip_code);

        let user = self
            .users
            .create(NewUser {
                email,
                password_hash,
                first_name,
                last_name,
                phone: trimmed(request.phone),
                address,
                role,
            })
            .await?;

        match actor {
            Some(actor) => log::info!("user {} ({}) registered by {}", user.id, role, actor.id),
            None => log::info!("user {} registered", user.id),
        }

        let token = self.tokens.issue_default(user.id, user.role)?;
        Ok(AuthSession {
            token,
            user: user.profile(),
        })
    }

    pub async fn login(&self, request: LoginRequest) -> AuthResult<AuthSession> {
        let email = request
            .email
            .as_deref()
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());
        let password = request.password.as_deref().filter(|value| !value.is_empty());
        let (Some(email), Some(password)) = (email, password) else {
            return Err(AuthError::Validation(
                "Email and password are required".into(),
            ));
        };

        let Some(user) = self.users.find_by_email(&email).await? else {
            self.verify_against_timing_hash(password).await;
            return Err(AuthError::InvalidCredentials);
        };

        if !self
            .hasher
            .verify_password(password, &user.password_hash)
            .await?
        {
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            return Err(AuthError::AccountDeactivated);
        }

        if let Some(mfa) = user.mfa.as_ref().filter(|mfa| mfa.is_enabled) {
            let code = request
                .mfa_token
                .as_deref()
                .map(str::trim)
                .filter(|code| !code.is_empty());
            let Some(code) = code else {
                return Err(AuthError::MfaRequired);
            };
            if !self.otp.verify_code(&mfa.secret, code)? {
                return Err(AuthError::InvalidMfaCode);
            }
        }

        let token = self.tokens.issue_default(user.id, user.role)?;
        log::info!("user {} logged in", user.id);
        Ok(AuthSession {
            token,
            user: user.profile(),
        })
    }

    /// Resolves a bearer token to the principal it names, re-checking the
    /// account on every call.
    pub async fn authenticate(&self, token: &str) -> AuthResult<Principal> {
        let verified = self.tokens.verify(token)?;
        let user = self
            .users
            .find_by_id(verified.subject)
            .await?
            .ok_or(AuthError::PrincipalNotFound)?;

        if !user.is_active {
            return Err(AuthError::AccountDisabled);
        }
        if user.role != verified.role {
            return Err(AuthError::TokenInvalid);
        }

        Ok(Principal::from(&user))
    }

    pub fn refresh(&self, principal: &Principal) -> AuthResult<SignedAccessToken> {
        self.tokens.issue_default(principal.id, principal.role)
    }

    pub async fn current_user(&self, id: Uuid) -> AuthResult<UserProfile> {
        Ok(self.load_user(id).await?.profile())
    }

    pub async fn change_password(
        &self,
        principal: &Principal,
        request: ChangePasswordRequest,
    ) -> AuthResult<()> {
        let current = request
            .current_password
            .as_deref()
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AuthError::Validation("Current password is required".into()))?;
        let new_password = validate_password(request.new_password.as_deref(), "New password")?;

        let user = self.load_user(principal.id).await?;
        if !self
            .hasher
            .verify_password(current, &user.password_hash)
            .await?
        {
            return Err(AuthError::WrongCurrentPassword);
        }

        let hash = self.hasher.hash_password(new_password).await?;
        if !self.users.update_password(user.id, &hash).await? {
            return Err(AuthError::UserNotFound);
        }
        log::info!("user {} changed password", user.id);
        Ok(())
    }

    /// Issues a reset credential when the email belongs to an active account.
    /// The outcome is never reported back to the caller.
    pub async fn forgot_password(&self, email: Option<&str>) -> AuthResult<()> {
        let email = email
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AuthError::Validation("Email is required".into()))?;

        let Some(user) = self.users.find_by_email(&email).await? else {
            log::debug!("password reset requested for unknown email");
            return Ok(());
        };
        if !user.is_active {
            log::debug!("password reset requested for inactive user {}", user.id);
            return Ok(());
        }

        let now = Utc::now();
        self.reset_tokens
            .revoke_for_user(user.id, PASSWORD_RESET_PURPOSE, now)
            .await?;
        let (issued, stored) = reset_store::mint(
            user.id,
            PASSWORD_RESET_PURPOSE,
            now,
            Duration::seconds(self.config.reset_token_ttl_secs),
        );
        self.reset_tokens.insert(stored).await?;

        let link = ResetLink {
            url: format!("{}?token={}", self.config.reset_url_base, issued.token),
            token: issued.token,
            expires_at: issued.expires_at,
        };
        self.notifier.send_password_reset(&user, &link).await
    }

    pub async fn reset_password(&self, request: ResetPasswordRequest) -> AuthResult<()> {
        let token = request
            .token
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| AuthError::Validation("Reset token is required".into()))?;
        let password = validate_password(request.password.as_deref(), "Password")?;

        let parsed = ParsedResetToken::parse(token)?;
        let record = self
            .reset_tokens
            .find(parsed.token_id)
            .await?
            .ok_or(AuthError::ResetTokenInvalid)?;
        if !reset_store::verify_secret(&parsed.secret, &record.hashed_token)? {
            return Err(AuthError::ResetTokenInvalid);
        }
        if record.purpose != PASSWORD_RESET_PURPOSE {
            return Err(AuthError::ResetTokenWrongPurpose);
        }
        if record.used_at.is_some() {
            return Err(AuthError::ResetTokenUsed);
        }
        let now = Utc::now();
        if record.expires_at <= now {
            return Err(AuthError::ResetTokenExpired);
        }

        let user = self.load_user(record.user_id).await?;
        let hash = self.hasher.hash_password(password).await?;

        if !self.reset_tokens.mark_used(record.token_id, now).await? {
            return Err(AuthError::ResetTokenUsed);
        }
        if !self.users.update_password(user.id, &hash).await? {
            return Err(AuthError::UserNotFound);
        }
        log::info!("user {} reset password", user.id);
        Ok(())
    }

    /// Generates a fresh secret, stored disabled until [`Self::verify_mfa`]
    /// succeeds. Calling again before verification rotates the pending
    /// secret; an enabled factor must be disabled with a code first.
    pub async fn setup_mfa(&self, principal: &Principal) -> AuthResult<MfaSetup> {
        let user = self.load_user(principal.id).await?;
        if user.mfa_enabled() {
            return Err(AuthError::MfaAlreadyEnabled);
        }

        let enrollment = self
            .otp
            .generate_secret(&principal.email, &self.config.mfa_issuer)?;
        let qr_code = self.otp.render_qr(&enrollment.provisioning_uri)?;

        self.users
            .save_mfa_secret(user.id, &enrollment.secret, MfaMethod::Authenticator)
            .await?;
        log::info!("user {} started MFA enrollment", principal.id);

        Ok(MfaSetup {
            manual_entry_key: enrollment.secret.clone(),
            secret: enrollment.secret,
            qr_code,
        })
    }

    pub async fn verify_mfa(&self, principal: &Principal, code: Option<&str>) -> AuthResult<()> {
        let code = required_code(code)?;
        let user = self.load_user(principal.id).await?;
        let mfa = user.mfa.as_ref().ok_or(AuthError::MfaNotSetUp)?;

        if !self.otp.verify_code(&mfa.secret, code)? {
            return Err(AuthError::MfaVerificationFailed);
        }
        if !mfa.is_enabled {
            self.users.enable_mfa(user.id).await?;
            log::info!("user {} enabled MFA", user.id);
        }
        Ok(())
    }

    pub async fn disable_mfa(&self, principal: &Principal, code: Option<&str>) -> AuthResult<()> {
        let code = required_code(code)?;
        let user = self.load_user(principal.id).await?;
        let mfa = user
            .mfa
            .as_ref()
            .filter(|mfa| mfa.is_enabled)
            .ok_or(AuthError::MfaNotEnabled)?;

        if !self.otp.verify_code(&mfa.secret, code)? {
            return Err(AuthError::MfaVerificationFailed);
        }
        self.users.clear_mfa(user.id).await?;
        log::info!("user {} disabled MFA", user.id);
        Ok(())
    }

    /// Spends one hash verification so an unknown email costs as much as a
    /// wrong password. The outcome is discarded.
    async fn verify_against_timing_hash(&self, password: &str) {
        let hash = self
            .timing_hash
            .get_or_try_init(|| self.hasher.hash_password(TIMING_PASSWORD))
            .await;
        match hash {
            Ok(hash) => {
                let _ = self.hasher.verify_password(password, hash).await;
            }
            Err(err) => log::warn!("failed to prepare login timing hash: {err}"),
        }
    }

    async fn load_user(&self, id: Uuid) -> AuthResult<User> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or(AuthError::UserNotFound)
    }
}

fn required_code(code: Option<&str>) -> AuthResult<&str> {
    code.map(str::trim)
        .filter(|code| !code.is_empty())
        .ok_or(AuthError::MfaCodeMissing)
}

/// Anyone may create a CLIENT. Other roles need an admin-tier caller, and
/// only a SUPER_ADMIN may create another SUPER_ADMIN.
pub fn authorize_role_grant(role: Role, actor: Option<&Principal>) -> AuthResult<()> {
    if role == Role::Client {
        return Ok(());
    }
    let actor = actor.ok_or(AuthError::Forbidden)?;
    let allowed = match role {
        Role::SuperAdmin => actor.role == Role::SuperAdmin,
        _ => actor.is_admin_tier(),
    };
    if allowed {
        Ok(())
    } else {
        Err(AuthError::Forbidden)
    }
}
