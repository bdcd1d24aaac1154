use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use portal_api::auth::mfa::{MfaEnrollment, OtpEngine};
use portal_api::auth::passwords::{PasswordHasher, PasswordService};
use portal_api::auth::reset_store::ResetTokenStore;
use portal_api::auth::responses::{LoginRequest, RegisterRequest, ResetPasswordRequest};
use portal_api::auth::store::UserStore;
use portal_api::auth::{AuthError, AuthResult, AuthService};
use portal_api::models::{MfaMethod, NewUser, Principal, ProfileUpdate, Role, User};
use portal_api::test_support::{MemoryBackend, MemoryUserStore, test_auth_config};
use uuid::Uuid;

/// Accepts exactly one code regardless of the clock.
struct FixedOtp;

impl OtpEngine for FixedOtp {
    fn generate_secret(&self, label: &str, issuer: &str) -> AuthResult<MfaEnrollment> {
        Ok(MfaEnrollment {
            secret: "JBSWY3DPEHPK3PXP".into(),
            provisioning_uri: format!("otpauth://totp/{issuer}:{label}?secret=JBSWY3DPEHPK3PXP"),
        })
    }

    fn render_qr(&self, uri: &str) -> AuthResult<String> {
        Ok(format!("data:image/png;base64,{}", uri.len()))
    }

    fn verify_code_at(&self, _secret: &str, code: &str, _unix_time: u64) -> AuthResult<bool> {
        Ok(code == "424242")
    }
}

/// bcrypt at the minimum cost, counting every call.
#[derive(Default)]
struct CountingHasher {
    hashes: AtomicUsize,
    verifies: AtomicUsize,
}

#[rocket::async_trait]
impl PasswordHasher for CountingHasher {
    async fn hash_password(&self, password: &str) -> AuthResult<String> {
        self.hashes.fetch_add(1, Ordering::SeqCst);
        PasswordService::new(4).hash_password(password).await
    }

    async fn verify_password(&self, password: &str, encoded: &str) -> AuthResult<bool> {
        self.verifies.fetch_add(1, Ordering::SeqCst);
        PasswordService::new(4).verify_password(password, encoded).await
    }
}

/// Memory store whose password writes find no row, as after a concurrent delete.
#[derive(Default)]
struct VanishingPasswordStore {
    inner: MemoryUserStore,
}

#[rocket::async_trait]
impl UserStore for VanishingPasswordStore {
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        self.inner.find_by_id(id).await
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        self.inner.find_by_email(email).await
    }

    async fn create(&self, user: NewUser) -> AuthResult<User> {
        self.inner.create(user).await
    }

    async fn list(&self) -> AuthResult<Vec<User>> {
        self.inner.list().await
    }

    async fn update_password(&self, _id: Uuid, _password_hash: &str) -> AuthResult<bool> {
        Ok(false)
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> AuthResult<Option<User>> {
        self.inner.update_profile(id, update).await
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> AuthResult<Option<User>> {
        self.inner.set_active(id, is_active).await
    }

    async fn save_mfa_secret(
        &self,
        user_id: Uuid,
        secret: &str,
        method: MfaMethod,
    ) -> AuthResult<()> {
        self.inner.save_mfa_secret(user_id, secret, method).await
    }

    async fn enable_mfa(&self, user_id: Uuid) -> AuthResult<()> {
        self.inner.enable_mfa(user_id).await
    }

    async fn clear_mfa(&self, user_id: Uuid) -> AuthResult<()> {
        self.inner.clear_mfa(user_id).await
    }
}

fn login(email: &str, password: &str, code: Option<&str>) -> LoginRequest {
    LoginRequest {
        email: Some(email.into()),
        password: Some(password.into()),
        mfa_token: code.map(str::to_string),
    }
}

#[tokio::test]
async fn mfa_flow_through_an_injected_engine() {
    let backend = MemoryBackend::new();
    let user = backend.seed_user("otp@x.com", "longenough", Role::Client).await;
    let service = backend.service().with_otp_engine(Arc::new(FixedOtp));
    let principal = Principal::from(&user);

    let setup = service.setup_mfa(&principal).await.expect("setup");
    assert_eq!(setup.secret, "JBSWY3DPEHPK3PXP");
    assert_eq!(setup.manual_entry_key, setup.secret);

    let err = service
        .verify_mfa(&principal, Some("000000"))
        .await
        .expect_err("wrong code");
    assert!(matches!(err, AuthError::MfaVerificationFailed));
    let stored = backend.users.find_by_id(user.id).await.expect("find").expect("user");
    assert!(!stored.mfa_enabled());

    service
        .verify_mfa(&principal, Some("424242"))
        .await
        .expect("verify");
    // Verifying again once enabled is a no-op success.
    service
        .verify_mfa(&principal, Some("424242"))
        .await
        .expect("verify again");

    let err = service
        .login(login("otp@x.com", "longenough", None))
        .await
        .expect_err("code required");
    assert!(err.mfa_required());

    let session = service
        .login(login("otp@x.com", "longenough", Some(" 424242 ")))
        .await
        .expect("login");
    assert!(session.user.mfa_enabled);

    // An enabled factor cannot be replaced without going through disable.
    let err = service
        .setup_mfa(&principal)
        .await
        .expect_err("already enabled");
    assert!(matches!(err, AuthError::MfaAlreadyEnabled));
    let err = service
        .login(login("otp@x.com", "longenough", None))
        .await
        .expect_err("code still required");
    assert!(err.mfa_required());

    service
        .disable_mfa(&principal, Some("424242"))
        .await
        .expect("disable");
    service.setup_mfa(&principal).await.expect("setup after disable");
    service
        .login(login("otp@x.com", "longenough", None))
        .await
        .expect("pending setup does not gate login");
}

#[tokio::test]
async fn pending_mfa_setup_can_be_rotated() {
    let backend = MemoryBackend::new();
    let user = backend.seed_user("rotate@x.com", "longenough", Role::Client).await;
    let service = backend.service();
    let principal = Principal::from(&user);

    let first = service.setup_mfa(&principal).await.expect("setup");
    let second = service.setup_mfa(&principal).await.expect("rotate");
    assert_ne!(first.secret, second.secret);

    let stored = backend.users.find_by_id(user.id).await.expect("find").expect("user");
    let mfa = stored.mfa.expect("pending settings");
    assert_eq!(mfa.secret, second.secret);
    assert!(!mfa.is_enabled);
}

#[tokio::test]
async fn verify_without_setup_is_rejected() {
    let backend = MemoryBackend::new();
    let user = backend.seed_user("nosetup@x.com", "longenough", Role::Client).await;
    let service = backend.service();

    let err = service
        .verify_mfa(&Principal::from(&user), Some("123456"))
        .await
        .expect_err("not set up");
    assert!(matches!(err, AuthError::MfaNotSetUp));
}

#[tokio::test]
async fn reissuing_a_reset_link_revokes_the_previous_one() {
    let backend = MemoryBackend::new();
    backend.seed_user("twice@x.com", "old-password", Role::Client).await;
    let service = backend.service();

    service
        .forgot_password(Some("twice@x.com"))
        .await
        .expect("first");
    let first = backend.notifier.last_token().await.expect("first token");
    service
        .forgot_password(Some(" TWICE@x.com "))
        .await
        .expect("second");
    let second = backend.notifier.last_token().await.expect("second token");
    assert_ne!(first, second);
    assert_eq!(backend.reset_tokens.len().await, 2);

    let err = service
        .reset_password(ResetPasswordRequest {
            token: Some(first),
            password: Some("new-password".into()),
        })
        .await
        .expect_err("revoked");
    assert!(matches!(err, AuthError::ResetTokenUsed));

    service
        .reset_password(ResetPasswordRequest {
            token: Some(second),
            password: Some("new-password".into()),
        })
        .await
        .expect("reset");

    let purged = backend
        .reset_tokens
        .purge_expired(chrono::Utc::now() + chrono::Duration::days(1))
        .await
        .expect("purge");
    assert_eq!(purged, 2);
}

#[tokio::test]
async fn inactive_accounts_get_no_reset_link() {
    let backend = MemoryBackend::new();
    let user = backend.seed_user("idle@x.com", "longenough", Role::Client).await;
    backend
        .users
        .set_active(user.id, false)
        .await
        .expect("deactivate");
    let service = backend.service();

    service
        .forgot_password(Some("idle@x.com"))
        .await
        .expect("silent");
    service
        .forgot_password(Some("nobody@x.com"))
        .await
        .expect("silent");
    assert_eq!(backend.notifier.count().await, 0);
    assert_eq!(backend.reset_tokens.len().await, 0);

    let err = service.forgot_password(Some("  ")).await.expect_err("blank");
    assert!(matches!(err, AuthError::Validation(_)));
}

#[tokio::test]
async fn reset_for_a_deleted_account_is_not_found() {
    let backend = MemoryBackend::new();
    let user = backend.seed_user("vanish@x.com", "longenough", Role::Client).await;
    let service = backend.service();

    service
        .forgot_password(Some("vanish@x.com"))
        .await
        .expect("issue");
    let token = backend.notifier.last_token().await.expect("token");
    backend.users.remove(user.id).await;

    let err = service
        .reset_password(ResetPasswordRequest {
            token: Some(token),
            password: Some("new-password".into()),
        })
        .await
        .expect_err("user gone");
    assert!(matches!(err, AuthError::UserNotFound));
}

#[tokio::test]
async fn registration_hashes_and_normalizes() {
    let backend = MemoryBackend::new();
    let service = backend.service();

    let session = service
        .register(
            RegisterRequest {
                email: Some("  Mixed.Case@Example.COM ".into()),
                password: Some("longenough".into()),
                first_name: Some(" Ada ".into()),
                last_name: Some("Lovelace".into()),
                phone: Some("   ".into()),
                ..Default::default()
            },
            None,
        )
        .await
        .expect("register");

    assert_eq!(session.user.email, "mixed.case@example.com");
    assert_eq!(session.user.first_name, "Ada");
    assert_eq!(session.user.phone, None);
    assert_eq!(session.user.role, Role::Client);

    let stored = backend
        .users
        .find_by_email("mixed.case@example.com")
        .await
        .expect("find")
        .expect("user");
    assert_ne!(stored.password_hash, "longenough");
    assert!(stored.password_hash.starts_with("$2"));

    let principal = service
        .authenticate(&session.token.token)
        .await
        .expect("token authenticates");
    assert_eq!(principal.id, stored.id);
}

#[tokio::test]
async fn super_admins_may_create_super_admins() {
    let backend = MemoryBackend::new();
    let root = backend.seed_user("root@x.com", "longenough", Role::SuperAdmin).await;
    let service = backend.service();

    let session = service
        .register(
            RegisterRequest {
                email: Some("second-root@x.com".into()),
                password: Some("longenough".into()),
                first_name: Some("Second".into()),
                last_name: Some("Root".into()),
                role: Some("SUPER_ADMIN".into()),
                ..Default::default()
            },
            Some(&Principal::from(&root)),
        )
        .await
        .expect("register");
    assert_eq!(session.user.role, Role::SuperAdmin);
}

#[tokio::test]
async fn unknown_email_pays_for_a_hash_verification() {
    let backend = MemoryBackend::new();
    backend.seed_user("known@x.com", "correct-horse", Role::Client).await;
    let hasher = Arc::new(CountingHasher::default());
    let service = backend.service().with_hasher(hasher.clone());

    let err = service
        .login(login("nobody@x.com", "battery-staple", None))
        .await
        .expect_err("unknown email");
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(hasher.verifies.load(Ordering::SeqCst), 1);
    assert_eq!(hasher.hashes.load(Ordering::SeqCst), 1);

    let err = service
        .login(login("ghost@x.com", "battery-staple", None))
        .await
        .expect_err("unknown email");
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(hasher.verifies.load(Ordering::SeqCst), 2);
    assert_eq!(hasher.hashes.load(Ordering::SeqCst), 1, "throwaway hash is reused");

    let err = service
        .login(login("known@x.com", "battery-staple", None))
        .await
        .expect_err("wrong password");
    assert!(matches!(err, AuthError::InvalidCredentials));
    assert_eq!(hasher.verifies.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn reset_fails_when_the_password_write_finds_no_account() {
    let backend = MemoryBackend::new();
    let users = Arc::new(VanishingPasswordStore::default());
    let hash = PasswordService::new(4)
        .hash_password("old-password")
        .await
        .expect("hash");
    users
        .create(NewUser {
            email: "race@x.com".into(),
            password_hash: hash,
            first_name: "Race".into(),
            last_name: "Condition".into(),
            phone: None,
            address: Default::default(),
            role: Role::Client,
        })
        .await
        .expect("create");

    let service = AuthService::new(test_auth_config(), users, backend.reset_tokens.clone())
        .expect("service")
        .with_notifier(backend.notifier.clone());
    service
        .forgot_password(Some("race@x.com"))
        .await
        .expect("issue");
    let token = backend.notifier.last_token().await.expect("token");

    let err = service
        .reset_password(ResetPasswordRequest {
            token: Some(token),
            password: Some("new-password".into()),
        })
        .await
        .expect_err("no row updated");
    assert!(matches!(err, AuthError::UserNotFound));
}
