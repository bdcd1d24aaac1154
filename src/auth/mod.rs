//! Authentication and authorization: configuration, password hashing, token
//! issuance, TOTP second factor, credential flows, request guards and the
//! HTTP handlers that expose them.

use std::sync::Arc;

pub mod config;
pub mod error;
pub mod guards;
pub mod jwt;
pub mod mfa;
pub mod notifier;
pub mod passwords;
pub mod reset_store;
pub mod responses;
pub mod routes;
pub mod service;
pub mod store;

pub use config::AuthConfig;
pub use error::{AuthError, AuthResult};
pub use guards::{OwnerOrElevated, RequireAdmin, RequireRole, RequireStaff, UserIdParam};
pub use jwt::{JwtService, TokenCodec};
pub use mfa::{OtpEngine, TotpEngine};
pub use passwords::{PasswordHasher, PasswordService};
pub use reset_store::{PgResetTokenStore, ResetTokenStore};
pub use service::AuthService;
pub use store::{PgUserStore, UserStore};

/// Shared, immutable auth state managed by Rocket.
#[derive(Clone)]
pub struct AuthState {
    pub config: AuthConfig,
    pub service: Arc<AuthService>,
}

impl AuthState {
    pub fn new(service: AuthService) -> Self {
        Self {
            config: service.config().clone(),
            service: Arc::new(service),
        }
    }
}
