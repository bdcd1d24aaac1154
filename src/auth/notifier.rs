use chrono::{DateTime, Utc};

use crate::auth::AuthResult;
use crate::models::User;

#[derive(Debug, Clone)]
pub struct ResetLink {
    pub url: String,
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Out-of-band delivery of password reset links.
#[rocket::async_trait]
pub trait ResetNotifier: Send + Sync {
    async fn send_password_reset(&self, user: &User, link: &ResetLink) -> AuthResult<()>;
}

/// Writes reset links to the log. The link itself is only logged when
/// `reveal_links` is set, which is limited to development.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier {
    reveal_links: bool,
}

impl LogNotifier {
    pub fn new(reveal_links: bool) -> Self {
        Self { reveal_links }
    }
}

#[rocket::async_trait]
impl ResetNotifier for LogNotifier {
    async fn send_password_reset(&self, user: &User, link: &ResetLink) -> AuthResult<()> {
        if self.reveal_links {
            log::info!(
                "password reset link for user {}: {} (expires {})",
                user.id,
                link.url,
                link.expires_at
            );
        } else {
            log::info!(
                "password reset issued for user {} (expires {})",
                user.id,
                link.expires_at
            );
        }
        Ok(())
    }
}
