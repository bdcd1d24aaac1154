use crate::auth::AuthResult;

/// One-way adaptive password hashing.
#[rocket::async_trait]
pub trait PasswordHasher: Send + Sync {
    async fn hash_password(&self, password: &str) -> AuthResult<String>;

    /// `Ok(false)` means the password does not match; `Err` means the hash
    /// could not be checked at all.
    async fn verify_password(&self, password: &str, encoded: &str) -> AuthResult<bool>;
}

/// bcrypt hasher. Work runs on the blocking pool so request tasks keep
/// moving while a cost-12 hash is computed.
#[derive(Debug, Clone)]
pub struct PasswordService {
    cost: u32,
}

impl PasswordService {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub fn cost(&self) -> u32 {
        self.cost
    }
}

impl Default for PasswordService {
    fn default() -> Self {
        Self::new(bcrypt::DEFAULT_COST)
    }
}

#[rocket::async_trait]
impl PasswordHasher for PasswordService {
    async fn hash_password(&self, password: &str) -> AuthResult<String> {
        let password = password.to_owned();
        let cost = self.cost;
        let hash = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost)).await??;
        Ok(hash)
    }

    async fn verify_password(&self, password: &str, encoded: &str) -> AuthResult<bool> {
        let password = password.to_owned();
        let encoded = encoded.to_owned();
        let verified =
            tokio::task::spawn_blocking(move || bcrypt::verify(password, &encoded)).await??;
        Ok(verified)
    }
}
