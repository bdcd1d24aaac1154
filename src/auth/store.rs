use rocket_db_pools::sqlx::{self, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::auth::{AuthError, AuthResult};
use crate::models::{Address, MfaMethod, MfaSettings, NewUser, ProfileUpdate, Role, User};

/// Persistence for accounts and their second-factor settings.
#[rocket::async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>>;

    /// Lookup by canonical (trimmed, lowercased) email.
    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>>;

    /// Fails with [`AuthError::EmailTaken`] when the email is already registered.
    async fn create(&self, user: NewUser) -> AuthResult<User>;

    async fn list(&self) -> AuthResult<Vec<User>>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> AuthResult<bool>;

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> AuthResult<Option<User>>;

    async fn set_active(&self, id: Uuid, is_active: bool) -> AuthResult<Option<User>>;

    /// Stores a fresh secret and leaves MFA disabled until verified. Never
    /// replaces an enabled factor (`MfaAlreadyEnabled`).
    async fn save_mfa_secret(&self, user_id: Uuid, secret: &str, method: MfaMethod)
    -> AuthResult<()>;

    async fn enable_mfa(&self, user_id: Uuid) -> AuthResult<()>;

    async fn clear_mfa(&self, user_id: Uuid) -> AuthResult<()>;
}

const USER_COLUMNS: &str = r#"
    u.id, u.email, u.password_hash, u.first_name, u.last_name, u.phone,
    u.street, u.city, u.state, u.zip_code, u.role, u.is_active,
    u.created_at, u.updated_at,
    m.secret AS mfa_secret, m.method AS mfa_method, m.is_enabled AS mfa_enabled
"#;

#[derive(Debug, Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, predicate: &str, bind: BindValue<'_>) -> AuthResult<Option<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u LEFT JOIN mfa_settings m ON m.user_id = u.id WHERE {predicate}"
        );
        let query = sqlx::query(&sql);
        let query = match bind {
            BindValue::Id(id) => query.bind(id),
            BindValue::Text(text) => query.bind(text),
        };
        let row = query.fetch_optional(&self.pool).await?;
        row.as_ref().map(user_from_row).transpose()
    }
}

enum BindValue<'a> {
    Id(Uuid),
    Text(&'a str),
}

fn user_from_row(row: &PgRow) -> AuthResult<User> {
    let role: String = row.try_get("role")?;
    let role = Role::parse(&role)
        .ok_or_else(|| AuthError::Other(format!("unknown role '{role}' in users table")))?;

    let mfa_secret: Option<String> = row.try_get("mfa_secret")?;
    let mfa = match mfa_secret {
        Some(secret) => {
            let method: Option<String> = row.try_get("mfa_method")?;
            let is_enabled: Option<bool> = row.try_get("mfa_enabled")?;
            Some(MfaSettings {
                secret,
                method: method
                    .as_deref()
                    .and_then(MfaMethod::parse)
                    .unwrap_or_default(),
                is_enabled: is_enabled.unwrap_or(false),
            })
        }
        None => None,
    };

    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        phone: row.try_get("phone")?,
        address: Address {
            street: row.try_get("street")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            zip_code: row.try_get("zip_code")?,
        },
        role,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        mfa,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}

#[rocket::async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
        self.fetch_one_where("u.id = $1", BindValue::Id(id)).await
    }

    async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
        self.fetch_one_where("lower(u.email) = lower($1)", BindValue::Text(email))
            .await
    }

    async fn create(&self, user: NewUser) -> AuthResult<User> {
        let id = Uuid::new_v4();
        let result = sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, phone,
                               street, city, state, zip_code, role, is_active)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, TRUE)
            "#,
        )
        .bind(id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(&user.phone)
        .bind(&user.address.street)
        .bind(&user.address.city)
        .bind(&user.address.state)
        .bind(&user.address.zip_code)
        .bind(user.role.as_str())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => {}
            Err(err) if is_unique_violation(&err) => return Err(AuthError::EmailTaken),
            Err(err) => return Err(err.into()),
        }

        self.find_by_id(id)
            .await?
            .ok_or_else(|| AuthError::Other(format!("user {id} vanished after insert")))
    }

    async fn list(&self) -> AuthResult<Vec<User>> {
        let sql = format!(
            "SELECT {USER_COLUMNS} FROM users u LEFT JOIN mfa_settings m ON m.user_id = u.id ORDER BY u.created_at, u.email"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(user_from_row).collect()
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> AuthResult<bool> {
        let result =
            sqlx::query("UPDATE users SET password_hash = $1, updated_at = now() WHERE id = $2")
                .bind(password_hash)
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn update_profile(&self, id: Uuid, update: &ProfileUpdate) -> AuthResult<Option<User>> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                first_name = COALESCE($2, first_name),
                last_name = COALESCE($3, last_name),
                phone = COALESCE($4, phone),
                street = COALESCE($5, street),
                city = COALESCE($6, city),
                state = COALESCE($7, state),
                zip_code = COALESCE($8, zip_code),
                updated_at = now()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&update.first_name)
        .bind(&update.last_name)
        .bind(&update.phone)
        .bind(&update.street)
        .bind(&update.city)
        .bind(&update.state)
        .bind(&update.zip_code)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    async fn set_active(&self, id: Uuid, is_active: bool) -> AuthResult<Option<User>> {
        let result =
            sqlx::query("UPDATE users SET is_active = $1, updated_at = now() WHERE id = $2")
                .bind(is_active)
                .bind(id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.find_by_id(id).await
    }

    async fn save_mfa_secret(
        &self,
        user_id: Uuid,
        secret: &str,
        method: MfaMethod,
    ) -> AuthResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO mfa_settings (user_id, secret, method, is_enabled)
            VALUES ($1, $2, $3, FALSE)
            ON CONFLICT (user_id) DO UPDATE
            SET secret = EXCLUDED.secret,
                method = EXCLUDED.method,
                is_enabled = FALSE,
                updated_at = now()
            WHERE mfa_settings.is_enabled = FALSE
            "#,
        )
        .bind(user_id)
        .bind(secret)
        .bind(method.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::MfaAlreadyEnabled);
        }
        Ok(())
    }

    async fn enable_mfa(&self, user_id: Uuid) -> AuthResult<()> {
        sqlx::query(
            "UPDATE mfa_settings SET is_enabled = TRUE, updated_at = now() WHERE user_id = $1",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_mfa(&self, user_id: Uuid) -> AuthResult<()> {
        sqlx::query("DELETE FROM mfa_settings WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
