#[macro_use]
extern crate rocket;

pub mod auth;
pub mod db;
pub mod error;
pub mod models;
pub mod request_logger;
pub mod routes;

use crate::auth::{AuthConfig, AuthService, AuthState, PgResetTokenStore, PgUserStore};
use crate::db::PortalDb;
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::http::Method;
use rocket::{Build, Rocket, Route};
use rocket_cors::{AllowedOrigins, CorsOptions};
use rocket_db_pools::Database;
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::{
    openapi_get_routes,
    rapidoc::{GeneralConfig, HideShowConfig, RapiDocConfig, make_rapidoc},
    settings::UrlObject,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};
use std::time::Duration;

static LOGGER: Once = Once::new();

const RESET_TOKEN_PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

/// Every documented API route, mounted under `/api`.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Health
        routes::health::health_check,
        // Auth
        auth::routes::register,
        auth::routes::login,
        auth::routes::logout,
        auth::routes::refresh_token,
        auth::routes::me,
        auth::routes::change_password,
        auth::routes::forgot_password,
        auth::routes::reset_password,
        auth::routes::mfa_setup,
        auth::routes::mfa_verify,
        auth::routes::mfa_disable,
        // Users
        routes::users::list_users,
        routes::users::get_user,
        routes::users::update_user,
        routes::users::set_user_status,
    ]
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let cors = CorsOptions::default()
        .allowed_origins(AllowedOrigins::all())
        .allowed_methods(
            vec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
            ]
            .into_iter()
            .map(From::from)
            .collect(),
        )
        .allow_credentials(true)
        .to_cors()
        .expect("Error creating CORS");

    rocket::build()
        .attach(RequestLogger)
        .attach(PortalDb::init())
        .attach(cors)
        .attach(AdHoc::try_on_ignite("Run Migrations", |rocket| async move {
            match PortalDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    match db::run_migrations(&pool).await {
                        Ok(_) => {
                            log::info!("database migrations successful");
                            Ok(rocket)
                        }
                        Err(e) => {
                            log::error!("database migrations failed: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for migrations");
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::try_on_ignite("Manage DB Pool", |rocket| async move {
            match PortalDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    Ok(rocket.manage(pool))
                }
                None => Err(rocket),
            }
        }))
        // A missing or invalid signing secret aborts ignition.
        .attach(AdHoc::try_on_ignite("Auth State", |rocket| async move {
            let Some(pool) = rocket.state::<PgPool>().cloned() else {
                log::error!("auth state: database pool not found");
                return Err(rocket);
            };

            let config = match AuthConfig::from_env() {
                Ok(config) => config,
                Err(err) => {
                    log::error!("auth configuration invalid: {}", err);
                    return Err(rocket);
                }
            };

            let service = AuthService::new(
                config,
                Arc::new(PgUserStore::new(pool.clone())),
                Arc::new(PgResetTokenStore::new(pool)),
            );
            match service {
                Ok(service) => Ok(rocket.manage(AuthState::new(service))),
                Err(err) => {
                    log::error!("failed to initialize auth service: {}", err);
                    Err(rocket)
                }
            }
        }))
        .attach(AdHoc::on_liftoff("Spawn Reset Token Purge", |rocket| {
            Box::pin(async move {
                if let Some(pool) = rocket.state::<PgPool>() {
                    let store = PgResetTokenStore::new(pool.clone());
                    tokio::spawn(purge_reset_tokens(store));
                } else {
                    log::error!("failed to spawn reset token purge: database pool not found");
                }
            })
        }))
        .mount("/api", api_routes())
        .register("/", catchers![error::default_catcher])
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../openapi.json".to_owned(),
                ..Default::default()
            }),
        )
        .mount(
            "/api/docs/rapidoc/",
            make_rapidoc(&RapiDocConfig {
                general: GeneralConfig {
                    spec_urls: vec![UrlObject::new("Portal API", "../../openapi.json")],
                    ..Default::default()
                },
                hide_show: HideShowConfig {
                    allow_spec_url_load: false,
                    allow_spec_file_load: false,
                    ..Default::default()
                },
                ..Default::default()
            }),
        )
}

async fn purge_reset_tokens(store: PgResetTokenStore) {
    use crate::auth::ResetTokenStore;

    let mut interval = tokio::time::interval(RESET_TOKEN_PURGE_INTERVAL);
    loop {
        interval.tick().await;
        match store.purge_expired(chrono::Utc::now()).await {
            Ok(0) => {}
            Ok(removed) => log::info!("purged {} stale reset tokens", removed),
            Err(err) => log::warn!("reset token purge failed: {}", err),
        }
    }
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use std::collections::HashMap;
    use std::sync::Arc;

    use chrono::{DateTime, Utc};
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::PgPool;
    use tokio::sync::{Mutex, RwLock};
    use uuid::Uuid;

    use crate::auth::notifier::{ResetLink, ResetNotifier};
    use crate::auth::passwords::{PasswordHasher, PasswordService};
    use crate::auth::reset_store::{ResetTokenStore, StoredResetToken};
    use crate::auth::store::UserStore;
    use crate::auth::{AuthConfig, AuthError, AuthResult, AuthService, AuthState};
    use crate::models::{MfaMethod, MfaSettings, NewUser, ProfileUpdate, Role, User};

    pub use database::{TestDatabase, TestDatabaseError};

    pub const TEST_JWT_SECRET: &str = "portal-test-signing-secret";

    /// Auth configuration for tests: fixed secret, minimum bcrypt cost and
    /// non-secure cookies so the local client sends them back.
    pub fn test_auth_config() -> AuthConfig {
        AuthConfig {
            jwt_secret: TEST_JWT_SECRET.into(),
            bcrypt_cost: 4,
            cookie_secure: false,
            reset_url_base: "http://portal.test/reset-password".into(),
            ..AuthConfig::default()
        }
    }

    /// In-memory [`UserStore`].
    #[derive(Default)]
    pub struct MemoryUserStore {
        users: RwLock<HashMap<Uuid, User>>,
    }

    impl MemoryUserStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Changes a role behind the service's back, as an operator would.
        pub async fn set_role(&self, id: Uuid, role: Role) {
            if let Some(user) = self.users.write().await.get_mut(&id) {
                user.role = role;
            }
        }

        pub async fn remove(&self, id: Uuid) {
            self.users.write().await.remove(&id);
        }
    }

    #[rocket::async_trait]
    impl UserStore for MemoryUserStore {
        async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<User>> {
            Ok(self.users.read().await.get(&id).cloned())
        }

        async fn find_by_email(&self, email: &str) -> AuthResult<Option<User>> {
            let email = email.to_lowercase();
            Ok(self
                .users
                .read()
                .await
                .values()
                .find(|user| user.email.to_lowercase() == email)
                .cloned())
        }

        async fn create(&self, user: NewUser) -> AuthResult<User> {
            let mut users = self.users.write().await;
            let email = user.email.to_lowercase();
            if users.values().any(|existing| existing.email == email) {
                return Err(AuthError::EmailTaken);
            }

            let now = Utc::now();
            let record = User {
                id: Uuid::new_v4(),
                email,
                password_hash: user.password_hash,
                first_name: user.first_name,
                last_name: user.last_name,
                phone: user.phone,
                address: user.address,
                role: user.role,
                is_active: true,
                created_at: now,
                updated_at: now,
                mfa: None,
            };
            users.insert(record.id, record.clone());
            Ok(record)
        }

        async fn list(&self) -> AuthResult<Vec<User>> {
            let mut users: Vec<User> = self.users.read().await.values().cloned().collect();
            users.sort_by(|a, b| (a.created_at, &a.email).cmp(&(b.created_at, &b.email)));
            Ok(users)
        }

        async fn update_password(&self, id: Uuid, password_hash: &str) -> AuthResult<bool> {
            let mut users = self.users.write().await;
            match users.get_mut(&id) {
                Some(user) => {
                    user.password_hash = password_hash.to_string();
                    user.updated_at = Utc::now();
                    Ok(true)
                }
                None => Ok(false),
            }
        }

        async fn update_profile(
            &self,
            id: Uuid,
            update: &ProfileUpdate,
        ) -> AuthResult<Option<User>> {
            let mut users = self.users.write().await;
            Ok(users.get_mut(&id).map(|user| {
                update.apply(user);
                user.updated_at = Utc::now();
                user.clone()
            }))
        }

        async fn set_active(&self, id: Uuid, is_active: bool) -> AuthResult<Option<User>> {
            let mut users = self.users.write().await;
            Ok(users.get_mut(&id).map(|user| {
                user.is_active = is_active;
                user.updated_at = Utc::now();
                user.clone()
            }))
        }

        async fn save_mfa_secret(
            &self,
            user_id: Uuid,
            secret: &str,
            method: MfaMethod,
        ) -> AuthResult<()> {
            let mut users = self.users.write().await;
            let user = users.get_mut(&user_id).ok_or(AuthError::UserNotFound)?;
            if user.mfa_enabled() {
                return Err(AuthError::MfaAlreadyEnabled);
            }
            user.mfa = Some(MfaSettings {
                secret: secret.to_string(),
                method,
                is_enabled: false,
            });
            Ok(())
        }

        async fn enable_mfa(&self, user_id: Uuid) -> AuthResult<()> {
            let mut users = self.users.write().await;
            if let Some(mfa) = users.get_mut(&user_id).and_then(|user| user.mfa.as_mut()) {
                mfa.is_enabled = true;
            }
            Ok(())
        }

        async fn clear_mfa(&self, user_id: Uuid) -> AuthResult<()> {
            if let Some(user) = self.users.write().await.get_mut(&user_id) {
                user.mfa = None;
            }
            Ok(())
        }
    }

    /// In-memory [`ResetTokenStore`].
    #[derive(Default)]
    pub struct MemoryResetTokenStore {
        tokens: RwLock<HashMap<Uuid, StoredResetToken>>,
    }

    impl MemoryResetTokenStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn len(&self) -> usize {
            self.tokens.read().await.len()
        }
    }

    #[rocket::async_trait]
    impl ResetTokenStore for MemoryResetTokenStore {
        async fn insert(&self, record: StoredResetToken) -> AuthResult<()> {
            self.tokens.write().await.insert(record.token_id, record);
            Ok(())
        }

        async fn find(&self, token_id: Uuid) -> AuthResult<Option<StoredResetToken>> {
            Ok(self.tokens.read().await.get(&token_id).cloned())
        }

        async fn mark_used(&self, token_id: Uuid, now: DateTime<Utc>) -> AuthResult<bool> {
            let mut tokens = self.tokens.write().await;
            match tokens.get_mut(&token_id) {
                Some(record) if record.used_at.is_none() => {
                    record.used_at = Some(now);
                    Ok(true)
                }
                _ => Ok(false),
            }
        }

        async fn revoke_for_user(
            &self,
            user_id: Uuid,
            purpose: &str,
            now: DateTime<Utc>,
        ) -> AuthResult<u64> {
            let mut revoked = 0;
            for record in self.tokens.write().await.values_mut() {
                if record.user_id == user_id && record.purpose == purpose && record.used_at.is_none()
                {
                    record.used_at = Some(now);
                    revoked += 1;
                }
            }
            Ok(revoked)
        }

        async fn purge_expired(&self, now: DateTime<Utc>) -> AuthResult<u64> {
            let mut tokens = self.tokens.write().await;
            let before = tokens.len();
            let used_cutoff = now - chrono::Duration::days(30);
            tokens.retain(|_, record| {
                record.expires_at > now && record.used_at.is_none_or(|used| used > used_cutoff)
            });
            Ok((before - tokens.len()) as u64)
        }
    }

    /// Notifier that keeps every reset link it was asked to deliver.
    #[derive(Default)]
    pub struct CapturingNotifier {
        sent: Mutex<Vec<(Uuid, ResetLink)>>,
    }

    impl CapturingNotifier {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn count(&self) -> usize {
            self.sent.lock().await.len()
        }

        pub async fn last_token(&self) -> Option<String> {
            self.sent
                .lock()
                .await
                .last()
                .map(|(_, link)| link.token.clone())
        }

        pub async fn last_link(&self) -> Option<ResetLink> {
            self.sent.lock().await.last().map(|(_, link)| link.clone())
        }
    }

    #[rocket::async_trait]
    impl ResetNotifier for CapturingNotifier {
        async fn send_password_reset(&self, user: &User, link: &ResetLink) -> AuthResult<()> {
            self.sent.lock().await.push((user.id, link.clone()));
            Ok(())
        }
    }

    /// In-memory stores plus a capturing notifier, wired into an
    /// [`AuthService`] on demand.
    #[derive(Clone, Default)]
    pub struct MemoryBackend {
        pub users: Arc<MemoryUserStore>,
        pub reset_tokens: Arc<MemoryResetTokenStore>,
        pub notifier: Arc<CapturingNotifier>,
    }

    impl MemoryBackend {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn service(&self) -> AuthService {
            self.service_with(test_auth_config())
        }

        pub fn service_with(&self, config: AuthConfig) -> AuthService {
            AuthService::new(config, self.users.clone(), self.reset_tokens.clone())
                .expect("test auth config is valid")
                .with_notifier(self.notifier.clone())
        }

        pub fn auth_state(&self) -> AuthState {
            AuthState::new(self.service())
        }

        /// Inserts an active account with the given password and role.
        pub async fn seed_user(&self, email: &str, password: &str, role: Role) -> User {
            let password_hash = PasswordService::new(4)
                .hash_password(password)
                .await
                .expect("hash test password");
            self.users
                .create(NewUser {
                    email: email.to_lowercase(),
                    password_hash,
                    first_name: "Test".into(),
                    last_name: role.as_str().to_string(),
                    phone: None,
                    address: Default::default(),
                    role,
                })
                .await
                .expect("seed user")
        }

        /// Bearer token for `user` signed with the test secret.
        pub fn token_for(&self, user: &User) -> String {
            self.service()
                .tokens()
                .issue_default(user.id, user.role)
                .expect("issue test token")
                .token
        }
    }

    pub mod database {
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::{GenericImage, ImageExt, core::WaitFor};
        use testcontainers_modules::testcontainers::{
            ContainerAsync, core::error::TestcontainersError, runners::AsyncRunner,
        };
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            #[error("neither TEST_DATABASE_URL nor PORTAL_TEST_USE_CONTAINERS is set")]
            MissingUrl,
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("migration error: {0}")]
            Migration(#[from] sqlx::migrate::MigrateError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral, fully migrated database for one test.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<GenericImage>>,
        }

        impl TestDatabase {
            /// Uses `TEST_DATABASE_URL` when set; otherwise starts a disposable
            /// Postgres container if `PORTAL_TEST_USE_CONTAINERS` is set.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                if let Ok(url) = std::env::var("TEST_DATABASE_URL") {
                    return Self::with_admin_url(&url, None).await;
                }
                if std::env::var_os("PORTAL_TEST_USE_CONTAINERS").is_some() {
                    return Self::new().await;
                }
                Err(TestDatabaseError::MissingUrl)
            }

            /// Provision a fresh database inside a new Postgres container.
            pub async fn new() -> Result<Self, TestDatabaseError> {
                let image = GenericImage::new("postgres", "16-alpine")
                    .with_wait_for(WaitFor::message_on_stderr(
                        "database system is ready to accept connections",
                    ));

                let request = image
                    .with_env_var("POSTGRES_DB", "postgres")
                    .with_env_var("POSTGRES_USER", "postgres")
                    .with_env_var("POSTGRES_PASSWORD", "postgres");

                let container = request.start().await?;

                let host = container.get_host().await?.to_string();
                let port = container.get_host_port_ipv4(5432).await?;
                let admin_url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

                Self::with_admin_url(&admin_url, Some(container)).await
            }

            async fn with_admin_url(
                admin_url: &str,
                container: Option<ContainerAsync<GenericImage>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions =
                    admin_url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let base_name = base_options
                    .get_database()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "postgres".to_string());

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                let new_db_name = format!("{}_{}", base_name, Uuid::new_v4().simple());
                let create_sql = format!("CREATE DATABASE \"{}\" TEMPLATE template0", new_db_name);
                sqlx::query(&create_sql)
                    .execute(&admin_pool)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;
                admin_pool.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.clone().database(&new_db_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                MIGRATOR.run(&pool).await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name: new_db_name,
                    container,
                })
            }

            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ =
                                drop_database_with_fallback(admin_options.clone(), &db_name).await;
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        auth_state: Option<AuthState>,
        pg_pool: Option<PgPool>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                mounts: Vec::new(),
                auth_state: None,
                pg_pool: None,
            }
        }

        /// Mount routes under `/api`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api".to_string(), routes));
            self
        }

        /// Mount routes under an arbitrary base.
        pub fn mount_routes_at(mut self, base: &str, routes: Vec<Route>) -> Self {
            self.mounts.push((base.to_string(), routes));
            self
        }

        /// Mount every API route.
        pub fn mount_all_api_routes(self) -> Self {
            self.mount_api_routes(crate::api_routes())
        }

        pub fn manage_auth_state(mut self, state: AuthState) -> Self {
            self.auth_state = Some(state);
            self
        }

        /// Manage a `PgPool` instance for tests that exercise database-backed routes.
        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment)
                .register("/", catchers![crate::error::default_catcher]);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(state) = self.auth_state {
                rocket = rocket.manage(state);
            }

            if let Some(pool) = self.pg_pool {
                rocket = rocket.manage(pool);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }

        /// Asynchronous client that does not replay cookies between requests.
        pub async fn async_untracked_client(self) -> AsyncClient {
            AsyncClient::untracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
