use rocket_db_pools::sqlx::{self, PgPool, migrate::Migrator};
use rocket_db_pools::Database;

#[derive(Database)]
#[database("portal_db")]
pub struct PortalDb(sqlx::PgPool);

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Applies pending migrations; already-applied ones are skipped.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::Error> {
    log::info!("checking database migration state");
    MIGRATOR.run(pool).await?;
    log::info!("database migrations up to date");
    Ok(())
}
