use std::io::{self, Write};

use clap::Parser;
use sqlx::postgres::PgPoolOptions;

use portal_api::auth::passwords::{PasswordHasher, PasswordService};
use portal_api::auth::responses::{canonical_email, validate_password};
use portal_api::auth::store::{PgUserStore, UserStore};
use portal_api::auth::AuthError;
use portal_api::models::{Address, NewUser, Role};

/// Provision an account directly in the database. Used to bootstrap the
/// first SUPER_ADMIN, which cannot be created through self-registration.
#[derive(Parser, Debug)]
#[command(name = "create_user", about = "Create an insurance portal account")]
struct Args {
    /// Email address for the account (case insensitive).
    #[arg(long)]
    email: String,

    /// Plaintext password to hash and store for this user.
    #[arg(long)]
    password: String,

    #[arg(long)]
    first_name: String,

    #[arg(long)]
    last_name: String,

    #[arg(long)]
    phone: Option<String>,

    /// CLIENT, ADMIN, SUPER_ADMIN, CLAIMS_ADJUSTER or BILLING_SPECIALIST.
    #[arg(long, default_value = "CLIENT")]
    role: String,

    /// bcrypt work factor.
    #[arg(long, default_value_t = 12)]
    cost: u32,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();

    let email = match canonical_email(Some(&args.email)) {
        Ok(email) => email,
        Err(err) => fail(&err.to_string())?,
    };
    if let Err(err) = validate_password(Some(&args.password), "Password") {
        fail::<()>(&err.to_string())?;
    }
    let Some(role) = Role::parse(&args.role) else {
        let names: Vec<&str> = Role::ALL.iter().map(|role| role.as_str()).collect();
        return fail(&format!(
            "unsupported role '{}'. Use one of {}.",
            args.role,
            names.join(", ")
        ));
    };

    let database_url = std::env::var("DATABASE_URL")?;
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&database_url)
        .await?;
    let store = PgUserStore::new(pool);

    let password_hash = PasswordService::new(args.cost)
        .hash_password(&args.password)
        .await?;

    let user = match store
        .create(NewUser {
            email: email.clone(),
            password_hash,
            first_name: args.first_name.trim().to_string(),
            last_name: args.last_name.trim().to_string(),
            phone: args.phone,
            address: Address::default(),
            role,
        })
        .await
    {
        Ok(user) => user,
        Err(AuthError::EmailTaken) => {
            return fail(&format!("a user with email '{email}' already exists."));
        }
        Err(err) => return Err(err.into()),
    };

    println!("Created {} user '{}' with id {}", user.role, user.email, user.id);
    Ok(())
}

fn fail<T>(message: &str) -> Result<T, Box<dyn std::error::Error>> {
    writeln!(io::stderr(), "error: {message}")?;
    std::process::exit(1);
}
