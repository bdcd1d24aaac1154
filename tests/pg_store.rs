use chrono::{Duration, Utc};
use portal_api::auth::reset_store::{self, PASSWORD_RESET_PURPOSE, ResetTokenStore};
use portal_api::auth::store::UserStore;
use portal_api::auth::{AuthError, PgResetTokenStore, PgUserStore};
use portal_api::models::{Address, MfaMethod, NewUser, ProfileUpdate, Role};
use portal_api::test_support::{TestDatabase, TestDatabaseError};

async fn database() -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::MissingUrl) => {
            eprintln!("skipping postgres store test: TEST_DATABASE_URL not set");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

fn new_user(email: &str, role: Role) -> NewUser {
    NewUser {
        email: email.to_string(),
        password_hash: "$2b$04$notarealhashnotarealhashnotarealhashnotarealhashnot".into(),
        first_name: "Pat".into(),
        last_name: "Policyholder".into(),
        phone: Some("555-0100".into()),
        address: Address {
            city: Some("Springfield".into()),
            ..Default::default()
        },
        role,
    }
}

#[tokio::test]
async fn user_store_round_trips_accounts() {
    let Some(db) = database().await else { return };
    let store = PgUserStore::new(db.pool_clone());

    let user = store
        .create(new_user("pat@x.com", Role::ClaimsAdjuster))
        .await
        .expect("create");
    assert!(user.is_active);
    assert_eq!(user.role, Role::ClaimsAdjuster);
    assert_eq!(user.address.city.as_deref(), Some("Springfield"));
    assert!(user.mfa.is_none());

    let duplicate = store.create(new_user("PAT@x.com", Role::Client)).await;
    assert!(matches!(duplicate, Err(AuthError::EmailTaken)));

    let by_email = store
        .find_by_email("PAT@X.COM")
        .await
        .expect("find")
        .expect("present");
    assert_eq!(by_email.id, user.id);

    assert!(store.update_password(user.id, "$2b$04$other").await.expect("update"));
    assert!(
        !store
            .update_password(uuid::Uuid::new_v4(), "$2b$04$other")
            .await
            .expect("update missing")
    );

    let updated = store
        .update_profile(
            user.id,
            &ProfileUpdate {
                last_name: Some("Renamed".into()),
                ..Default::default()
            },
        )
        .await
        .expect("update profile")
        .expect("present");
    assert_eq!(updated.last_name, "Renamed");
    assert_eq!(updated.first_name, "Pat");

    let inactive = store
        .set_active(user.id, false)
        .await
        .expect("deactivate")
        .expect("present");
    assert!(!inactive.is_active);

    assert_eq!(store.list().await.expect("list").len(), 1);

    db.close().await.expect("drop test database");
}

#[tokio::test]
async fn user_store_tracks_mfa_enrollment() {
    let Some(db) = database().await else { return };
    let store = PgUserStore::new(db.pool_clone());
    let user = store
        .create(new_user("mfa@x.com", Role::Client))
        .await
        .expect("create");

    store
        .save_mfa_secret(user.id, "JBSWY3DPEHPK3PXP", MfaMethod::Authenticator)
        .await
        .expect("save");
    store
        .save_mfa_secret(user.id, "KRSXG5CTMVRXEZLU", MfaMethod::Authenticator)
        .await
        .expect("rotate pending secret");
    let pending = store.find_by_id(user.id).await.expect("find").expect("present");
    assert!(!pending.mfa_enabled());
    assert_eq!(
        pending.mfa.as_ref().map(|mfa| mfa.secret.as_str()),
        Some("KRSXG5CTMVRXEZLU")
    );

    store.enable_mfa(user.id).await.expect("enable");
    let enabled = store.find_by_id(user.id).await.expect("find").expect("present");
    assert!(enabled.mfa_enabled());

    let replaced = store
        .save_mfa_secret(user.id, "MFRGGZDFMZTWQ2LK", MfaMethod::Authenticator)
        .await;
    assert!(matches!(replaced, Err(AuthError::MfaAlreadyEnabled)));
    let unchanged = store.find_by_id(user.id).await.expect("find").expect("present");
    assert!(unchanged.mfa_enabled());
    assert_eq!(
        unchanged.mfa.as_ref().map(|mfa| mfa.secret.as_str()),
        Some("KRSXG5CTMVRXEZLU")
    );

    store.clear_mfa(user.id).await.expect("clear");
    let cleared = store.find_by_id(user.id).await.expect("find").expect("present");
    assert!(cleared.mfa.is_none());

    db.close().await.expect("drop test database");
}

#[tokio::test]
async fn reset_token_store_consumes_once() {
    let Some(db) = database().await else { return };
    let users = PgUserStore::new(db.pool_clone());
    let tokens = PgResetTokenStore::new(db.pool_clone());
    let user = users
        .create(new_user("reset@x.com", Role::Client))
        .await
        .expect("create");

    let now = Utc::now();
    let (issued, stored) = reset_store::mint(user.id, PASSWORD_RESET_PURPOSE, now, Duration::hours(1));
    tokens.insert(stored).await.expect("insert");

    let found = tokens
        .find(issued.token_id)
        .await
        .expect("find")
        .expect("present");
    assert_eq!(found.user_id, user.id);
    assert_eq!(found.purpose, PASSWORD_RESET_PURPOSE);
    assert!(found.used_at.is_none());

    assert!(tokens.mark_used(issued.token_id, now).await.expect("first use"));
    assert!(!tokens.mark_used(issued.token_id, now).await.expect("second use"));

    let (_, second) = reset_store::mint(user.id, PASSWORD_RESET_PURPOSE, now, Duration::hours(1));
    tokens.insert(second).await.expect("insert");
    let revoked = tokens
        .revoke_for_user(user.id, PASSWORD_RESET_PURPOSE, now)
        .await
        .expect("revoke");
    assert_eq!(revoked, 1);

    let purged = tokens
        .purge_expired(now + Duration::hours(2))
        .await
        .expect("purge");
    assert_eq!(purged, 2);

    db.close().await.expect("drop test database");
}
