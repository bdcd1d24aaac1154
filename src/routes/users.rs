//! Account administration: listing, profile read/update and activation.

use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;
use uuid::Uuid;

use crate::auth::guards::{OwnerOrElevated, RequireAdmin, RequireStaff, UserIdParam};
use crate::auth::responses::{StatusRequest, UpdateProfileRequest, UserResponse, UsersResponse};
use crate::auth::{AuthError, AuthResult, AuthState};

type UserRouteResult<T> = Result<Json<T>, AuthError>;

fn parse_user_id(id: &str) -> AuthResult<Uuid> {
    id.trim()
        .parse::<Uuid>()
        .map_err(|_| AuthError::Validation("Invalid user id".into()))
}

/// All accounts, oldest first. Staff only.
#[openapi(tag = "Users")]
#[get("/users")]
pub async fn list_users(
    state: &State<AuthState>,
    _staff: RequireStaff,
) -> UserRouteResult<UsersResponse> {
    let users = state.service.users().list().await?;
    Ok(Json(UsersResponse {
        users: users.iter().map(|user| user.profile()).collect(),
    }))
}

#[openapi(tag = "Users")]
#[get("/users/<id>")]
pub async fn get_user(
    state: &State<AuthState>,
    _owner: OwnerOrElevated<UserIdParam>,
    id: &str,
) -> UserRouteResult<UserResponse> {
    let id = parse_user_id(id)?;
    let user = state
        .service
        .users()
        .find_by_id(id)
        .await?
        .ok_or(AuthError::UserNotFound)?;
    Ok(Json(UserResponse {
        user: user.profile(),
    }))
}

#[openapi(tag = "Users")]
#[put("/users/<id>", data = "<payload>")]
pub async fn update_user(
    state: &State<AuthState>,
    owner: OwnerOrElevated<UserIdParam>,
    id: &str,
    payload: Json<UpdateProfileRequest>,
) -> UserRouteResult<UserResponse> {
    let id = parse_user_id(id)?;
    let update = payload.into_inner().into_update()?;
    let user = state
        .service
        .users()
        .update_profile(id, &update)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    log::info!("user {} profile updated by {}", user.id, owner.id);
    Ok(Json(UserResponse {
        user: user.profile(),
    }))
}

/// Activate or deactivate an account. Admins cannot deactivate themselves.
#[openapi(tag = "Users")]
#[patch("/users/<id>/status", data = "<payload>")]
pub async fn set_user_status(
    state: &State<AuthState>,
    admin: RequireAdmin,
    id: &str,
    payload: Json<StatusRequest>,
) -> UserRouteResult<UserResponse> {
    let id = parse_user_id(id)?;
    let is_active = payload
        .is_active
        .ok_or_else(|| AuthError::Validation("isActive is required".into()))?;
    if id == admin.id && !is_active {
        return Err(AuthError::Validation(
            "You cannot deactivate your own account".into(),
        ));
    }

    let user = state
        .service
        .users()
        .set_active(id, is_active)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    log::info!(
        "user {} {} by {}",
        user.id,
        if is_active { "activated" } else { "deactivated" },
        admin.id
    );
    Ok(Json(UserResponse {
        user: user.profile(),
    }))
}
