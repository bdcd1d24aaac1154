use rocket::http::{Cookie, CookieJar, SameSite, Status};
use rocket::response::status;
use rocket::serde::json::Json;
use rocket::{State, get, post, put};
use rocket_okapi::openapi;
use time::Duration as TimeDuration;

use crate::auth::guards::MaybePrincipal;
use crate::auth::jwt::SignedAccessToken;
use crate::auth::responses::{
    AuthResponse, ChangePasswordRequest, ForgotPasswordRequest, LoginRequest, MessageResponse,
    MfaCodeRequest, MfaSetupResponse, RegisterRequest, ResetPasswordRequest, TokenResponse,
    UserResponse,
};
use crate::auth::service::AuthSession;
use crate::auth::{AuthConfig, AuthError, AuthState};
use crate::models::Principal;

type AuthRouteResult<T> = Result<Json<T>, AuthError>;

pub const FORGOT_PASSWORD_MESSAGE: &str =
    "If an account with that email exists, a password reset link has been sent";

/// Create an account. Anonymous callers always get a CLIENT; admins may
/// request other roles.
#[openapi(tag = "Auth")]
#[post("/auth/register", data = "<payload>")]
pub async fn register(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    caller: MaybePrincipal,
    payload: Json<RegisterRequest>,
) -> Result<status::Custom<Json<AuthResponse>>, AuthError> {
    let session = state
        .service
        .register(payload.into_inner(), caller.0.as_ref())
        .await?;

    // An admin provisioning someone else keeps their own session.
    if caller.0.is_none() {
        set_token_cookie(cookies, &state.config, &session.token);
    }

    Ok(status::Custom(Status::Created, Json(auth_response(session))))
}

#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<payload>")]
pub async fn login(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    payload: Json<LoginRequest>,
) -> AuthRouteResult<AuthResponse> {
    let session = state.service.login(payload.into_inner()).await?;
    set_token_cookie(cookies, &state.config, &session.token);
    Ok(Json(auth_response(session)))
}

/// Tokens are stateless; logging out only drops the cookie.
#[openapi(tag = "Auth")]
#[post("/auth/logout")]
pub async fn logout(state: &State<AuthState>, cookies: &CookieJar<'_>) -> Json<MessageResponse> {
    clear_token_cookie(cookies, &state.config);
    Json(MessageResponse::new("Logged out successfully"))
}

#[openapi(tag = "Auth")]
#[post("/auth/refresh-token")]
pub async fn refresh_token(
    state: &State<AuthState>,
    cookies: &CookieJar<'_>,
    principal: Principal,
) -> AuthRouteResult<TokenResponse> {
    let token = state.service.refresh(&principal)?;
    set_token_cookie(cookies, &state.config, &token);
    Ok(Json(TokenResponse {
        token: token.token,
        expires_at: token.expires_at,
    }))
}

#[openapi(tag = "Auth")]
#[get("/auth/me")]
pub async fn me(state: &State<AuthState>, principal: Principal) -> AuthRouteResult<UserResponse> {
    let user = state.service.current_user(principal.id).await?;
    Ok(Json(UserResponse { user }))
}

#[openapi(tag = "Auth")]
#[put("/auth/change-password", data = "<payload>")]
pub async fn change_password(
    state: &State<AuthState>,
    principal: Principal,
    payload: Json<ChangePasswordRequest>,
) -> AuthRouteResult<MessageResponse> {
    state
        .service
        .change_password(&principal, payload.into_inner())
        .await?;
    Ok(Json(MessageResponse::new("Password changed successfully")))
}

/// Always answers with the same message whether or not the email is known.
#[openapi(tag = "Auth")]
#[post("/auth/forgot-password", data = "<payload>")]
pub async fn forgot_password(
    state: &State<AuthState>,
    payload: Json<ForgotPasswordRequest>,
) -> AuthRouteResult<MessageResponse> {
    match state.service.forgot_password(payload.email.as_deref()).await {
        Ok(()) => {}
        Err(err @ AuthError::Validation(_)) => return Err(err),
        // Failures past validation must not be observable either.
        Err(err) => log::error!("password reset issuance failed: {err}"),
    }
    Ok(Json(MessageResponse::new(FORGOT_PASSWORD_MESSAGE)))
}

#[openapi(tag = "Auth")]
#[post("/auth/reset-password", data = "<payload>")]
pub async fn reset_password(
    state: &State<AuthState>,
    payload: Json<ResetPasswordRequest>,
) -> AuthRouteResult<MessageResponse> {
    state.service.reset_password(payload.into_inner()).await?;
    Ok(Json(MessageResponse::new("Password reset successfully")))
}

#[openapi(tag = "Auth")]
#[post("/auth/mfa/setup")]
pub async fn mfa_setup(
    state: &State<AuthState>,
    principal: Principal,
) -> AuthRouteResult<MfaSetupResponse> {
    let setup = state.service.setup_mfa(&principal).await?;
    Ok(Json(MfaSetupResponse {
        secret: setup.secret,
        qr_code: setup.qr_code,
        manual_entry_key: setup.manual_entry_key,
    }))
}

#[openapi(tag = "Auth")]
#[post("/auth/mfa/verify", data = "<payload>")]
pub async fn mfa_verify(
    state: &State<AuthState>,
    principal: Principal,
    payload: Json<MfaCodeRequest>,
) -> AuthRouteResult<MessageResponse> {
    state
        .service
        .verify_mfa(&principal, payload.token.as_deref())
        .await?;
    Ok(Json(MessageResponse::new("MFA enabled successfully")))
}

#[openapi(tag = "Auth")]
#[post("/auth/mfa/disable", data = "<payload>")]
pub async fn mfa_disable(
    state: &State<AuthState>,
    principal: Principal,
    payload: Json<MfaCodeRequest>,
) -> AuthRouteResult<MessageResponse> {
    state
        .service
        .disable_mfa(&principal, payload.token.as_deref())
        .await?;
    Ok(Json(MessageResponse::new("MFA disabled successfully")))
}

fn auth_response(session: AuthSession) -> AuthResponse {
    AuthResponse {
        token: session.token.token,
        expires_at: session.token.expires_at,
        user: session.user,
    }
}

fn set_token_cookie(cookies: &CookieJar<'_>, config: &AuthConfig, token: &SignedAccessToken) {
    let mut cookie = Cookie::build((config.token_cookie_name.clone(), token.token.clone()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .secure(config.cookie_secure)
        .max_age(TimeDuration::seconds(config.access_token_ttl_secs))
        .build();

    if let Some(domain) = &config.cookie_domain {
        cookie.set_domain(domain.clone());
    }

    cookies.add(cookie);
}

fn clear_token_cookie(cookies: &CookieJar<'_>, config: &AuthConfig) {
    let mut cookie = Cookie::build((config.token_cookie_name.clone(), String::new()))
        .path("/")
        .removal()
        .build();

    if let Some(domain) = &config.cookie_domain {
        cookie.set_domain(domain.clone());
    }
    cookies.add(cookie);
}
