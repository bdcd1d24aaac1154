//! JSON rendering for every error the API produces, whether it comes from a
//! handler returning [`AuthError`] or from a request guard rejecting before
//! the handler runs.

use std::io::Cursor;

use rocket::http::{ContentType, Status};
use rocket::response::{self, Responder};
use rocket::serde::json::Json;
use rocket::{Request, Response, catch};
use rocket_okapi::okapi::openapi3::{RefOr, Response as OpenApiResponse, Responses};
use rocket_okapi::r#gen::OpenApiGenerator;
use rocket_okapi::response::OpenApiResponderInner;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::auth::{AuthError, AuthState};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub status: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mfa_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            status: status.code,
            message: message.into(),
            mfa_required: None,
            detail: None,
        }
    }

    pub fn from_auth_error(err: &AuthError, expose_details: bool) -> Self {
        let mut body = Self::new(err.status(), err.public_message());
        if err.mfa_required() {
            body.mfa_required = Some(true);
        }
        if expose_details && err.is_internal() {
            body.detail = Some(err.to_string());
        }
        body
    }
}

/// Rejection recorded by a request guard so the catcher can render it.
#[derive(Debug, Clone, Default)]
pub struct GuardRejection(pub Option<ErrorResponse>);

pub fn record_rejection(request: &Request<'_>, err: &AuthError) {
    log_failure(request, err);
    let body = ErrorResponse::from_auth_error(err, expose_details(request));
    request.local_cache(|| GuardRejection(Some(body)));
}

fn expose_details(request: &Request<'_>) -> bool {
    request
        .rocket()
        .state::<AuthState>()
        .map(|state| state.config.expose_error_details)
        .unwrap_or(false)
}

fn log_failure(request: &Request<'_>, err: &AuthError) {
    if err.is_internal() {
        log::error!("{} {} failed: {}", request.method(), request.uri(), err);
    } else {
        log::debug!("{} {} rejected: {}", request.method(), request.uri(), err);
    }
}

fn render(status: Status, body: &ErrorResponse) -> response::Result<'static> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| {
        r#"{"status":500,"message":"Failed to serialize error"}"#.to_string()
    });

    Response::build()
        .status(status)
        .header(ContentType::JSON)
        .sized_body(json.len(), Cursor::new(json))
        .ok()
}

impl<'r> Responder<'r, 'static> for AuthError {
    fn respond_to(self, request: &'r Request<'_>) -> response::Result<'static> {
        log_failure(request, &self);
        let body = ErrorResponse::from_auth_error(&self, expose_details(request));
        render(self.status(), &body)
    }
}

impl OpenApiResponderInner for AuthError {
    fn responses(_generator: &mut OpenApiGenerator) -> rocket_okapi::Result<Responses> {
        let mut responses = Responses::default();
        for (code, description) in [
            ("400", "Validation failure or rejected reset/MFA token"),
            ("401", "Missing, invalid or expired credentials"),
            ("403", "Authenticated but not allowed"),
            ("404", "Referenced account does not exist"),
            ("409", "Email already registered"),
            ("500", "Server misconfiguration or infrastructure failure"),
        ] {
            responses.responses.insert(
                code.to_string(),
                RefOr::Object(OpenApiResponse {
                    description: description.to_string(),
                    ..Default::default()
                }),
            );
        }
        Ok(responses)
    }
}

/// Renders guard rejections (and any other unhandled status) as JSON.
#[catch(default)]
pub fn default_catcher(status: Status, request: &Request<'_>) -> Json<ErrorResponse> {
    if let GuardRejection(Some(body)) = request.local_cache(GuardRejection::default) {
        if body.status == status.code {
            return Json(body.clone());
        }
    }

    Json(ErrorResponse::new(
        status,
        status.reason().unwrap_or("Unknown error"),
    ))
}
