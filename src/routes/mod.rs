//! HTTP route handlers outside the auth flows. Handlers are annotated with
//! `#[openapi]` so `rocket_okapi` can derive the OpenAPI document.

pub mod health;
pub mod users;
