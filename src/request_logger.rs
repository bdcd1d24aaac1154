use rocket::fairing::{Fairing, Info, Kind};
use rocket::{Data, Request, Response};
use std::time::Instant;

use crate::auth::guards::ResolvedPrincipalId;

/// Fairing to log one line per HTTP request with timing and, when a bearer
/// token was accepted, the caller's id.
pub struct RequestLogger;

#[rocket::async_trait]
impl Fairing for RequestLogger {
    fn info(&self) -> Info {
        Info {
            name: "Request Logger",
            kind: Kind::Request | Kind::Response,
        }
    }

    async fn on_request(&self, request: &mut Request<'_>, _: &mut Data<'_>) {
        request.local_cache(Instant::now);
    }

    async fn on_response<'r>(&self, request: &'r Request<'_>, response: &mut Response<'r>) {
        let start_time = request.local_cache(Instant::now);
        let duration = start_time.elapsed();
        let principal = request.local_cache(ResolvedPrincipalId::default);

        let method = request.method();
        let uri = request.uri();
        let status = response.status();

        match principal.0 {
            Some(user_id) => log::info!(
                "{} {} -> {} ({:.2}ms) user={}",
                method,
                uri,
                status.code,
                duration.as_secs_f64() * 1000.0,
                user_id
            ),
            None => log::info!(
                "{} {} -> {} ({:.2}ms)",
                method,
                uri,
                status.code,
                duration.as_secs_f64() * 1000.0
            ),
        }
    }
}
