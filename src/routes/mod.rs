// Route module decomposition — each surface in its own file.
// Shared request guards live here; route functions in submodules.

mod socket;
mod system;
mod upload;

pub use socket::chat_socket;
pub use system::{health, metrics_scrape, not_found};
pub use upload::upload_file;

use rocket::http::Status;
use rocket::request::{FromRequest, Outcome, Request};

pub struct ClientIp(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for ClientIp {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        let ip = req
            .headers()
            .get_one("X-Forwarded-For")
            .and_then(|s| s.split(',').next())
            .map(|s| s.trim().to_string())
            .or_else(|| req.remote().map(|r| r.ip().to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Outcome::Success(ClientIp(ip))
    }
}

/// `Authorization: Bearer <token>` extractor. Validation happens in the
/// route, where the configured `TokenValidator` is available.
pub struct BearerToken(pub String);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for BearerToken {
    type Error = ();

    async fn from_request(req: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        if let Some(auth) = req.headers().get_one("Authorization")
            && let Some(token) = auth.strip_prefix("Bearer ")
        {
            return Outcome::Success(BearerToken(token.to_string()));
        }
        Outcome::Error((Status::Unauthorized, ()))
    }
}
