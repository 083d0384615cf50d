use std::sync::Arc;
use std::time::Duration;

use log::warn;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::http::Status;
use rocket::response::{self, Responder, Response};
use rocket::serde::json::Json;
use rocket::{FromForm, Request, State, post};
use tokio::time::timeout;

use super::{BearerToken, ClientIp};
use crate::auth::TokenValidator;
use crate::config::Config;
use crate::models::{MessageType, UploadResponse};
use crate::rate_limit::{RateLimitedError, RateLimiter};
use crate::storage::ObjectStorage;

/// Max upload size: 10 MiB.
pub const MAX_UPLOAD_SIZE: u64 = 10 * 1024 * 1024;

/// MIME types accepted for attachments.
const ALLOWED_MIME_TYPES: &[&str] = &[
    "image/jpeg",
    "image/png",
    "image/gif",
    "image/webp",
    "application/pdf",
    "application/msword",
    "application/zip",
    "application/json",
    "text/plain",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "application/vnd.openxmlformats-officedocument.presentationml.presentation",
    "application/vnd.ms-excel",
    "application/vnd.ms-powerpoint",
];

#[derive(FromForm)]
pub struct UploadForm<'r> {
    file: TempFile<'r>,
}

/// Upload failures: plain JSON errors, or a 429 that must carry the
/// rate limit headers.
pub enum UploadRejection {
    RateLimited(RateLimitedError),
    Plain(Status, Json<serde_json::Value>),
}

impl<'r, 'o: 'r> Responder<'r, 'o> for UploadRejection {
    fn respond_to(self, req: &'r Request<'_>) -> response::Result<'o> {
        match self {
            UploadRejection::RateLimited(e) => e.respond_to(req),
            UploadRejection::Plain(status, body) => {
                Response::build_from(body.respond_to(req)?)
                    .status(status)
                    .ok()
            }
        }
    }
}

fn error(status: Status, message: &str) -> UploadRejection {
    UploadRejection::Plain(status, Json(serde_json::json!({ "error": message })))
}

/// Token-gated multipart upload. The object lands in external storage;
/// the response carries the fields a client echoes back in a
/// `send_message` frame.
#[post("/upload", data = "<form>")]
pub async fn upload_file(
    validator: &State<Arc<dyn TokenValidator>>,
    storage: &State<Arc<dyn ObjectStorage>>,
    limiter: &State<RateLimiter>,
    config: &State<Config>,
    ip: ClientIp,
    token: BearerToken,
    mut form: Form<UploadForm<'_>>,
) -> Result<Json<UploadResponse>, UploadRejection> {
    match timeout(Duration::from_secs(5), validator.validate(&token.0)).await {
        Ok(Ok(_identity)) => {}
        Ok(Err(_)) => return Err(error(Status::Unauthorized, "Invalid token")),
        Err(_) => return Err(error(Status::GatewayTimeout, "Token validation timed out")),
    }

    let rl = limiter.check(
        &format!("upload:{}", ip.0),
        config.rate_limit_uploads,
        60,
    );
    if !rl.allowed {
        let message = format!("Rate limited: max {} uploads per minute", rl.limit);
        return Err(UploadRejection::RateLimited(RateLimitedError {
            message,
            info: rl,
        }));
    }

    let size = form.file.len();
    if size == 0 {
        return Err(error(Status::BadRequest, "File must not be empty"));
    }
    if size > MAX_UPLOAD_SIZE {
        return Err(error(Status::PayloadTooLarge, "File exceeds the 10 MiB limit"));
    }

    let mime_type = form
        .file
        .content_type()
        .map(|ct| format!("{}/{}", ct.top(), ct.sub()))
        .ok_or_else(|| error(Status::UnsupportedMediaType, "Missing content type"))?;
    if !ALLOWED_MIME_TYPES.contains(&mime_type.as_str()) {
        return Err(error(
            Status::UnsupportedMediaType,
            "File type is not allowed",
        ));
    }
    let message_type = if mime_type.starts_with("image/") {
        MessageType::Image
    } else {
        MessageType::File
    };

    let file_name = form
        .file
        .raw_name()
        .and_then(|n| n.dangerous_unsafe_unsanitized_raw().as_str().rsplit('/').next())
        .filter(|n| !n.is_empty())
        .unwrap_or("upload.bin")
        .to_string();

    // Stage the part to a scratch path, then hand the bytes to storage
    let scratch = std::env::temp_dir().join(format!("upload-{}", uuid::Uuid::new_v4()));
    form.file
        .copy_to(&scratch)
        .await
        .map_err(|_| error(Status::InternalServerError, "Failed to read upload"))?;
    let bytes = tokio::fs::read(&scratch)
        .await
        .map_err(|_| error(Status::InternalServerError, "Failed to read upload"))?;
    tokio::fs::remove_file(&scratch).await.ok();

    let key = format!("{}-{file_name}", uuid::Uuid::new_v4());
    let file_url = storage.put(&key, bytes, &mime_type).await.map_err(|e| {
        warn!("upload of {file_name} failed: {e}");
        error(Status::BadGateway, "Object storage unavailable")
    })?;

    Ok(Json(UploadResponse {
        file_url,
        file_name,
        file_size: size as i64,
        mime_type,
        message_type,
    }))
}
